//! Applying confirmed resolutions to a pull request.
//!
//! - [`machine`] -- the pure apply-all state machine
//! - [`coordinator`] -- the async driver executing its effects

pub mod coordinator;
pub mod machine;

pub use coordinator::ApplyCoordinator;
pub use machine::{transition, ApplyEffect, ApplyEvent, ApplyNotice, ApplyState, Step};
