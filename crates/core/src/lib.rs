//! conflictbot core library.
//!
//! This crate provides the components for detecting and resolving merge
//! conflicts on pull requests: configuration, the hosting platform client,
//! conflict detection, oracle-backed resolution, resolution persistence,
//! comment command handling and the apply-all state machine.

pub mod apply;
pub mod command;
pub mod config;
pub mod conflict;
pub mod content;
pub mod db;
pub mod errors;
pub mod git;
pub mod imports;
pub mod models;
pub mod platform;
pub mod resolver;
pub mod store;
pub mod workflow;

// Re-exports for convenience.
pub use apply::ApplyCoordinator;
pub use command::CommandInterpreter;
pub use config::AppConfig;
pub use conflict::ConflictDetector;
pub use content::ContentFetcher;
pub use db::Database;
pub use git::GitHubClient;
pub use platform::HostingPlatform;
pub use resolver::{HttpResolverOracle, ResolutionCoordinator, ResolverOracle};
pub use store::{MemoryResolutionStore, ResolutionStore};
pub use workflow::{CycleOutcome, PullRequestWorkflow};
