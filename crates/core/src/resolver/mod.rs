//! Conflict resolution through an external oracle.

pub mod coordinator;
pub mod oracle;

pub use coordinator::{ProposedResolution, ResolutionCoordinator};
pub use oracle::{HttpResolverOracle, ResolveRequest, ResolverOracle};
