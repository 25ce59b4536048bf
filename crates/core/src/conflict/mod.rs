//! Conflict detection for pull requests.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- deciding which modified files of a pull request
//!    genuinely conflict with its base branch.
//! 2. **Strategies** -- a local `git merge` first, then a per-file content
//!    diff that understands JSON manifests.
//! 3. **Merging** -- the line-based three-way merge both rely on.

pub mod content;
pub mod detector;
pub mod json;
pub mod merger;
pub mod native;

pub use content::ContentDiffStrategy;
pub use detector::{
    ConflictDetector, ConflictSource, DetectionContext, DetectionReport, DetectionStrategy,
};
pub use merger::{MergeOutcome, Merger};
pub use native::NativeMergeStrategy;
