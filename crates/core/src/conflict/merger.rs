//! Three-way merge engine.
//!
//! Uses the `diffy` crate to perform line-based three-way merges between a
//! base, "ours" (the pull request head) and "theirs" (the base branch tip).

use tracing::debug;

/// Marker diffy emits at the start of every conflicting hunk.
const CONFLICT_START: &str = "<<<<<<<";

/// The result of a three-way merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Both sides merged cleanly into this content.
    Clean(String),
    /// At least one hunk was changed differently on both sides.
    Conflicted {
        /// Merged content with conflict markers.
        content: String,
        /// Number of conflicting hunks.
        hunks: usize,
    },
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        matches!(self, Self::Conflicted { .. })
    }
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `ours` and `theirs` against their common ancestor `base`.
    pub fn three_way_merge(base: &str, ours: &str, theirs: &str) -> MergeOutcome {
        // If either side is identical to base, the other side wins cleanly.
        if ours == base || ours == theirs {
            return MergeOutcome::Clean(theirs.to_string());
        }
        if theirs == base {
            return MergeOutcome::Clean(ours.to_string());
        }

        match diffy::merge(base, ours, theirs) {
            Ok(merged) => {
                debug!("clean three-way merge");
                MergeOutcome::Clean(merged)
            }
            Err(conflicted) => {
                let hunks = conflicted
                    .lines()
                    .filter(|line| line.starts_with(CONFLICT_START))
                    .count()
                    .max(1);
                debug!(hunks, "three-way merge produced conflicts");
                MergeOutcome::Conflicted {
                    content: conflicted,
                    hunks,
                }
            }
        }
    }

    /// Quick check: do these three versions conflict?
    pub fn has_conflicts(base: &str, ours: &str, theirs: &str) -> bool {
        Self::three_way_merge(base, ours, theirs).has_conflicts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_files() {
        let base = "line1\nline2\nline3\n";
        assert_eq!(
            Merger::three_way_merge(base, base, base),
            MergeOutcome::Clean(base.to_string())
        );
    }

    #[test]
    fn test_only_one_side_changed() {
        let base = "line1\nline2\nline3\n";
        let changed = "line1\nmodified\nline3\n";
        assert!(!Merger::has_conflicts(base, changed, base));
        assert!(!Merger::has_conflicts(base, base, changed));
        match Merger::three_way_merge(base, changed, base) {
            MergeOutcome::Clean(merged) => assert!(merged.contains("modified")),
            other => panic!("expected clean merge, got {other:?}"),
        }
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "aaa\nbbb\nccc\nddd\neee\nfff\nggg\n";
        let ours = "AAA\nbbb\nccc\nddd\neee\nfff\nggg\n";
        let theirs = "aaa\nbbb\nccc\nddd\neee\nfff\nGGG\n";
        match Merger::three_way_merge(base, ours, theirs) {
            MergeOutcome::Clean(merged) => {
                assert!(merged.contains("AAA"));
                assert!(merged.contains("GGG"));
            }
            other => panic!("expected clean merge, got {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_changes() {
        let base = "line1\noriginal\nline3\n";
        let ours = "line1\nours_version\nline3\n";
        let theirs = "line1\ntheirs_version\nline3\n";
        match Merger::three_way_merge(base, ours, theirs) {
            MergeOutcome::Conflicted { content, hunks } => {
                assert_eq!(hunks, 1);
                assert!(content.contains("<<<<<<<"));
                assert!(content.contains(">>>>>>>"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_same_change_both_sides() {
        assert!(!Merger::has_conflicts("old\n", "new\n", "new\n"));
    }

    #[test]
    fn test_both_sides_add_different_content_to_empty_base() {
        assert!(Merger::has_conflicts("", "one\n", "two\n"));
    }
}
