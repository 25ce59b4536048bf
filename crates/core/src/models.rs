//! Domain model types used throughout conflictbot.
//!
//! These types bridge the detector, the resolution store, and the apply
//! workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Changed files
// ---------------------------------------------------------------------------

/// How a file was changed by a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Removed,
    Modified,
    Renamed,
    Other,
}

impl ChangeStatus {
    /// Map a GitHub file `status` string onto a [`ChangeStatus`].
    pub fn from_github(s: &str) -> Self {
        match s {
            "added" => Self::Added,
            "removed" => Self::Removed,
            "modified" => Self::Modified,
            "renamed" => Self::Renamed,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
            Self::Renamed => write!(f, "renamed"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A file changed by a pull request. Only `Modified` files are eligible for
/// conflict analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictCandidate {
    pub filename: String,
    pub status: ChangeStatus,
}

impl ConflictCandidate {
    pub fn new(filename: impl Into<String>, status: ChangeStatus) -> Self {
        Self {
            filename: filename.into(),
            status,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.status == ChangeStatus::Modified
    }
}

// ---------------------------------------------------------------------------
// File versions
// ---------------------------------------------------------------------------

/// Coarse classification of a file's content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Binary,
    Json,
    Text,
}

/// One side of a three-way comparison, as fetched from the platform.
///
/// `content` is `None` when the file does not exist at `revision` or is
/// not valid UTF-8 text. `kind` is `None` only when the file is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileVersion {
    pub content: Option<String>,
    pub kind: Option<FileKind>,
    pub revision: String,
    pub branch: String,
}

impl FileVersion {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn is_binary(&self) -> bool {
        self.kind == Some(FileKind::Binary)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Which detection strategy produced a conflict list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The platform reported the PR as mergeable; nothing was analysed.
    Mergeable,
    /// Local `git merge` in a scratch clone.
    NativeMerge,
    /// Per-file three-way diff of fetched contents.
    ContentDiff,
    /// Every strategy failed; all modified files were flagged.
    FailSafe,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mergeable => write!(f, "mergeable"),
            Self::NativeMerge => write!(f, "native_merge"),
            Self::ContentDiff => write!(f, "content_diff"),
            Self::FailSafe => write!(f, "fail_safe"),
        }
    }
}

/// The three-way content gathered for a single conflicting file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub filename: String,
    pub base: FileVersion,
    pub ours: FileVersion,
    pub theirs: FileVersion,
    pub strategy: StrategyKind,
}

// ---------------------------------------------------------------------------
// Resolutions
// ---------------------------------------------------------------------------

/// A persisted resolution for one file of one pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub repo: String,
    pub pr_number: u64,
    pub filename: String,
    pub resolved_code: String,
    pub confirmed: bool,
    pub applied: bool,
    pub applied_commit_sha: Option<String>,
    pub base_content: Option<String>,
    pub ours_content: Option<String>,
    pub theirs_content: Option<String>,
}

impl Resolution {
    /// Confirmed by an authorized command but not yet written to the branch.
    pub fn is_pending(&self) -> bool {
        self.confirmed && !self.applied
    }
}

/// Input for creating (or replacing) a resolution.
#[derive(Debug, Clone)]
pub struct NewResolution {
    pub repo: String,
    pub pr_number: u64,
    pub filename: String,
    pub resolved_code: String,
    pub base_content: Option<String>,
    pub ours_content: Option<String>,
    pub theirs_content: Option<String>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Prefix of the hidden marker carried by every comment the bot posts.
pub const BOT_MARKER_PREFIX: &str = "<!-- conflictbot";

/// Marker of a resolution proposal comment.
pub const PROPOSAL_MARKER: &str = "<!-- conflictbot:proposal -->";

/// Marker of an apply-all result comment.
pub const APPLY_MARKER: &str = "<!-- conflictbot:apply -->";

/// Whether a comment body was posted by the bot itself.
pub fn is_bot_comment(body: &str) -> bool {
    body.contains(BOT_MARKER_PREFIX)
}

/// An authorized "apply all" comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyCommand {
    pub comment_id: u64,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of scanning a pull request's comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandCheck {
    Idle,
    ApplyAll(ApplyCommand),
}

impl CommandCheck {
    pub fn is_apply_all(&self) -> bool {
        matches!(self, Self::ApplyAll(_))
    }
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub repo: String,
    pub pr_number: u64,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, repo: &str, pr_number: u64, details: &str) -> Self {
        Self {
            action: action.to_string(),
            repo: repo.to_string(),
            pr_number,
            details: Some(details.to_string()),
            success: true,
            created_at: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, repo: &str, pr_number: u64, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(action, repo, pr_number, details)
        }
    }
}
