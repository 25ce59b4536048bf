//! Hosting platform boundary.
//!
//! [`HostingPlatform`] is the REST surface the engine consumes. The
//! production implementation is [`GitHubClient`](crate::git::GitHubClient);
//! tests drive the engine through a recording fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GitHubError;
use crate::models::ConflictCandidate;

/// A branch tip as referenced by a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchRef {
    pub ref_name: String,
    pub sha: String,
}

/// The parts of a pull request the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    /// Login of the pull request author.
    pub author: String,
    /// `None` while the platform is still computing mergeability.
    pub mergeable: Option<bool>,
    pub base: BranchRef,
    pub head: BranchRef,
}

/// A file as stored on the platform at some ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Blob sha, required for optimistic-concurrency writes.
    pub sha: String,
    pub bytes: Vec<u8>,
}

/// Commit metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: Option<DateTime<Utc>>,
}

/// A top-level conversation comment on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// REST operations consumed from the hosting platform.
///
/// Mutating operations are never retried by implementations; failures are
/// surfaced to the caller.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    async fn get_pull_request(&self, repo: &str, pr_number: u64)
        -> Result<PullRequestInfo, GitHubError>;

    /// Changed files in platform listing order.
    async fn list_pull_request_files(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ConflictCandidate>, GitHubError>;

    /// Merge-base sha of `base` and `head`.
    async fn compare_commits(&self, repo: &str, base: &str, head: &str)
        -> Result<String, GitHubError>;

    /// File at `git_ref`, or `None` if it does not exist there.
    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<RemoteFile>, GitHubError>;

    async fn get_commit(&self, repo: &str, sha: &str) -> Result<CommitInfo, GitHubError>;

    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), GitHubError>;

    async fn update_branch(
        &self,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<(), GitHubError>;

    async fn delete_branch(&self, repo: &str, branch: &str) -> Result<(), GitHubError>;

    /// Create or update a file on `branch`. `current_sha` must be the blob
    /// sha currently on the branch when the file exists. Returns the new
    /// commit sha.
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        bytes: &[u8],
        message: &str,
        current_sha: Option<&str>,
    ) -> Result<String, GitHubError>;

    /// Delete a file on `branch`. Returns the new commit sha.
    async fn delete_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        message: &str,
        current_sha: &str,
    ) -> Result<String, GitHubError>;

    /// All comments, across every page.
    async fn list_issue_comments(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError>;

    /// Returns the new comment id.
    async fn create_issue_comment(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<u64, GitHubError>;

    async fn delete_issue_comment(&self, repo: &str, comment_id: u64) -> Result<(), GitHubError>;

    async fn is_collaborator(&self, repo: &str, user: &str) -> Result<bool, GitHubError>;
}
