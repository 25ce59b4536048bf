//! In-memory hosting platform for integration tests.
//!
//! Commits are snapshots of `path -> bytes`; branches point at commits.
//! Writes create new commits and honour the blob-sha concurrency check, so
//! the apply state machine sees the same failure modes as against GitHub.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use conflictbot_core::errors::GitHubError;
use conflictbot_core::models::{ChangeStatus, ConflictCandidate};
use conflictbot_core::platform::{
    BranchRef, CommitInfo, HostingPlatform, IssueComment, PullRequestInfo, RemoteFile,
};

pub const PR_NUMBER: u64 = 7;
pub const AUTHOR: &str = "alice";
pub const BASE_SHA: &str = "base-sha";
pub const HEAD_SHA: &str = "head-sha";
pub const MERGE_BASE_SHA: &str = "merge-base-sha";

type Tree = BTreeMap<String, Vec<u8>>;

/// Deterministic stand-in for a git blob sha.
pub fn blob_sha(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("blob-{:016x}", hasher.finish())
}

/// Call record for `put_file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileCall {
    pub path: String,
    pub branch: String,
    pub content: String,
    pub current_sha: Option<String>,
}

/// Call record for `update_branch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBranchCall {
    pub branch: String,
    pub sha: String,
    pub force: bool,
}

pub struct FakePlatform {
    pr: Mutex<PullRequestInfo>,
    files: Mutex<Vec<ConflictCandidate>>,
    merge_base: Mutex<String>,
    commits: Mutex<HashMap<String, Tree>>,
    branches: Mutex<HashMap<String, String>>,
    comments: Mutex<Vec<IssueComment>>,
    collaborators: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    comment_gate: Mutex<Option<Arc<Notify>>>,
    // Call tracking
    get_pr_calls: AtomicU64,
    get_file_calls: Mutex<Vec<(String, String)>>,
    collaborator_calls: Mutex<Vec<String>>,
    create_branch_calls: Mutex<Vec<String>>,
    update_branch_calls: Mutex<Vec<UpdateBranchCall>>,
    delete_branch_calls: Mutex<Vec<String>>,
    put_file_calls: Mutex<Vec<PutFileCall>>,
    deleted_comments: Mutex<Vec<u64>>,
    // Error injection
    fail_put_paths: Mutex<HashSet<String>>,
    fail_update_branches: Mutex<HashSet<String>>,
    fail_collaborator_users: Mutex<HashSet<String>>,
    fail_get_file: Mutex<bool>,
    fail_get_pr_remaining: AtomicU64,
    fail_list_files: Mutex<bool>,
    fail_delete_branch: Mutex<bool>,
}

impl FakePlatform {
    /// A fake with PR #7 by `alice` from `feature` (at `head-sha`) into
    /// `main` (at `base-sha`), and empty commits for both tips and the
    /// merge base.
    pub fn new() -> Self {
        let pr = PullRequestInfo {
            number: PR_NUMBER,
            author: AUTHOR.to_string(),
            mergeable: Some(false),
            base: BranchRef {
                ref_name: "main".into(),
                sha: BASE_SHA.into(),
            },
            head: BranchRef {
                ref_name: "feature".into(),
                sha: HEAD_SHA.into(),
            },
        };
        let mut commits = HashMap::new();
        commits.insert(BASE_SHA.to_string(), Tree::new());
        commits.insert(HEAD_SHA.to_string(), Tree::new());
        commits.insert(MERGE_BASE_SHA.to_string(), Tree::new());
        let mut branches = HashMap::new();
        branches.insert("main".to_string(), BASE_SHA.to_string());
        branches.insert("feature".to_string(), HEAD_SHA.to_string());

        Self {
            pr: Mutex::new(pr),
            files: Mutex::new(Vec::new()),
            merge_base: Mutex::new(MERGE_BASE_SHA.to_string()),
            commits: Mutex::new(commits),
            branches: Mutex::new(branches),
            comments: Mutex::new(Vec::new()),
            collaborators: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1000),
            comment_gate: Mutex::new(None),
            get_pr_calls: AtomicU64::new(0),
            get_file_calls: Mutex::new(Vec::new()),
            collaborator_calls: Mutex::new(Vec::new()),
            create_branch_calls: Mutex::new(Vec::new()),
            update_branch_calls: Mutex::new(Vec::new()),
            delete_branch_calls: Mutex::new(Vec::new()),
            put_file_calls: Mutex::new(Vec::new()),
            deleted_comments: Mutex::new(Vec::new()),
            fail_put_paths: Mutex::new(HashSet::new()),
            fail_update_branches: Mutex::new(HashSet::new()),
            fail_collaborator_users: Mutex::new(HashSet::new()),
            fail_get_file: Mutex::new(false),
            fail_get_pr_remaining: AtomicU64::new(0),
            fail_list_files: Mutex::new(false),
            fail_delete_branch: Mutex::new(false),
        }
    }

    // === Setup ===

    pub fn set_mergeable(&self, mergeable: Option<bool>) {
        self.pr.lock().unwrap().mergeable = mergeable;
    }

    /// Set the file content at the merge base, base tip and head tip. `None`
    /// means the file is absent at that commit.
    pub fn set_file(&self, path: &str, base: Option<&str>, ours: Option<&str>, theirs: Option<&str>) {
        let mut commits = self.commits.lock().unwrap();
        for (sha, content) in [(MERGE_BASE_SHA, base), (HEAD_SHA, ours), (BASE_SHA, theirs)] {
            let tree = commits.entry(sha.to_string()).or_default();
            match content {
                Some(c) => {
                    tree.insert(path.to_string(), c.as_bytes().to_vec());
                }
                None => {
                    tree.remove(path);
                }
            }
        }
    }

    /// Add a changed file to the pull request listing.
    pub fn add_pr_file(&self, path: &str, status: ChangeStatus) {
        self.files
            .lock()
            .unwrap()
            .push(ConflictCandidate::new(path, status));
    }

    pub fn add_comment(&self, user: &str, body: &str, created_at: DateTime<Utc>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.comments.lock().unwrap().push(IssueComment {
            id,
            body: body.to_string(),
            user: user.to_string(),
            created_at,
        });
        id
    }

    pub fn add_collaborator(&self, user: &str) {
        self.collaborators.lock().unwrap().insert(user.to_string());
    }

    pub fn create_stale_branch(&self, name: &str, sha: &str) {
        self.branches
            .lock()
            .unwrap()
            .insert(name.to_string(), sha.to_string());
    }

    /// Make `list_issue_comments` wait until the returned gate is
    /// notified.
    pub fn gate_comments(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.comment_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    // === Error injection ===

    pub fn fail_put_file(&self, path: &str) {
        self.fail_put_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_update_branch(&self, branch: &str) {
        self.fail_update_branches
            .lock()
            .unwrap()
            .insert(branch.to_string());
    }

    pub fn fail_collaborator_lookup(&self, user: &str) {
        self.fail_collaborator_users
            .lock()
            .unwrap()
            .insert(user.to_string());
    }

    /// Fail the next `times` pull request reads with a 502.
    pub fn fail_get_pull_request(&self, times: u64) {
        self.fail_get_pr_remaining.store(times, Ordering::SeqCst);
    }

    pub fn fail_get_file(&self) {
        *self.fail_get_file.lock().unwrap() = true;
    }

    pub fn fail_list_files(&self) {
        *self.fail_list_files.lock().unwrap() = true;
    }

    pub fn fail_delete_branch(&self) {
        *self.fail_delete_branch.lock().unwrap() = true;
    }

    // === Inspection ===

    pub fn branch_exists(&self, name: &str) -> bool {
        self.branches.lock().unwrap().contains_key(name)
    }

    pub fn branch_tip(&self, name: &str) -> Option<String> {
        self.branches.lock().unwrap().get(name).cloned()
    }

    /// File content at a branch or commit.
    pub fn content_at(&self, git_ref: &str, path: &str) -> Option<String> {
        let tree = self.tree(git_ref)?;
        tree.get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn comments(&self) -> Vec<IssueComment> {
        self.comments.lock().unwrap().clone()
    }

    pub fn comment_bodies(&self) -> Vec<String> {
        self.comments().into_iter().map(|c| c.body).collect()
    }

    pub fn get_pr_calls(&self) -> u64 {
        self.get_pr_calls.load(Ordering::SeqCst)
    }

    pub fn get_file_calls(&self) -> Vec<(String, String)> {
        self.get_file_calls.lock().unwrap().clone()
    }

    pub fn collaborator_calls(&self) -> Vec<String> {
        self.collaborator_calls.lock().unwrap().clone()
    }

    pub fn create_branch_calls(&self) -> Vec<String> {
        self.create_branch_calls.lock().unwrap().clone()
    }

    pub fn update_branch_calls(&self) -> Vec<UpdateBranchCall> {
        self.update_branch_calls.lock().unwrap().clone()
    }

    pub fn delete_branch_calls(&self) -> Vec<String> {
        self.delete_branch_calls.lock().unwrap().clone()
    }

    pub fn put_file_calls(&self) -> Vec<PutFileCall> {
        self.put_file_calls.lock().unwrap().clone()
    }

    pub fn deleted_comments(&self) -> Vec<u64> {
        self.deleted_comments.lock().unwrap().clone()
    }

    // === Internals ===

    fn tree(&self, git_ref: &str) -> Option<Tree> {
        let sha = self
            .branches
            .lock()
            .unwrap()
            .get(git_ref)
            .cloned()
            .unwrap_or_else(|| git_ref.to_string());
        self.commits.lock().unwrap().get(&sha).cloned()
    }

    /// Commit `change` on top of `branch`, returning the new commit sha.
    fn commit_on(
        &self,
        branch: &str,
        path: &str,
        current_sha: Option<&str>,
        change: Option<&[u8]>,
    ) -> Result<String, GitHubError> {
        let tip = self
            .branch_tip(branch)
            .ok_or_else(|| GitHubError::NotFound(format!("branch {branch}")))?;
        let mut tree = self
            .commits
            .lock()
            .unwrap()
            .get(&tip)
            .cloned()
            .unwrap_or_default();

        let existing = tree.get(path).map(|b| blob_sha(b));
        if existing.as_deref() != current_sha {
            return Err(GitHubError::Conflict(format!(
                "{path} does not match {current_sha:?}"
            )));
        }
        match change {
            Some(bytes) => {
                tree.insert(path.to_string(), bytes.to_vec());
            }
            None => {
                tree.remove(path);
            }
        }

        let sha = format!("commit-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.commits.lock().unwrap().insert(sha.clone(), tree);
        self.branches
            .lock()
            .unwrap()
            .insert(branch.to_string(), sha.clone());
        Ok(sha)
    }
}

#[async_trait]
impl HostingPlatform for FakePlatform {
    async fn get_pull_request(
        &self,
        _repo: &str,
        pr_number: u64,
    ) -> Result<PullRequestInfo, GitHubError> {
        self.get_pr_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_get_pr_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GitHubError::ApiError {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        let pr = self.pr.lock().unwrap().clone();
        if pr.number != pr_number {
            return Err(GitHubError::NotFound(format!("pull request {pr_number}")));
        }
        Ok(pr)
    }

    async fn list_pull_request_files(
        &self,
        _repo: &str,
        _pr_number: u64,
    ) -> Result<Vec<ConflictCandidate>, GitHubError> {
        if *self.fail_list_files.lock().unwrap() {
            return Err(GitHubError::ApiError {
                status: 500,
                body: "injected".into(),
            });
        }
        Ok(self.files.lock().unwrap().clone())
    }

    async fn compare_commits(
        &self,
        _repo: &str,
        _base: &str,
        _head: &str,
    ) -> Result<String, GitHubError> {
        Ok(self.merge_base.lock().unwrap().clone())
    }

    async fn get_file(
        &self,
        _repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<RemoteFile>, GitHubError> {
        self.get_file_calls
            .lock()
            .unwrap()
            .push((path.to_string(), git_ref.to_string()));
        if *self.fail_get_file.lock().unwrap() {
            return Err(GitHubError::ApiError {
                status: 502,
                body: "injected".into(),
            });
        }
        let tree = self
            .tree(git_ref)
            .ok_or_else(|| GitHubError::NotFound(format!("ref {git_ref}")))?;
        Ok(tree.get(path).map(|bytes| RemoteFile {
            sha: blob_sha(bytes),
            bytes: bytes.clone(),
        }))
    }

    async fn get_commit(&self, _repo: &str, sha: &str) -> Result<CommitInfo, GitHubError> {
        Ok(CommitInfo {
            sha: sha.to_string(),
            message: format!("commit {sha}"),
            author: AUTHOR.to_string(),
            date: None,
        })
    }

    async fn create_branch(&self, _repo: &str, branch: &str, sha: &str) -> Result<(), GitHubError> {
        self.create_branch_calls
            .lock()
            .unwrap()
            .push(branch.to_string());
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(branch) {
            return Err(GitHubError::Conflict("Reference already exists".into()));
        }
        branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn update_branch(
        &self,
        _repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<(), GitHubError> {
        self.update_branch_calls.lock().unwrap().push(UpdateBranchCall {
            branch: branch.to_string(),
            sha: sha.to_string(),
            force,
        });
        if self.fail_update_branches.lock().unwrap().contains(branch) {
            return Err(GitHubError::ApiError {
                status: 422,
                body: "protected branch".into(),
            });
        }
        let mut branches = self.branches.lock().unwrap();
        if !branches.contains_key(branch) {
            return Err(GitHubError::NotFound(format!("branch {branch}")));
        }
        branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn delete_branch(&self, _repo: &str, branch: &str) -> Result<(), GitHubError> {
        self.delete_branch_calls
            .lock()
            .unwrap()
            .push(branch.to_string());
        if *self.fail_delete_branch.lock().unwrap() {
            return Err(GitHubError::ApiError {
                status: 500,
                body: "injected".into(),
            });
        }
        self.branches
            .lock()
            .unwrap()
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| GitHubError::NotFound(format!("branch {branch}")))
    }

    async fn put_file(
        &self,
        _repo: &str,
        path: &str,
        branch: &str,
        bytes: &[u8],
        _message: &str,
        current_sha: Option<&str>,
    ) -> Result<String, GitHubError> {
        self.put_file_calls.lock().unwrap().push(PutFileCall {
            path: path.to_string(),
            branch: branch.to_string(),
            content: String::from_utf8_lossy(bytes).into_owned(),
            current_sha: current_sha.map(str::to_string),
        });
        if self.fail_put_paths.lock().unwrap().contains(path) {
            return Err(GitHubError::ApiError {
                status: 500,
                body: format!("injected failure writing {path}"),
            });
        }
        self.commit_on(branch, path, current_sha, Some(bytes))
    }

    async fn delete_file(
        &self,
        _repo: &str,
        path: &str,
        branch: &str,
        _message: &str,
        current_sha: &str,
    ) -> Result<String, GitHubError> {
        self.commit_on(branch, path, Some(current_sha), None)
    }

    async fn list_issue_comments(
        &self,
        _repo: &str,
        _pr_number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError> {
        let gate = self.comment_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.comments())
    }

    async fn create_issue_comment(
        &self,
        _repo: &str,
        _pr_number: u64,
        body: &str,
    ) -> Result<u64, GitHubError> {
        Ok(self.add_comment("conflictbot[bot]", body, Utc::now()))
    }

    async fn delete_issue_comment(&self, _repo: &str, comment_id: u64) -> Result<(), GitHubError> {
        self.deleted_comments.lock().unwrap().push(comment_id);
        self.comments.lock().unwrap().retain(|c| c.id != comment_id);
        Ok(())
    }

    async fn is_collaborator(&self, _repo: &str, user: &str) -> Result<bool, GitHubError> {
        self.collaborator_calls
            .lock()
            .unwrap()
            .push(user.to_string());
        if self.fail_collaborator_users.lock().unwrap().contains(user) {
            return Err(GitHubError::ApiError {
                status: 502,
                body: "injected".into(),
            });
        }
        Ok(self.collaborators.lock().unwrap().contains(user))
    }
}
