//! Per-pull-request workflow.
//!
//! [`PullRequestWorkflow`] ties detection, resolution, command handling and
//! apply together for one `(repo, pr)` at a time:
//!
//! 1. [`propose`](PullRequestWorkflow::propose) resolves conflicts, stores
//!    the proposals and tells the author how to apply them.
//! 2. [`process_commands`](PullRequestWorkflow::process_commands) looks for
//!    an authorized command, applies the confirmed resolutions and advances
//!    the command watermark once something landed.
//!
//! Runs for the same pull request are serialized by a lease row in the
//! store, so a one-shot `apply` and a running `watch` exclude each other
//! even across processes. The lease is released by a drop guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::apply::ApplyCoordinator;
use crate::command::CommandInterpreter;
use crate::config::AppConfig;
use crate::conflict::ConflictDetector;
use crate::content::{ContentFetcher, FileClassifier};
use crate::errors::{CoreError, WorkflowError};
use crate::models::{AuditEntry, ApplyCommand, CommandCheck, PROPOSAL_MARKER};
use crate::platform::{CommitInfo, HostingPlatform};
use crate::resolver::{ProposedResolution, ResolutionCoordinator, ResolverOracle};
use crate::store::ResolutionStore;

/// Age after which a lease left by a crashed run may be taken over.
fn lease_ttl() -> Duration {
    Duration::minutes(30)
}

/// Result of one command-processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No new authorized command.
    NoCommand,
    /// The command was applied and the watermark advanced to it.
    Applied(ApplyCommand),
    /// The apply run failed. The watermark stays put.
    ApplyFailed(ApplyCommand),
    /// The command arrived with nothing pending. The watermark stays put.
    NothingToApply(ApplyCommand),
    /// This command already ran without landing anything; it is held back
    /// until a newer command or a new proposal arrives.
    Deferred(ApplyCommand),
}

type PrKey = (String, u64);

/// Releases a pull request's run lease when dropped.
struct LeaseGuard<'a> {
    store: &'a dyn ResolutionStore,
    repo: String,
    pr_number: u64,
    owner: &'a str,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .store
            .release_lease(&self.repo, self.pr_number, self.owner)
        {
            warn!(repo = %self.repo, pr_number = self.pr_number, error = %e, "failed to release lease");
        }
    }
}

/// Orchestrates proposal and command handling for pull requests.
pub struct PullRequestWorkflow {
    platform: Arc<dyn HostingPlatform>,
    store: Arc<dyn ResolutionStore>,
    resolver: ResolutionCoordinator,
    interpreter: CommandInterpreter,
    applier: ApplyCoordinator,
    fetcher: ContentFetcher,
    phrase: String,
    /// Lease owner id of this workflow instance.
    owner: String,
    /// Last command per pull request whose run landed nothing.
    attempted: Mutex<HashMap<PrKey, u64>>,
}

impl PullRequestWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        store: Arc<dyn ResolutionStore>,
        resolver: ResolutionCoordinator,
        interpreter: CommandInterpreter,
        applier: ApplyCoordinator,
        fetcher: ContentFetcher,
        phrase: impl Into<String>,
    ) -> Self {
        let owner = format!(
            "{}@{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        Self {
            platform,
            store,
            resolver,
            interpreter,
            applier,
            fetcher,
            phrase: phrase.into(),
            owner,
            attempted: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up every component from configuration.
    pub fn from_config(
        platform: Arc<dyn HostingPlatform>,
        store: Arc<dyn ResolutionStore>,
        oracle: Arc<dyn ResolverOracle>,
        config: &AppConfig,
    ) -> Result<Self, CoreError> {
        let fetcher = ContentFetcher::new(
            platform.clone(),
            FileClassifier::new(config.detection.binary_patterns.clone()),
        );
        let detector = Arc::new(ConflictDetector::from_config(platform.clone(), config));
        let resolver = ResolutionCoordinator::new(detector, fetcher.clone(), oracle);
        let interpreter = CommandInterpreter::new(platform.clone(), store.clone(), &config.command)?;
        let applier = ApplyCoordinator::new(platform.clone(), store.clone(), config.apply.clone());
        Ok(Self::new(
            platform,
            store,
            resolver,
            interpreter,
            applier,
            fetcher,
            config.command.phrase.clone(),
        ))
    }

    pub fn resolver(&self) -> &ResolutionCoordinator {
        &self.resolver
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// Whether any process holds the run lease of the pull request.
    pub fn is_running(&self, repo: &str, pr_number: u64) -> bool {
        match self.store.lease_holder(repo, pr_number) {
            Ok(holder) => holder.is_some(),
            Err(e) => {
                warn!(repo, pr_number, error = %e, "could not read lease");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Propose
    // -----------------------------------------------------------------------

    /// Resolve the pull request's conflicts, store the proposals and post a
    /// comment listing them. Earlier proposal comments are removed. Returns
    /// how many resolutions were proposed.
    pub async fn propose(&self, repo: &str, pr_number: u64) -> Result<usize, CoreError> {
        let proposals = match self.resolver.resolve(repo, pr_number).await {
            Ok(Some(proposals)) => proposals,
            Ok(None) => {
                info!(repo, pr_number, "nothing to propose");
                self.audit(AuditEntry::success("propose", repo, pr_number, "no resolutions"));
                return Ok(0);
            }
            Err(e) => {
                self.audit(AuditEntry::failure("propose", repo, pr_number, &e.to_string()));
                return Err(e);
            }
        };

        for proposal in &proposals {
            self.store
                .save_resolution(&proposal.to_new_resolution(repo, pr_number))?;
        }
        self.attempts().remove(&(repo.to_string(), pr_number));

        let head = match proposals.first() {
            Some(p) => self.head_commit(repo, &p.record.ours.revision).await,
            None => None,
        };

        self.remove_stale_proposals(repo, pr_number).await;
        let body = proposal_comment(&proposals, head.as_ref(), &self.phrase);
        self.platform
            .create_issue_comment(repo, pr_number, &body)
            .await?;

        let files: Vec<&str> = proposals.iter().map(|p| p.filename.as_str()).collect();
        info!(repo, pr_number, count = proposals.len(), "resolutions proposed");
        self.audit(AuditEntry::success(
            "propose",
            repo,
            pr_number,
            &files.join(", "),
        ));
        Ok(proposals.len())
    }

    async fn head_commit(&self, repo: &str, sha: &str) -> Option<CommitInfo> {
        match self.fetcher.commit_metadata(repo, sha).await {
            Ok(commit) => Some(commit),
            Err(e) => {
                debug!(repo, sha, error = %e, "head commit metadata unavailable");
                None
            }
        }
    }

    async fn remove_stale_proposals(&self, repo: &str, pr_number: u64) {
        let comments = match self.platform.list_issue_comments(repo, pr_number).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!(repo, pr_number, error = %e, "could not list comments for cleanup");
                return;
            }
        };
        for comment in comments.iter().filter(|c| c.body.contains(PROPOSAL_MARKER)) {
            if let Err(e) = self.platform.delete_issue_comment(repo, comment.id).await {
                warn!(repo, comment_id = comment.id, error = %e, "failed to delete old proposal");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Check for an apply-all command and run it.
    ///
    /// The watermark advances only when at least one resolution landed.
    /// A command whose run landed nothing is not run again until a newer
    /// command or a new proposal arrives. Fails with
    /// [`WorkflowError::AlreadyRunning`] when another run holds the pull
    /// request's lease.
    pub async fn process_commands(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<CycleOutcome, CoreError> {
        let _lease = self.lease(repo, pr_number)?;

        let command = match self.interpreter.check_command(repo, pr_number).await? {
            CommandCheck::Idle => return Ok(CycleOutcome::NoCommand),
            CommandCheck::ApplyAll(command) => command,
        };

        let key = (repo.to_string(), pr_number);
        if self.attempts().get(&key) == Some(&command.comment_id) {
            debug!(repo, pr_number, comment_id = command.comment_id, "command already attempted");
            return Ok(CycleOutcome::Deferred(command));
        }

        let applied = match self.applier.apply_all(repo, pr_number).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(repo, pr_number, error = %e, "apply-all aborted");
                self.attempts().insert(key, command.comment_id);
                self.audit(AuditEntry::failure("apply_all", repo, pr_number, &e.to_string()));
                return Err(e.into());
            }
        };

        if applied {
            self.attempts().remove(&key);
            self.store
                .set_watermark(repo, pr_number, command.created_at)?;
            self.audit(AuditEntry::success(
                "apply_all",
                repo,
                pr_number,
                &format!("command {} by {}", command.comment_id, command.user),
            ));
            return Ok(CycleOutcome::Applied(command));
        }

        self.attempts().insert(key, command.comment_id);
        let pending = self
            .store
            .list_resolutions(repo, pr_number)?
            .iter()
            .any(|r| r.is_pending());
        if pending {
            self.audit(AuditEntry::failure(
                "apply_all",
                repo,
                pr_number,
                &format!("command {} by {} failed", command.comment_id, command.user),
            ));
            Ok(CycleOutcome::ApplyFailed(command))
        } else {
            self.audit(AuditEntry::success(
                "apply_all",
                repo,
                pr_number,
                "nothing pending",
            ));
            Ok(CycleOutcome::NothingToApply(command))
        }
    }

    /// Apply confirmed resolutions without looking for a command, under the
    /// pull request's lease. The watermark is not touched.
    pub async fn apply(&self, repo: &str, pr_number: u64) -> Result<bool, CoreError> {
        let _lease = self.lease(repo, pr_number)?;
        match self.applier.apply_all(repo, pr_number).await {
            Ok(applied) => {
                let entry = if applied {
                    AuditEntry::success("apply", repo, pr_number, "manual run")
                } else {
                    AuditEntry::failure("apply", repo, pr_number, "manual run applied nothing")
                };
                self.audit(entry);
                Ok(applied)
            }
            Err(e) => {
                self.audit(AuditEntry::failure("apply", repo, pr_number, &e.to_string()));
                Err(e.into())
            }
        }
    }

    fn attempts(&self) -> MutexGuard<'_, HashMap<PrKey, u64>> {
        self.attempted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lease(&self, repo: &str, pr_number: u64) -> Result<LeaseGuard<'_>, CoreError> {
        let acquired =
            self.store
                .try_acquire_lease(repo, pr_number, &self.owner, Utc::now(), lease_ttl())?;
        if !acquired {
            return Err(WorkflowError::AlreadyRunning {
                repo: repo.to_string(),
                pr_number,
            }
            .into());
        }
        Ok(LeaseGuard {
            store: self.store.as_ref(),
            repo: repo.to_string(),
            pr_number,
            owner: &self.owner,
        })
    }

    fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.record_audit(&entry) {
            warn!(action = %entry.action, error = %e, "failed to write audit entry");
        }
    }
}

/// Markdown body of a proposal comment.
fn proposal_comment(
    proposals: &[ProposedResolution],
    head: Option<&CommitInfo>,
    phrase: &str,
) -> String {
    let mut body = String::from("### Proposed conflict resolutions\n\n");
    let count = proposals.len();
    body.push_str(&format!(
        "Resolutions were prepared for {count} conflicting file{}",
        if count == 1 { "" } else { "s" }
    ));
    if let Some(commit) = head {
        let short = &commit.sha[..commit.sha.len().min(7)];
        let subject = commit.message.lines().next().unwrap_or_default();
        body.push_str(&format!(" at `{short}` ({subject})"));
    }
    body.push_str(":\n\n");
    for p in proposals {
        body.push_str(&format!("- `{}`\n", p.filename));
    }
    body.push_str(&format!(
        "\nReply with `{phrase}` to apply every proposed resolution to this branch.\n\n{PROPOSAL_MARKER}"
    ));
    body
}
