//! Async driver for the apply-all state machine.
//!
//! The driver owns every side effect: branch mutations, file writes,
//! store updates and the closing comment. Results are fed back into
//! [`transition`] until the run reaches [`ApplyState::CleanedUp`].

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ApplyConfig;
use crate::errors::{ApplyError, GitHubError};
use crate::models::{ChangeStatus, Resolution, APPLY_MARKER};
use crate::platform::{HostingPlatform, PullRequestInfo};
use crate::store::ResolutionStore;

use super::machine::{transition, ApplyEffect, ApplyEvent, ApplyNotice, ApplyState};

/// Mutable context of one apply run.
struct ApplyRun {
    repo: String,
    pr_number: u64,
    branch: String,
    pr: Option<PullRequestInfo>,
    pending: Vec<Resolution>,
    /// Latest commit on the ephemeral branch.
    tip: Option<String>,
}

impl ApplyRun {
    fn pr(&self) -> Result<&PullRequestInfo, ApplyError> {
        self.pr.as_ref().ok_or_else(|| ApplyError::StepFailed {
            step: "load pull request".into(),
            detail: "pull request was not loaded".into(),
        })
    }
}

/// Applies confirmed resolutions onto a pull request through an ephemeral
/// branch.
pub struct ApplyCoordinator {
    platform: Arc<dyn HostingPlatform>,
    store: Arc<dyn ResolutionStore>,
    config: ApplyConfig,
}

impl ApplyCoordinator {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        store: Arc<dyn ResolutionStore>,
        config: ApplyConfig,
    ) -> Self {
        Self {
            platform,
            store,
            config,
        }
    }

    /// Apply every confirmed, unapplied resolution of a pull request.
    ///
    /// Returns `Ok(true)` when at least one resolution landed on the pull
    /// request branch. Failures during the run are reported on the pull
    /// request and yield `Ok(false)`. Whenever branch creation was
    /// attempted, the ephemeral branch is deleted before returning.
    pub async fn apply_all(&self, repo: &str, pr_number: u64) -> Result<bool, ApplyError> {
        let pending: Vec<Resolution> = self
            .store
            .list_resolutions(repo, pr_number)?
            .into_iter()
            .filter(Resolution::is_pending)
            .collect();

        info!(repo, pr_number, pending = pending.len(), "starting apply-all");

        let mut run = ApplyRun {
            repo: repo.to_string(),
            pr_number,
            branch: self.config.branch_name(pr_number),
            pr: None,
            tip: None,
            pending,
        };

        let mut state = ApplyState::Init;
        let mut next = Some(ApplyEvent::Start {
            pending: run.pending.len(),
        });

        while let Some(event) = next.take() {
            let step = match transition(&state, event) {
                Ok(step) => step,
                Err(e) => {
                    error!(repo, pr_number, state = %state, error = %e, "apply state machine rejected event");
                    self.abandon(&run).await;
                    return Err(e);
                }
            };
            debug!(repo, pr_number, from = %state, to = %step.state, "apply transition");
            state = step.state;

            for effect in step.effects {
                if let Some(event) = self.execute(&mut run, effect).await {
                    next = Some(event);
                }
            }
        }

        match state {
            ApplyState::CleanedUp { success } => {
                info!(repo, pr_number, success, "apply-all finished");
                Ok(success)
            }
            other => {
                self.abandon(&run).await;
                Err(ApplyError::StepFailed {
                    step: "finish".into(),
                    detail: format!("run stopped in state {other}"),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    async fn execute(&self, run: &mut ApplyRun, effect: ApplyEffect) -> Option<ApplyEvent> {
        match effect {
            ApplyEffect::CreateBranch => Some(match self.create_branch(run).await {
                Ok(()) => ApplyEvent::BranchCreated,
                Err(e) => ApplyEvent::Failed {
                    step: "create the apply branch",
                    reason: e.to_string(),
                },
            }),
            ApplyEffect::CopyUnchangedFiles => Some(match self.copy_unchanged_files(run).await {
                Ok(copied) => {
                    debug!(branch = %run.branch, copied, "copied pull request files");
                    ApplyEvent::FilesCopied
                }
                Err(e) => ApplyEvent::Failed {
                    step: "copy pull request files",
                    reason: e.to_string(),
                },
            }),
            ApplyEffect::WriteResolutions => Some(match self.write_resolutions(run).await {
                Ok(applied) => ApplyEvent::ResolutionsWritten {
                    applied,
                    total: run.pending.len(),
                },
                Err(e) => ApplyEvent::Failed {
                    step: "write resolutions",
                    reason: e.to_string(),
                },
            }),
            ApplyEffect::UpdatePullRequestBranch => {
                Some(match self.update_pull_request_branch(run).await {
                    Ok(()) => ApplyEvent::BranchUpdateSucceeded,
                    Err(e) => ApplyEvent::BranchUpdateFailed {
                        reason: e.to_string(),
                    },
                })
            }
            ApplyEffect::ResetApplied => {
                match self.store.mark_all_not_applied(&run.repo, run.pr_number) {
                    Ok(reset) => debug!(repo = %run.repo, pr_number = run.pr_number, reset, "reset applied resolutions"),
                    Err(e) => error!(repo = %run.repo, pr_number = run.pr_number, error = %e, "failed to reset applied resolutions"),
                }
                None
            }
            ApplyEffect::PostComment(notice) => {
                self.post_notice(run, &notice).await;
                None
            }
            ApplyEffect::DeleteBranch => {
                self.delete_branch(run).await;
                Some(ApplyEvent::CleanupFinished)
            }
        }
    }

    async fn create_branch(&self, run: &mut ApplyRun) -> Result<(), ApplyError> {
        let pr = self
            .platform
            .get_pull_request(&run.repo, run.pr_number)
            .await?;
        let base_sha = pr.base.sha.clone();
        run.pr = Some(pr);

        match self
            .platform
            .create_branch(&run.repo, &run.branch, &base_sha)
            .await
        {
            Ok(()) => {}
            Err(GitHubError::Conflict(_)) => {
                warn!(branch = %run.branch, "stale apply branch found, resetting to base");
                self.platform
                    .update_branch(&run.repo, &run.branch, &base_sha, true)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(branch = %run.branch, base = %base_sha, "created apply branch");
        run.tip = Some(base_sha);
        Ok(())
    }

    /// Bring every changed file without a resolution to its head version.
    async fn copy_unchanged_files(&self, run: &mut ApplyRun) -> Result<usize, ApplyError> {
        let head_sha = run.pr()?.head.sha.clone();
        let resolved: HashSet<&str> = run.pending.iter().map(|r| r.filename.as_str()).collect();
        let files = self
            .platform
            .list_pull_request_files(&run.repo, run.pr_number)
            .await?;

        let mut copied = 0;
        for file in files.iter().filter(|f| !resolved.contains(f.filename.as_str())) {
            let current = self
                .platform
                .get_file(&run.repo, &file.filename, &run.branch)
                .await?;

            if file.status == ChangeStatus::Removed {
                if let Some(current) = current {
                    let sha = self
                        .platform
                        .delete_file(
                            &run.repo,
                            &file.filename,
                            &run.branch,
                            &self.config.commit_message,
                            &current.sha,
                        )
                        .await?;
                    run.tip = Some(sha);
                    copied += 1;
                }
                continue;
            }

            let Some(head) = self
                .platform
                .get_file(&run.repo, &file.filename, &head_sha)
                .await?
            else {
                debug!(filename = %file.filename, "file absent at head, skipping");
                continue;
            };
            if current.as_ref().is_some_and(|c| c.sha == head.sha) {
                continue;
            }

            let sha = self
                .platform
                .put_file(
                    &run.repo,
                    &file.filename,
                    &run.branch,
                    &head.bytes,
                    &self.config.commit_message,
                    current.as_ref().map(|c| c.sha.as_str()),
                )
                .await?;
            run.tip = Some(sha);
            copied += 1;
        }
        Ok(copied)
    }

    /// Write each resolution, continuing past failures. Returns how many
    /// were written.
    async fn write_resolutions(&self, run: &mut ApplyRun) -> Result<usize, ApplyError> {
        let mut applied = 0;
        let mut tip = None;
        for resolution in &run.pending {
            let filename = resolution.filename.as_str();
            match self.write_resolution(run, resolution).await {
                Ok(commit_sha) => {
                    if let Err(e) =
                        self.store
                            .mark_applied(&run.repo, run.pr_number, filename, &commit_sha)
                    {
                        warn!(filename, error = %e, "written but not marked applied");
                    }
                    debug!(filename, commit = %commit_sha, "resolution written");
                    tip = Some(commit_sha);
                    applied += 1;
                }
                Err(e) => {
                    warn!(filename, error = %e, "failed to write resolution");
                }
            }
        }
        if tip.is_some() {
            run.tip = tip;
        }
        info!(
            repo = %run.repo,
            pr_number = run.pr_number,
            applied,
            total = run.pending.len(),
            "resolutions written"
        );
        Ok(applied)
    }

    async fn write_resolution(
        &self,
        run: &ApplyRun,
        resolution: &Resolution,
    ) -> Result<String, GitHubError> {
        let current = self
            .platform
            .get_file(&run.repo, &resolution.filename, &run.branch)
            .await?;
        self.platform
            .put_file(
                &run.repo,
                &resolution.filename,
                &run.branch,
                resolution.resolved_code.as_bytes(),
                &self.config.commit_message,
                current.as_ref().map(|c| c.sha.as_str()),
            )
            .await
    }

    async fn update_pull_request_branch(&self, run: &ApplyRun) -> Result<(), ApplyError> {
        let head_ref = run.pr()?.head.ref_name.clone();
        let tip = run.tip.as_deref().ok_or_else(|| ApplyError::StepFailed {
            step: "update the pull request branch".into(),
            detail: "apply branch has no commits".into(),
        })?;
        self.platform
            .update_branch(&run.repo, &head_ref, tip, true)
            .await?;
        info!(head = %head_ref, tip, "pull request branch updated");
        Ok(())
    }

    async fn post_notice(&self, run: &ApplyRun, notice: &ApplyNotice) {
        let body = format!("{}\n\n{APPLY_MARKER}", notice.body());
        if let Err(e) = self
            .platform
            .create_issue_comment(&run.repo, run.pr_number, &body)
            .await
        {
            warn!(repo = %run.repo, pr_number = run.pr_number, error = %e, "failed to post apply comment");
        }
    }

    async fn delete_branch(&self, run: &ApplyRun) {
        match self.platform.delete_branch(&run.repo, &run.branch).await {
            Ok(()) => debug!(branch = %run.branch, "deleted apply branch"),
            Err(GitHubError::NotFound(_)) => {}
            Err(e) => warn!(branch = %run.branch, error = %e, "failed to delete apply branch"),
        }
    }

    /// Best-effort cleanup when the machine cannot continue.
    async fn abandon(&self, run: &ApplyRun) {
        if let Err(e) = self.store.mark_all_not_applied(&run.repo, run.pr_number) {
            error!(error = %e, "failed to reset applied resolutions");
        }
        self.delete_branch(run).await;
    }
}
