//! Conflict detection through a real `git merge` in a scratch clone.

use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::errors::DetectionError;
use crate::git::GitCli;
use crate::models::StrategyKind;

use super::detector::{DetectionContext, DetectionStrategy};

/// Merges the head branch into the base branch locally and reports the
/// unmerged paths.
pub struct NativeMergeStrategy {
    github: GitHubConfig,
    timeout: Duration,
}

impl NativeMergeStrategy {
    pub fn new(github: GitHubConfig, timeout: Duration) -> Self {
        Self { github, timeout }
    }
}

#[async_trait]
impl DetectionStrategy for NativeMergeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeMerge
    }

    async fn find_conflicts(
        &self,
        ctx: &DetectionContext<'_>,
    ) -> Result<Vec<String>, DetectionError> {
        if ctx.modified.is_empty() {
            return Ok(Vec::new());
        }

        // Removed together with its contents when this function returns.
        let scratch = TempDir::new()?;
        let git = GitCli::new(scratch.path(), self.timeout);
        let base = &ctx.pull_request.base.ref_name;
        let head = &ctx.pull_request.head.ref_name;
        let url = self.github.clone_url(ctx.repo);

        git.run(&["init", "--quiet"]).await?;
        git.run(&["remote", "add", "origin", &url]).await?;
        let base_spec = format!("+refs/heads/{base}:refs/remotes/origin/{base}");
        let head_spec = format!("+refs/heads/{head}:refs/remotes/origin/{head}");
        git.run(&["fetch", "--no-tags", "--quiet", "origin", &base_spec, &head_spec])
            .await?;
        git.run(&["checkout", "--quiet", "-b", "base", &format!("origin/{base}")])
            .await?;
        debug!(repo = ctx.repo, base = %base, head = %head, "scratch clone ready");

        let head_ref = format!("origin/{head}");
        if git
            .succeeds(&["merge", "--no-edit", "--no-ff", "--quiet", &head_ref])
            .await?
        {
            info!(repo = ctx.repo, "native merge is clean");
            return Ok(Vec::new());
        }

        let unmerged = git
            .run(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        if let Err(e) = git.run(&["merge", "--abort"]).await {
            warn!(repo = ctx.repo, error = %e, "git merge --abort failed");
        }

        let unmerged: Vec<&str> = unmerged.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if unmerged.is_empty() {
            return Err(DetectionError::Unavailable {
                strategy: StrategyKind::NativeMerge.to_string(),
                detail: "merge failed without unmerged paths".into(),
            });
        }

        let conflicts: Vec<String> = ctx
            .modified
            .iter()
            .filter(|f| unmerged.contains(&f.as_str()))
            .cloned()
            .collect();
        info!(
            repo = ctx.repo,
            unmerged = unmerged.len(),
            conflicts = conflicts.len(),
            "native merge reported conflicts"
        );
        Ok(conflicts)
    }
}
