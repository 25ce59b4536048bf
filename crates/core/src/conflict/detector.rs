//! Conflict detection for pull requests.
//!
//! The detector asks the platform whether a pull request is mergeable, then
//! runs an ordered list of [`DetectionStrategy`] implementations against
//! its modified files. The first strategy that can run decides; when none
//! can, every modified file is reported.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DetectionConfig};
use crate::content::{ContentFetcher, FileClassifier};
use crate::errors::DetectionError;
use crate::models::StrategyKind;
use crate::platform::{HostingPlatform, PullRequestInfo};

use super::content::ContentDiffStrategy;
use super::native::NativeMergeStrategy;

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// Inputs shared by every detection strategy.
#[derive(Debug, Clone)]
pub struct DetectionContext<'a> {
    pub repo: &'a str,
    pub pull_request: &'a PullRequestInfo,
    /// Modified files in platform listing order.
    pub modified: &'a [String],
}

/// One way of deciding which modified files conflict.
///
/// Returning `Err` means the strategy could not run; the detector moves on
/// to the next one.
#[async_trait]
pub trait DetectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn find_conflicts(&self, ctx: &DetectionContext<'_>)
        -> Result<Vec<String>, DetectionError>;
}

/// Anything that can report the conflicting files of a pull request.
#[async_trait]
pub trait ConflictSource: Send + Sync {
    async fn conflicts(&self, repo: &str, pr_number: u64)
        -> Result<DetectionReport, DetectionError>;
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Conflicting files plus the strategy that found them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    pub files: Vec<String>,
    pub strategy: StrategyKind,
}

/// Finds the genuinely conflicting modified files of a pull request.
pub struct ConflictDetector {
    platform: Arc<dyn HostingPlatform>,
    strategies: Vec<Box<dyn DetectionStrategy>>,
    mergeable_retries: u32,
    mergeable_retry_delay: Duration,
}

impl ConflictDetector {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        strategies: Vec<Box<dyn DetectionStrategy>>,
        detection: &DetectionConfig,
    ) -> Self {
        Self {
            platform,
            strategies,
            mergeable_retries: detection.mergeable_retries,
            mergeable_retry_delay: Duration::from_millis(detection.mergeable_retry_delay_ms),
        }
    }

    /// Build the standard strategy chain: native merge (when enabled)
    /// followed by the content diff.
    pub fn from_config(platform: Arc<dyn HostingPlatform>, config: &AppConfig) -> Self {
        let fetcher = ContentFetcher::new(
            platform.clone(),
            FileClassifier::new(config.detection.binary_patterns.clone()),
        );
        let mut strategies: Vec<Box<dyn DetectionStrategy>> = Vec::new();
        if config.detection.native_merge {
            strategies.push(Box::new(NativeMergeStrategy::new(
                config.github.clone(),
                Duration::from_secs(config.detection.git_timeout_secs),
            )));
        }
        strategies.push(Box::new(ContentDiffStrategy::new(fetcher)));
        Self::new(platform, strategies, &config.detection)
    }

    /// Poll the pull request until the platform has computed mergeability
    /// or the retry budget runs out.
    ///
    /// Failed reads count as attempts and are retried with the same delay;
    /// the last error is returned once the budget is spent.
    pub async fn poll_mergeable(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<PullRequestInfo, DetectionError> {
        let attempts = self.mergeable_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= attempts;
            match self.platform.get_pull_request(repo, pr_number).await {
                Ok(pr) if pr.mergeable.is_some() => return Ok(pr),
                Ok(pr) if last => {
                    debug!(repo, pr_number, attempt, "mergeability still unknown");
                    return Ok(pr);
                }
                Ok(_) => {
                    debug!(repo, pr_number, attempt, "mergeability pending, retrying");
                }
                Err(e) if last => return Err(e.into()),
                Err(e) => {
                    warn!(repo, pr_number, attempt, error = %e, "pull request read failed, retrying");
                }
            }
            tokio::time::sleep(self.mergeable_retry_delay).await;
        }
    }

    /// Conflicting modified files, in platform listing order.
    pub async fn detect(&self, repo: &str, pr_number: u64) -> Result<Vec<String>, DetectionError> {
        Ok(self.detect_report(repo, pr_number).await?.files)
    }

    /// Detect conflicting files and report which strategy decided.
    pub async fn detect_report(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<DetectionReport, DetectionError> {
        let pr = self.poll_mergeable(repo, pr_number).await?;
        if pr.mergeable == Some(true) {
            info!(repo, pr_number, "pull request is mergeable, no conflicts");
            return Ok(DetectionReport {
                files: Vec::new(),
                strategy: StrategyKind::Mergeable,
            });
        }

        let modified: Vec<String> = self
            .platform
            .list_pull_request_files(repo, pr_number)
            .await?
            .into_iter()
            .filter(|f| f.is_modified())
            .map(|f| f.filename)
            .collect();
        debug!(repo, pr_number, modified = modified.len(), "listed modified files");

        let ctx = DetectionContext {
            repo,
            pull_request: &pr,
            modified: &modified,
        };

        for strategy in &self.strategies {
            match strategy.find_conflicts(&ctx).await {
                Ok(found) => {
                    let files = normalize(&found, &modified);
                    info!(
                        repo,
                        pr_number,
                        strategy = %strategy.kind(),
                        conflicts = files.len(),
                        "conflict detection complete"
                    );
                    return Ok(DetectionReport {
                        files,
                        strategy: strategy.kind(),
                    });
                }
                Err(e) => {
                    warn!(repo, pr_number, strategy = %strategy.kind(), error = %e, "strategy failed, trying next");
                }
            }
        }

        warn!(
            repo,
            pr_number,
            files = modified.len(),
            "all detection strategies failed, flagging every modified file"
        );
        Ok(DetectionReport {
            files: normalize(&modified, &modified),
            strategy: StrategyKind::FailSafe,
        })
    }
}

#[async_trait]
impl ConflictSource for ConflictDetector {
    async fn conflicts(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<DetectionReport, DetectionError> {
        self.detect_report(repo, pr_number).await
    }
}

/// Restrict `found` to the modified set, in listing order, without
/// duplicates.
fn normalize(found: &[String], modified: &[String]) -> Vec<String> {
    let found: HashSet<&str> = found.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    modified
        .iter()
        .filter(|f| found.contains(f.as_str()) && seen.insert(f.as_str()))
        .cloned()
        .collect()
}
