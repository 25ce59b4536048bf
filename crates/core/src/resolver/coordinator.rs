//! Gathers three-way content for conflicting files and asks the oracle to
//! resolve each one.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conflict::ConflictSource;
use crate::content::ContentFetcher;
use crate::errors::CoreError;
use crate::imports::extract_imports;
use crate::models::{ConflictRecord, NewResolution};

use super::oracle::{ResolveRequest, ResolverOracle};

/// A resolution proposed by the oracle, with the content it was built from.
#[derive(Debug, Clone)]
pub struct ProposedResolution {
    pub filename: String,
    pub resolved_code: String,
    pub record: ConflictRecord,
}

impl ProposedResolution {
    /// Persistable form, archiving the three input versions.
    pub fn to_new_resolution(&self, repo: &str, pr_number: u64) -> NewResolution {
        NewResolution {
            repo: repo.to_string(),
            pr_number,
            filename: self.filename.clone(),
            resolved_code: self.resolved_code.clone(),
            base_content: self.record.base.content.clone(),
            ours_content: self.record.ours.content.clone(),
            theirs_content: self.record.theirs.content.clone(),
        }
    }
}

/// Drives detection, content gathering and oracle calls for one PR.
pub struct ResolutionCoordinator {
    detector: Arc<dyn ConflictSource>,
    fetcher: ContentFetcher,
    oracle: Arc<dyn ResolverOracle>,
}

impl ResolutionCoordinator {
    pub fn new(
        detector: Arc<dyn ConflictSource>,
        fetcher: ContentFetcher,
        oracle: Arc<dyn ResolverOracle>,
    ) -> Self {
        Self {
            detector,
            fetcher,
            oracle,
        }
    }

    /// Propose resolutions for every conflicting file of a pull request.
    ///
    /// Returns `None` when nothing conflicts, without touching the
    /// platform or the oracle, and when no file could be resolved. Files
    /// whose content cannot be fetched, that are binary on any side, or that
    /// the oracle declines are skipped.
    pub async fn resolve(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<Vec<ProposedResolution>>, CoreError> {
        let report = self.detector.conflicts(repo, pr_number).await?;
        if report.files.is_empty() {
            info!(repo, pr_number, "no conflicts to resolve");
            return Ok(None);
        }

        let platform = self.fetcher.platform();
        let pr = platform.get_pull_request(repo, pr_number).await?;
        let merge_base = platform
            .compare_commits(repo, &pr.base.sha, &pr.head.sha)
            .await?;
        info!(
            repo,
            pr_number,
            files = report.files.len(),
            strategy = %report.strategy,
            merge_base = %merge_base,
            "resolving conflicts"
        );

        let mut proposals = Vec::new();
        for filename in &report.files {
            if self.fetcher.classifier().is_denylisted(filename) {
                debug!(filename = %filename, "binary file, not sent to resolver");
                continue;
            }

            let (base, ours, theirs) = tokio::join!(
                self.fetcher
                    .fetch_version(repo, filename, &merge_base, &pr.base.ref_name),
                self.fetcher
                    .fetch_version(repo, filename, &pr.head.sha, &pr.head.ref_name),
                self.fetcher
                    .fetch_version(repo, filename, &pr.base.sha, &pr.base.ref_name),
            );
            let (base, ours, theirs) = match (base, ours, theirs) {
                (Ok(b), Ok(o), Ok(t)) => (b, o, t),
                (b, o, t) => {
                    let error = [b.err(), o.err(), t.err()]
                        .into_iter()
                        .flatten()
                        .map(|e| e.to_string())
                        .next()
                        .unwrap_or_default();
                    warn!(filename = %filename, %error, "failed to fetch content, skipping");
                    continue;
                }
            };
            if base.is_binary() || ours.is_binary() || theirs.is_binary() {
                debug!(filename = %filename, "binary content, not sent to resolver");
                continue;
            }

            let request = ResolveRequest {
                filename: filename.clone(),
                base: base.text().to_string(),
                ours: ours.text().to_string(),
                theirs: theirs.text().to_string(),
                base_sha: base.revision.clone(),
                ours_sha: ours.revision.clone(),
                theirs_sha: theirs.revision.clone(),
                imports: extract_imports(filename, ours.text()),
            };

            match self.oracle.resolve(&request).await {
                Ok(resolved_code) => {
                    debug!(filename = %filename, "resolution proposed");
                    proposals.push(ProposedResolution {
                        filename: filename.clone(),
                        resolved_code,
                        record: ConflictRecord {
                            filename: filename.clone(),
                            base,
                            ours,
                            theirs,
                            strategy: report.strategy,
                        },
                    });
                }
                Err(e) => {
                    warn!(filename = %filename, error = %e, "resolver failed, skipping file");
                }
            }
        }

        info!(
            repo,
            pr_number,
            proposed = proposals.len(),
            "resolution round complete"
        );
        Ok((!proposals.is_empty()).then_some(proposals))
    }
}
