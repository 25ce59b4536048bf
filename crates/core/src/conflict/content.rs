//! Conflict detection by three-way comparison of fetched file contents.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::content::ContentFetcher;
use crate::errors::DetectionError;
use crate::models::{FileKind, StrategyKind};
use crate::platform::RemoteFile;

use super::detector::{DetectionContext, DetectionStrategy};
use super::json::json_conflicts;
use super::merger::Merger;

/// Compares merge-base, head and base-tip contents file by file.
///
/// Files whose contents cannot be fetched are reported as conflicting.
pub struct ContentDiffStrategy {
    fetcher: ContentFetcher,
}

impl ContentDiffStrategy {
    pub fn new(fetcher: ContentFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl DetectionStrategy for ContentDiffStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContentDiff
    }

    async fn find_conflicts(
        &self,
        ctx: &DetectionContext<'_>,
    ) -> Result<Vec<String>, DetectionError> {
        if ctx.modified.is_empty() {
            return Ok(Vec::new());
        }

        let pr = ctx.pull_request;
        let merge_base = self
            .fetcher
            .platform()
            .compare_commits(ctx.repo, &pr.base.sha, &pr.head.sha)
            .await?;
        debug!(repo = ctx.repo, merge_base = %merge_base, "computed merge base");

        let mut conflicts = Vec::new();
        for filename in ctx.modified {
            if self.fetcher.classifier().is_denylisted(filename) {
                debug!(filename = %filename, "binary denylist, skipped");
                continue;
            }

            let (base, ours, theirs) = tokio::join!(
                self.fetcher.fetch_raw(ctx.repo, filename, &merge_base),
                self.fetcher.fetch_raw(ctx.repo, filename, &pr.head.sha),
                self.fetcher.fetch_raw(ctx.repo, filename, &pr.base.sha),
            );
            let conflicting = match (base, ours, theirs) {
                (Ok(base), Ok(ours), Ok(theirs)) => file_conflicts(
                    self.fetcher.classifier().classify(filename, None),
                    base.as_ref(),
                    ours.as_ref(),
                    theirs.as_ref(),
                ),
                (b, o, t) => {
                    let error = [b.err(), o.err(), t.err()]
                        .into_iter()
                        .flatten()
                        .map(|e| e.to_string())
                        .next()
                        .unwrap_or_default();
                    warn!(filename = %filename, %error, "content fetch failed, flagging as conflicting");
                    true
                }
            };

            if conflicting {
                conflicts.push(filename.clone());
            }
        }

        info!(
            repo = ctx.repo,
            analysed = ctx.modified.len(),
            conflicts = conflicts.len(),
            "content diff complete"
        );
        Ok(conflicts)
    }
}

/// Decide whether three versions of one file conflict.
///
/// `kind` is the name-based classification; content that turns out to be
/// binary is compared byte for byte.
fn file_conflicts(
    kind: FileKind,
    base: Option<&RemoteFile>,
    ours: Option<&RemoteFile>,
    theirs: Option<&RemoteFile>,
) -> bool {
    fn bytes(f: Option<&RemoteFile>) -> &[u8] {
        f.map(|f| f.bytes.as_slice()).unwrap_or_default()
    }
    let (base, ours, theirs) = (bytes(base), bytes(ours), bytes(theirs));

    let texts = (
        std::str::from_utf8(base),
        std::str::from_utf8(ours),
        std::str::from_utf8(theirs),
    );
    let (Ok(base_text), Ok(ours_text), Ok(theirs_text)) = texts else {
        return ours != base && theirs != base && ours != theirs;
    };
    if [base, ours, theirs].iter().any(|b| b.contains(&0)) {
        return ours != base && theirs != base && ours != theirs;
    }

    if kind == FileKind::Json {
        if let Some(verdict) = json_conflicts(base_text, ours_text, theirs_text) {
            return verdict;
        }
        debug!("JSON parse failed, falling back to line diff");
    }
    Merger::has_conflicts(base_text, ours_text, theirs_text)
}
