//! Comment-driven "apply all" commands.
//!
//! The interpreter looks for the configured phrase in pull request comments
//! newer than the command watermark, posted by someone allowed to act on
//! the pull request. A qualifying command confirms every stored resolution.
//! The watermark is left untouched; the workflow advances it only after
//! the apply succeeds, so a failed run is retried on the next check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use tracing::{debug, info, warn};

use crate::config::CommandConfig;
use crate::errors::{ConfigError, CoreError};
use crate::models::{is_bot_comment, ApplyCommand, CommandCheck};
use crate::platform::{HostingPlatform, IssueComment};
use crate::store::ResolutionStore;

/// Build a case-insensitive, word-bounded matcher for `phrase`. Runs of
/// whitespace inside the phrase match any whitespace.
pub fn phrase_pattern(phrase: &str) -> Result<Regex, ConfigError> {
    let words: Vec<String> = phrase.split_whitespace().map(regex_lite::escape).collect();
    if words.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "command.phrase".into(),
            detail: "command phrase must not be empty".into(),
        });
    }
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let trimmed = phrase.trim();
    let lead = if is_word(trimmed.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(trimmed.chars().last()) { r"\b" } else { "" };

    Regex::new(&format!(r"(?i){lead}{}{trail}", words.join(r"\s+"))).map_err(|e| {
        ConfigError::InvalidValue {
            field: "command.phrase".into(),
            detail: e.to_string(),
        }
    })
}

/// Scans pull request comments for an authorized apply-all command.
pub struct CommandInterpreter {
    platform: Arc<dyn HostingPlatform>,
    store: Arc<dyn ResolutionStore>,
    pattern: Regex,
}

impl CommandInterpreter {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        store: Arc<dyn ResolutionStore>,
        config: &CommandConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            platform,
            store,
            pattern: phrase_pattern(&config.phrase)?,
        })
    }

    /// Look for the newest authorized command after the watermark.
    ///
    /// When one is found every resolution of the pull request is confirmed
    /// and the command is returned. Calling this again before the watermark
    /// moves returns the same command.
    pub async fn check_command(&self, repo: &str, pr_number: u64) -> Result<CommandCheck, CoreError> {
        let watermark = self
            .store
            .get_watermark(repo, pr_number)?
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let pr = self.platform.get_pull_request(repo, pr_number).await?;
        let comments = self.platform.list_issue_comments(repo, pr_number).await?;

        let candidates = self.candidates(comments, watermark);
        debug!(repo, pr_number, candidates = candidates.len(), watermark = %watermark, "scanned comments");

        let mut authorized: HashMap<String, bool> = HashMap::new();
        for comment in candidates {
            let allowed = match authorized.get(&comment.user) {
                Some(&known) => known,
                None => {
                    let known = self.is_authorized(repo, &pr.author, &comment.user).await;
                    authorized.insert(comment.user.clone(), known);
                    known
                }
            };
            if !allowed {
                debug!(user = %comment.user, comment_id = comment.id, "ignoring command from unauthorized user");
                continue;
            }

            let confirmed = self.store.confirm_all(repo, pr_number)?;
            info!(
                repo,
                pr_number,
                user = %comment.user,
                comment_id = comment.id,
                confirmed,
                "apply-all command accepted"
            );
            return Ok(CommandCheck::ApplyAll(ApplyCommand {
                comment_id: comment.id,
                user: comment.user,
                created_at: comment.created_at,
            }));
        }

        Ok(CommandCheck::Idle)
    }

    /// Matching comments after `watermark`, newest first.
    fn candidates(&self, comments: Vec<IssueComment>, watermark: DateTime<Utc>) -> Vec<IssueComment> {
        let mut matching: Vec<IssueComment> = comments
            .into_iter()
            .filter(|c| c.created_at > watermark)
            .filter(|c| !is_bot_comment(&c.body))
            .filter(|c| self.pattern.is_match(&c.body))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching
    }

    async fn is_authorized(&self, repo: &str, author: &str, user: &str) -> bool {
        if user.eq_ignore_ascii_case(author) {
            return true;
        }
        match self.platform.is_collaborator(repo, user).await {
            Ok(is_collaborator) => is_collaborator,
            Err(e) => {
                warn!(repo, user, error = %e, "collaborator lookup failed, treating as unauthorized");
                false
            }
        }
    }
}
