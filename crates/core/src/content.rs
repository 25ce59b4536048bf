//! File content retrieval and classification.
//!
//! [`ContentFetcher`] reads files and commit metadata from the hosting
//! platform at an exact revision. [`FileClassifier`] decides whether a file
//! is binary, JSON, or plain text.

use std::sync::Arc;

use tracing::debug;

use crate::errors::GitHubError;
use crate::models::{FileKind, FileVersion};
use crate::platform::{CommitInfo, HostingPlatform, RemoteFile};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Extensionless files that hold JSON.
const JSON_DOTFILES: &[&str] = &[".babelrc", ".eslintrc", ".prettierrc"];

/// How many leading bytes are inspected for NUL when sniffing binaries.
const SNIFF_LEN: usize = 8000;

/// Classifies files by name and, when available, by content.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    binary_patterns: Vec<String>,
}

impl FileClassifier {
    pub fn new(binary_patterns: Vec<String>) -> Self {
        Self { binary_patterns }
    }

    /// `true` if the path matches a binary denylist pattern.
    ///
    /// Matching is case-insensitive. A leading `**/` also matches files at
    /// the repository root.
    pub fn is_denylisted(&self, path: &str) -> bool {
        let path = path.replace('\\', "/").to_lowercase();
        let name = path.rsplit('/').next().unwrap_or(&path);
        self.binary_patterns.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            glob_match::glob_match(&pattern, &path)
                || pattern
                    .strip_prefix("**/")
                    .is_some_and(|tail| glob_match::glob_match(tail, name))
        })
    }

    /// Classify a file from its name and optional content.
    pub fn classify(&self, path: &str, bytes: Option<&[u8]>) -> FileKind {
        if self.is_denylisted(path) {
            return FileKind::Binary;
        }
        if let Some(bytes) = bytes {
            if looks_binary(bytes) {
                return FileKind::Binary;
            }
        }
        if is_json_name(path) {
            FileKind::Json
        } else {
            FileKind::Text
        }
    }
}

/// `true` for `.json` files and well-known JSON dotfiles.
pub fn is_json_name(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    name.ends_with(".json") || JSON_DOTFILES.contains(&name.as_str())
}

fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    head.contains(&0) || std::str::from_utf8(bytes).is_err()
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Reads file versions and commit metadata from the hosting platform.
#[derive(Clone)]
pub struct ContentFetcher {
    platform: Arc<dyn HostingPlatform>,
    classifier: FileClassifier,
}

impl ContentFetcher {
    pub fn new(platform: Arc<dyn HostingPlatform>, classifier: FileClassifier) -> Self {
        Self {
            platform,
            classifier,
        }
    }

    pub fn classifier(&self) -> &FileClassifier {
        &self.classifier
    }

    pub fn platform(&self) -> &Arc<dyn HostingPlatform> {
        &self.platform
    }

    /// Raw bytes of `path` at `revision`, or `None` if absent there.
    pub async fn fetch_raw(
        &self,
        repo: &str,
        path: &str,
        revision: &str,
    ) -> Result<Option<RemoteFile>, GitHubError> {
        self.platform.get_file(repo, path, revision).await
    }

    /// Fetch `path` at `revision` as a [`FileVersion`].
    ///
    /// Content is `None` when the file is absent at that revision or is not
    /// text; `kind` tells the two apart.
    pub async fn fetch_version(
        &self,
        repo: &str,
        path: &str,
        revision: &str,
        branch: &str,
    ) -> Result<FileVersion, GitHubError> {
        let (content, kind) = match self.fetch_raw(repo, path, revision).await? {
            Some(file) => match self.classifier.classify(path, Some(&file.bytes)) {
                FileKind::Binary => {
                    debug!(path, revision, "binary content, not decoded");
                    (None, Some(FileKind::Binary))
                }
                kind => (String::from_utf8(file.bytes).ok(), Some(kind)),
            },
            None => {
                debug!(path, revision, "file absent at revision");
                (None, None)
            }
        };
        Ok(FileVersion {
            content,
            kind,
            revision: revision.to_string(),
            branch: branch.to_string(),
        })
    }

    /// Commit metadata for `sha`.
    pub async fn commit_metadata(&self, repo: &str, sha: &str) -> Result<CommitInfo, GitHubError> {
        self.platform.get_commit(repo, sha).await
    }
}
