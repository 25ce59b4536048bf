//! Shared fixtures for the integration tests.

#![allow(dead_code, unused_imports)]

pub mod fake_platform;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use conflictbot_core::config::{
    AppConfig, ApplyConfig, CommandConfig, DaemonConfig, DetectionConfig, GitHubConfig,
    ResolverConfig,
};
use conflictbot_core::conflict::{ConflictSource, DetectionReport};
use conflictbot_core::errors::{DetectionError, OracleError};
use conflictbot_core::models::{NewResolution, StrategyKind};
use conflictbot_core::resolver::{ResolveRequest, ResolverOracle};

pub use fake_platform::{FakePlatform, AUTHOR, BASE_SHA, HEAD_SHA, MERGE_BASE_SHA, PR_NUMBER};

pub const REPO: &str = "acme/widgets";

/// Configuration with fast polling and no native merge.
pub fn test_config() -> AppConfig {
    AppConfig {
        daemon: DaemonConfig::default(),
        github: GitHubConfig {
            api_url: "http://localhost:9".into(),
            token_env: "CONFLICTBOT_TEST_TOKEN".into(),
            clone_url_template: "file:///nonexistent/{repo}".into(),
            token: Some("test-token".into()),
        },
        resolver: ResolverConfig {
            url: "http://localhost:9/resolve".into(),
            token_env: None,
            timeout_secs: 5,
            token: None,
        },
        detection: DetectionConfig {
            mergeable_retries: 3,
            mergeable_retry_delay_ms: 1,
            native_merge: false,
            ..DetectionConfig::default()
        },
        apply: ApplyConfig::default(),
        command: CommandConfig::default(),
        watch: Vec::new(),
    }
}

/// Fixed timestamp `minutes` after a reference instant.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn resolution(filename: &str, code: &str) -> NewResolution {
    NewResolution {
        repo: REPO.into(),
        pr_number: PR_NUMBER,
        filename: filename.into(),
        resolved_code: code.into(),
        base_content: None,
        ours_content: None,
        theirs_content: None,
    }
}

// ---------------------------------------------------------------------------
// Oracle stub
// ---------------------------------------------------------------------------

/// Oracle answering from a per-file table; unknown files are declined.
#[derive(Default)]
pub struct StubOracle {
    answers: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<ResolveRequest>>,
}

impl StubOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, filename: &str, code: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(filename.to_string(), code.to_string());
    }

    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResolverOracle for StubOracle {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, OracleError> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .get(&request.filename)
            .cloned()
            .ok_or_else(|| OracleError::Declined {
                filename: request.filename.clone(),
                status: "error".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Detector stub
// ---------------------------------------------------------------------------

/// Conflict source returning a fixed file list.
pub struct StubDetector {
    files: Vec<String>,
    calls: AtomicUsize,
}

impl StubDetector {
    pub fn new(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConflictSource for StubDetector {
    async fn conflicts(
        &self,
        _repo: &str,
        _pr_number: u64,
    ) -> Result<DetectionReport, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DetectionReport {
            files: self.files.clone(),
            strategy: StrategyKind::ContentDiff,
        })
    }
}

