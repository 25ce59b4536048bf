//! External resolver oracle.
//!
//! The oracle receives the three versions of a conflicting file and answers
//! with merged code. It is treated as an opaque HTTP service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::errors::OracleError;

/// Status the oracle reports for a usable resolution.
const SUCCESS: &str = "success";

/// Three-way content for one file, as sent to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub filename: String,
    pub base: String,
    pub ours: String,
    pub theirs: String,
    pub base_sha: String,
    pub ours_sha: String,
    pub theirs_sha: String,
    /// Modules imported by the "ours" version.
    pub imports: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse {
    status: String,
    #[serde(default)]
    resolved_code: Option<String>,
}

/// Produces merged code for a conflicting file.
#[async_trait]
pub trait ResolverOracle: Send + Sync {
    /// Returns the resolved code, or an error when the oracle fails or
    /// declines.
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, OracleError>;
}

/// Oracle reached over HTTP with a JSON request body.
pub struct HttpResolverOracle {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpResolverOracle {
    pub fn new(config: &ResolverConfig) -> Result<Self, OracleError> {
        info!(url = %config.url, "initializing resolver oracle client");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            token: config.token.clone(),
            http,
        })
    }
}

#[async_trait]
impl ResolverOracle for HttpResolverOracle {
    async fn resolve(&self, request: &ResolveRequest) -> Result<String, OracleError> {
        debug!(filename = %request.filename, imports = request.imports.len(), "requesting resolution");

        let mut req = self.http.post(&self.url).json(request);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "resolver returned error");
            return Err(OracleError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ResolveResponse = resp.json().await?;
        accept(&request.filename, parsed)
    }
}

fn accept(filename: &str, response: ResolveResponse) -> Result<String, OracleError> {
    match response.resolved_code {
        Some(code) if response.status == SUCCESS => Ok(code),
        _ => Err(OracleError::Declined {
            filename: filename.to_string(),
            status: response.status,
        }),
    }
}
