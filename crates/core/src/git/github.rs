//! GitHub REST API client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::errors::GitHubError;
use crate::models::{ChangeStatus, ConflictCandidate};
use crate::platform::{
    BranchRef, CommitInfo, HostingPlatform, IssueComment, PullRequestInfo, RemoteFile,
};

const PER_PAGE: usize = 100;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GitHubUserSummary {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    user: GitHubUserSummary,
    mergeable: Option<bool>,
    head: PullRequestRef,
    base: PullRequestRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CompareCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    merge_base_commit: CompareCommit,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    name: String,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: GitActor,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    commit: CompareCommit,
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    user: Option<GitHubUserSummary>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreatedComment {
    id: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("conflictbot/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// Build a URL from percent-encoded path segments under the API root.
    fn url<'a, I>(&self, segments: I) -> Result<Url, GitHubError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| GitHubError::ParseError(format!("invalid api_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::ParseError("api_url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_url(&self, repo: &str, rest: &[&str]) -> Result<Url, GitHubError> {
        let (owner, name) = repo
            .split_once('/')
            .ok_or_else(|| GitHubError::ParseError(format!("'{repo}' is not owner/repo")))?;
        self.url(["repos", owner, name].into_iter().chain(rest.iter().copied()))
    }

    fn contents_url(&self, repo: &str, path: &str) -> Result<Url, GitHubError> {
        let mut rest = vec!["contents"];
        rest.extend(path.split('/').filter(|s| !s.is_empty()));
        self.repo_url(repo, &rest)
    }

    fn ref_url(&self, repo: &str, branch: &str) -> Result<Url, GitHubError> {
        let mut rest = vec!["git", "refs", "heads"];
        rest.extend(branch.split('/'));
        self.repo_url(repo, &rest)
    }

    /// Fetch every page of a list endpoint.
    async fn get_all_pages<T>(&self, url: Url) -> Result<Vec<T>, GitHubError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut items = Vec::new();
        let per_page = PER_PAGE.to_string();
        for page in 1.. {
            let page_str = page.to_string();
            let resp = self
                .http
                .get(url.clone())
                .bearer_auth(&self.token)
                .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                .send()
                .await?;
            let resp = check_response(resp).await?;
            let batch: Vec<T> = resp.json().await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }

    async fn get_blob(&self, repo: &str, sha: &str) -> Result<Vec<u8>, GitHubError> {
        let url = self.repo_url(repo, &["git", "blobs", sha])?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp).await?;
        let blob: BlobResponse = resp.json().await?;
        decode_base64(&blob.content)
    }
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    #[instrument(skip(self))]
    async fn get_pull_request(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<PullRequestInfo, GitHubError> {
        let url = self.repo_url(repo, &["pulls", &pr_number.to_string()])?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp).await?;
        let pr: PullRequest = resp.json().await?;
        debug!(number = pr.number, mergeable = ?pr.mergeable, "fetched pull request");
        Ok(PullRequestInfo {
            number: pr.number,
            author: pr.user.login,
            mergeable: pr.mergeable,
            base: BranchRef {
                ref_name: pr.base.ref_name,
                sha: pr.base.sha,
            },
            head: BranchRef {
                ref_name: pr.head.ref_name,
                sha: pr.head.sha,
            },
        })
    }

    #[instrument(skip(self))]
    async fn list_pull_request_files(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ConflictCandidate>, GitHubError> {
        let url = self.repo_url(repo, &["pulls", &pr_number.to_string(), "files"])?;
        let files: Vec<PullRequestFile> = self.get_all_pages(url).await?;
        debug!(count = files.len(), pr_number, "fetched PR files");
        Ok(files
            .into_iter()
            .map(|f| ConflictCandidate::new(f.filename, ChangeStatus::from_github(&f.status)))
            .collect())
    }

    #[instrument(skip(self))]
    async fn compare_commits(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<String, GitHubError> {
        let spec = format!("{base}...{head}");
        let url = self.repo_url(repo, &["compare", &spec])?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp).await?;
        let comparison: Comparison = resp.json().await?;
        debug!(merge_base = %comparison.merge_base_commit.sha, "compared commits");
        Ok(comparison.merge_base_commit.sha)
    }

    #[instrument(skip(self))]
    async fn get_file(
        &self,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<RemoteFile>, GitHubError> {
        let url = self.contents_url(repo, path)?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        let resp = match check_response(resp).await {
            Ok(resp) => resp,
            Err(GitHubError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let contents: ContentsResponse = resp.json().await?;
        // Files over 1 MB come back without inline content.
        let bytes = match (contents.encoding.as_deref(), contents.content.as_deref()) {
            (Some("base64"), Some(content)) if !content.is_empty() => decode_base64(content)?,
            _ => self.get_blob(repo, &contents.sha).await?,
        };
        debug!(path, git_ref, size = bytes.len(), "fetched file");
        Ok(Some(RemoteFile {
            sha: contents.sha,
            bytes,
        }))
    }

    #[instrument(skip(self))]
    async fn get_commit(&self, repo: &str, sha: &str) -> Result<CommitInfo, GitHubError> {
        let url = self.repo_url(repo, &["commits", sha])?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp).await?;
        let commit: GitHubCommit = resp.json().await?;
        Ok(CommitInfo {
            sha: commit.sha,
            message: commit.commit.message,
            author: commit.commit.author.name,
            date: commit.commit.author.date,
        })
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), GitHubError> {
        let url = self.repo_url(repo, &["git", "refs"])?;
        let payload = serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        info!(branch, sha, "created branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_branch(
        &self,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<(), GitHubError> {
        let url = self.ref_url(repo, branch)?;
        let payload = serde_json::json!({ "sha": sha, "force": force });
        let resp = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        info!(branch, sha, force, "updated branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_branch(&self, repo: &str, branch: &str) -> Result<(), GitHubError> {
        let url = self.ref_url(repo, branch)?;
        let resp = self.http.delete(url).bearer_auth(&self.token).send().await?;
        check_response(resp).await?;
        info!(branch, "deleted branch");
        Ok(())
    }

    #[instrument(skip(self, bytes, message))]
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        bytes: &[u8],
        message: &str,
        current_sha: Option<&str>,
    ) -> Result<String, GitHubError> {
        let url = self.contents_url(repo, path)?;
        let mut payload = serde_json::json!({
            "message": message,
            "content": BASE64.encode(bytes),
            "branch": branch,
        });
        if let Some(sha) = current_sha {
            payload["sha"] = serde_json::Value::String(sha.to_string());
        }
        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let written: WriteResponse = resp.json().await?;
        debug!(path, branch, commit = %written.commit.sha, "wrote file");
        Ok(written.commit.sha)
    }

    #[instrument(skip(self, message))]
    async fn delete_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        message: &str,
        current_sha: &str,
    ) -> Result<String, GitHubError> {
        let url = self.contents_url(repo, path)?;
        let payload = serde_json::json!({
            "message": message,
            "sha": current_sha,
            "branch": branch,
        });
        let resp = self
            .http
            .delete(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let written: WriteResponse = resp.json().await?;
        debug!(path, branch, commit = %written.commit.sha, "deleted file");
        Ok(written.commit.sha)
    }

    #[instrument(skip(self))]
    async fn list_issue_comments(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError> {
        let url = self.repo_url(repo, &["issues", &pr_number.to_string(), "comments"])?;
        let comments: Vec<GitHubComment> = self.get_all_pages(url).await?;
        debug!(count = comments.len(), pr_number, "fetched comments");
        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                id: c.id,
                body: c.body.unwrap_or_default(),
                user: c.user.map(|u| u.login).unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    #[instrument(skip(self, body))]
    async fn create_issue_comment(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<u64, GitHubError> {
        let url = self.repo_url(repo, &["issues", &pr_number.to_string(), "comments"])?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let created: CreatedComment = resp.json().await?;
        info!(pr_number, comment_id = created.id, "posted comment");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn delete_issue_comment(&self, repo: &str, comment_id: u64) -> Result<(), GitHubError> {
        let url = self.repo_url(repo, &["issues", "comments", &comment_id.to_string()])?;
        let resp = self.http.delete(url).bearer_auth(&self.token).send().await?;
        check_response(resp).await?;
        debug!(comment_id, "deleted comment");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn is_collaborator(&self, repo: &str, user: &str) -> Result<bool, GitHubError> {
        let url = self.repo_url(repo, &["collaborators", user])?;
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        match check_response(resp).await {
            Ok(_) => Ok(true),
            Err(GitHubError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success response onto a [`GitHubError`], reading the body for
/// the message.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let reset = resp
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let url = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(error_for_status(status, url, body, reset))
}

fn error_for_status(status: StatusCode, url: String, body: String, reset: String) -> GitHubError {
    match status.as_u16() {
        401 | 403 => GitHubError::AuthenticationFailed(format!("HTTP {status}")),
        404 => GitHubError::NotFound(url),
        409 | 422 => GitHubError::Conflict(body),
        429 => GitHubError::RateLimited { reset_at: reset },
        code => GitHubError::ApiError { status: code, body },
    }
}

/// Decode GitHub's line-wrapped base64 payloads.
fn decode_base64(content: &str) -> Result<Vec<u8>, GitHubError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| GitHubError::ParseError(format!("invalid base64 content: {e}")))
}
