//! Error types for the conflictbot core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The requested resource (file, ref, PR) does not exist.
    #[error("GitHub resource not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency failure: stale blob sha or existing ref.
    #[error("GitHub rejected the write as conflicting: {0}")]
    Conflict(String),

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// Response payload could not be decoded.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Local git subprocess errors
// ---------------------------------------------------------------------------

/// Errors from local `git` subprocess invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found")]
    BinaryNotFound,

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A `git` command did not finish within the configured timeout.
    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Resolver oracle errors
// ---------------------------------------------------------------------------

/// Errors from the external resolver oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    /// HTTP-level transport error.
    #[error("resolver HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The oracle answered with a non-success HTTP status.
    #[error("resolver returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    /// The oracle answered but did not produce a usable resolution.
    #[error("resolver declined '{filename}': status '{status}'")]
    Declined { filename: String, status: String },
}

// ---------------------------------------------------------------------------
// Detection errors
// ---------------------------------------------------------------------------

/// Errors raised by a single detection strategy. A strategy error is not
/// fatal: the detector falls through to the next strategy.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The strategy could not be set up (tooling, network, auth).
    #[error("{strategy} strategy unavailable: {detail}")]
    Unavailable { strategy: String, detail: String },

    #[error("detection git error: {0}")]
    Git(#[from] GitError),

    #[error("detection GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    #[error("detection I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Apply errors
// ---------------------------------------------------------------------------

/// Errors from the apply-all state machine.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// An event arrived that the current state does not accept.
    #[error("invalid apply transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// A step of the apply run failed.
    #[error("apply step '{step}' failed: {detail}")]
    StepFailed { step: String, detail: String },

    #[error("apply GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    #[error("apply database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Errors from the per-pull-request workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Another apply-all for the same pull request holds the lock.
    #[error("workflow already running for {repo}#{pr_number}")]
    AlreadyRunning { repo: String, pr_number: u64 },

    #[error("workflow GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    #[error("workflow database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be decoded.
    #[error("invalid value in column '{column}': {detail}")]
    InvalidValue { column: String, detail: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
