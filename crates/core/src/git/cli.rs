//! Thin async wrapper around the `git` binary.
//!
//! Every invocation runs inside a fixed working directory, never prompts
//! for credentials, and is bounded by a timeout. A timed-out child is
//! killed when its future is dropped.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::GitError;

/// Runs `git` subcommands in a single working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `git <args>` and return stdout, failing on a non-zero exit.
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(command = args.first().copied().unwrap_or(""), exit_code, %stderr, "git command failed");
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or("").to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run `git <args>` and report whether it exited successfully, without
    /// treating a non-zero exit as an error.
    pub async fn succeeds(&self, args: &[&str]) -> Result<bool, GitError> {
        Ok(self.output(args).await?.status.success())
    }

    async fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        let command = args.first().copied().unwrap_or("").to_string();
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir)
            .args([
                "-c",
                "user.name=conflictbot",
                "-c",
                "user.email=conflictbot@localhost",
                "-c",
                "core.quotePath=false",
            ])
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = %redact(args), dir = %self.workdir.display(), "running git command");
        let child = cmd.output();
        match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GitError::BinaryNotFound
                } else {
                    GitError::IoError(e)
                }
            }),
            Err(_) => Err(GitError::Timeout {
                command,
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Render a command line for logging with URL credentials removed.
fn redact(args: &[&str]) -> String {
    args.iter()
        .map(|arg| match (arg.find("://"), arg.find('@')) {
            (Some(scheme), Some(at)) if at > scheme => {
                format!("{}://***{}", &arg[..scheme], &arg[at..])
            }
            _ => arg.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
