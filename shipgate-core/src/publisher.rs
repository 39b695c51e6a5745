//! Idempotent auto-commit of a completed chunk.
//!
//! Stages the whole working tree and commits with a conventional message
//! embedding the feature, chunk, and description. Nothing staged is a
//! successful no-op, not an error; every git failure is reported in the
//! outcome rather than raised, so a broken repository can never block an
//! otherwise valid completion.

use crate::config::GateConfig;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Timeout for the cheap staged-changes probe.
const DIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one publish attempt.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub success: bool,
    pub message: String,
}

impl PublishOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Commits the working tree on a validated chunk completion.
pub struct Publisher {
    root: PathBuf,
    timeout: Duration,
}

impl Publisher {
    /// Create a publisher for the configured working tree.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            root: config.root().to_path_buf(),
            timeout: config.publish_timeout,
        }
    }

    /// Stage everything and commit the chunk.
    pub async fn publish(&self, feature: &str, chunk: &str, description: &str) -> PublishOutcome {
        // Stage all changes.
        match self.git(&["add", "-A"], self.timeout).await {
            Ok(output) if !output.status.success() => {
                return PublishOutcome::failed(format!(
                    "git add failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ));
            }
            Ok(_) => {}
            Err(err) => return PublishOutcome::failed(Self::describe(&err)),
        }

        // Anything staged? Exit 0 means a clean index.
        match self.git(&["diff", "--cached", "--quiet"], DIFF_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                return PublishOutcome::ok("No changes to commit");
            }
            Ok(_) => {}
            Err(err) => return PublishOutcome::failed(Self::describe(&err)),
        }

        let message = format!(
            "feat({feature}): chunk {chunk} - {description}\n\n[auto-commit by shipgate]"
        );
        match self.git(&["commit", "-m", &message], self.timeout).await {
            Ok(output) if output.status.success() => {
                PublishOutcome::ok(format!("Committed: feat({feature}): chunk {chunk}"))
            }
            Ok(output) => PublishOutcome::failed(format!(
                "git commit failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(err) => PublishOutcome::failed(Self::describe(&err)),
        }
    }

    async fn git(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(timeout.as_secs())),
        }
    }

    fn describe(err: &Error) -> String {
        if err.is_timeout() {
            "Git command timed out".to_string()
        } else {
            format!("Error: {err}")
        }
    }
}
