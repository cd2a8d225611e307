//! The command channel to the remote host.
//!
//! A channel runs one command and reports what happened. It never retries
//! and never interprets the command's output; that is the stages' job.

mod classify;
mod ssh;

pub use classify::is_connection_failure;
pub use ssh::SshChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ChannelError;

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status; `-1` if the command was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Creates an output.
    #[must_use]
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Returns true if the command exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed standard output.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Last non-empty line of standard output.
    #[must_use]
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
    }
}

/// Executes single commands on the remote host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Runs `command`, with elevated privileges when `sudo` is set.
    ///
    /// A non-zero exit is a normal [`CommandOutput`]; only transport
    /// failures are errors.
    async fn execute(&self, command: &str, sudo: bool) -> Result<CommandOutput, ChannelError>;
}
