//! The remote dead man's switch.
//!
//! Arming starts a detached watchdog shell on the target that sleeps for
//! the timeout and then runs the recovery action. Its pid is kept in
//! `state_dir/dms.pid`. The timer lives on the remote host, so recovery
//! fires even if this process dies or the network drops.
//!
//! Disarming kills only the watchdog shell. Its `sleep` child is orphaned
//! and exits on its own without anything running after it.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::CommandChannel;
use crate::config::Config;
use crate::errors::BoundaryError;
use crate::stages::{parse_pid, require_success, STOPPED_PIDS_FILE};
use crate::utils::quote;
use crate::utils::shell::sh_c;

/// Name of the watchdog pid file under the state directory.
pub const PID_FILE: &str = "dms.pid";

/// A scheduled watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedSwitch {
    /// Remote pid of the watchdog shell.
    pub pid: u32,
    /// Seconds until recovery fires.
    pub timeout_seconds: u64,
}

/// Schedules and cancels the remote recovery action.
#[derive(Debug, Clone)]
pub struct DeadMansSwitch {
    state_dir: String,
    payload_binary: String,
    recovery_command: Option<String>,
}

impl DeadMansSwitch {
    /// Creates a switch keeping its state in `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<String>, payload_binary: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.into(),
            payload_binary: payload_binary.into(),
            recovery_command: None,
        }
    }

    /// Creates a switch from the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let switch = Self::new(&config.state_dir, &config.payload_binary);
        match &config.recovery_command {
            Some(command) => switch.with_recovery_command(command),
            None => switch,
        }
    }

    /// Replaces the default recovery action.
    #[must_use]
    pub fn with_recovery_command(mut self, command: impl Into<String>) -> Self {
        self.recovery_command = Some(command.into());
        self
    }

    fn state_path(&self, file: &str) -> String {
        quote(&format!("{}/{file}", self.state_dir.trim_end_matches('/')))
    }

    /// The shell snippet run when the timer expires.
    ///
    /// By default: resume every stopped daemon, then kill the workload.
    #[must_use]
    pub fn recovery_action(&self) -> String {
        if let Some(command) = &self.recovery_command {
            return command.clone();
        }
        let stopped = self.state_path(STOPPED_PIDS_FILE);
        format!(
            "if [ -f {stopped} ]; then xargs kill -CONT < {stopped} 2>/dev/null; fi; pkill -f {}",
            quote(&self.payload_binary)
        )
    }

    pub(crate) fn arm_command(&self, timeout_seconds: u64) -> String {
        let pid_file = self.state_path(PID_FILE);
        let watchdog = format!(
            "sleep {timeout_seconds}; rm -f {pid_file}; {}",
            self.recovery_action()
        );
        format!(
            "mkdir -p {dir} || exit 1; \
             if [ -f {pid_file} ]; then kill \"$(cat {pid_file})\" 2>/dev/null; fi; \
             nohup {watchdog} > /dev/null 2>&1 & echo $! > {pid_file}; cat {pid_file}",
            dir = quote(&self.state_dir),
            watchdog = sh_c(&watchdog),
        )
    }

    pub(crate) fn disarm_command(&self) -> String {
        let pid_file = self.state_path(PID_FILE);
        format!("pid=$(cat {pid_file}) && kill \"$pid\" && rm -f {pid_file} && echo \"$pid\"")
    }

    /// Schedules the recovery action `timeout_seconds` from now.
    ///
    /// Any watchdog already recorded in the pid file is replaced.
    pub async fn arm(
        &self,
        channel: &dyn CommandChannel,
        timeout_seconds: u64,
    ) -> Result<ArmedSwitch, BoundaryError> {
        if timeout_seconds == 0 {
            return Err(BoundaryError::deterministic("dead man's switch timeout must be positive"));
        }

        let output = channel.execute(&self.arm_command(timeout_seconds), true).await?;
        require_success(&output, "arming dead man's switch")?;
        let pid = parse_pid(&output, "arming dead man's switch")?;

        info!(pid, timeout_seconds, "Dead man's switch armed");
        Ok(ArmedSwitch { pid, timeout_seconds })
    }

    /// Cancels the pending recovery action.
    ///
    /// Fails deterministically if no watchdog is recorded or it is already
    /// gone, since recovery may then have run.
    pub async fn disarm(&self, channel: &dyn CommandChannel) -> Result<(), BoundaryError> {
        let output = channel.execute(&self.disarm_command(), true).await?;
        if let Err(err) = require_success(&output, "disarming dead man's switch") {
            warn!(state_dir = %self.state_dir, "Dead man's switch could not be disarmed; recovery stays scheduled");
            return Err(err);
        }
        info!(pid = ?output.last_line(), "Dead man's switch disarmed");
        Ok(())
    }

    /// Restarts the timer with a fresh `timeout_seconds`.
    pub async fn renew(
        &self,
        channel: &dyn CommandChannel,
        timeout_seconds: u64,
    ) -> Result<ArmedSwitch, BoundaryError> {
        self.disarm(channel).await?;
        self.arm(channel, timeout_seconds).await
    }
}
