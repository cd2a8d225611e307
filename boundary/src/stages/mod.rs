//! Boundary stages.
//!
//! A stage is one ordered, independently verifiable step of the pipeline.
//! It talks to the host only through a [`CommandChannel`], reads the
//! [`Config`], and either returns a typed [`StageOutcome`] or fails with a
//! classified [`BoundaryError`]. Stages never record audit events
//! themselves; the orchestrator turns each outcome into the matching entry.

mod anatomy;
mod launch;
mod quiesce;
mod snapshot;
pub mod version;

pub use anatomy::AnatomyVerification;
pub use launch::{WorkloadLaunch, LOG_TAIL_LINES};
pub use quiesce::{parse_process_table, DaemonQuiesce, ProcessEntry, STOPPED_PIDS_FILE};
pub use snapshot::Snapshot;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

use crate::channel::{CommandChannel, CommandOutput};
use crate::config::Config;
use crate::dms::{ArmedSwitch, DeadMansSwitch};
use crate::errors::BoundaryError;
use crate::pipeline::PipelineState;

/// What a successful stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The host matched every expectation.
    Verified,
    /// The process table was captured.
    SnapshotCreated {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// Conflicting processes were stopped.
    DaemonsDisabled {
        /// One description per stopped process.
        actions: Vec<String>,
    },
    /// The remote watchdog was scheduled.
    SwitchArmed(ArmedSwitch),
    /// The workload is running.
    PayloadLaunched {
        /// Remote pid.
        pid: u32,
        /// Launched binary.
        binary: String,
    },
}

/// One step of the pipeline.
#[async_trait]
pub trait BoundaryStage: Send + Sync + Debug {
    /// Stage name used in logs and error context.
    fn name(&self) -> &str;

    /// The state the pipeline enters when this stage succeeds.
    fn target(&self) -> PipelineState;

    /// Runs the stage against the host.
    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError>;
}

/// Arms the dead man's switch right before the risky launch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmDeadMansSwitch;

#[async_trait]
impl BoundaryStage for ArmDeadMansSwitch {
    fn name(&self) -> &str {
        "arm_dead_mans_switch"
    }

    fn target(&self) -> PipelineState {
        PipelineState::PreLaunch
    }

    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError> {
        let armed = DeadMansSwitch::from_config(config)
            .arm(channel, config.dms_timeout_seconds)
            .await?;
        Ok(StageOutcome::SwitchArmed(armed))
    }
}

/// The standard stage order.
#[must_use]
pub fn default_stages() -> Vec<Arc<dyn BoundaryStage>> {
    vec![
        Arc::new(AnatomyVerification),
        Arc::new(Snapshot),
        Arc::new(DaemonQuiesce),
        Arc::new(ArmDeadMansSwitch),
        Arc::new(WorkloadLaunch),
    ]
}

/// Fails deterministically unless the command exited 0.
pub(crate) fn require_success(output: &CommandOutput, what: &str) -> Result<(), BoundaryError> {
    if output.success() {
        return Ok(());
    }
    Err(BoundaryError::deterministic(format!(
        "{what} failed with exit code {}: {}",
        output.exit_code,
        output.stderr.trim()
    ))
    .with_context_entry("exit_code", output.exit_code)
    .with_context_entry("stderr", output.stderr.trim()))
}

/// Parses the last non-empty stdout line as a pid.
pub(crate) fn parse_pid(output: &CommandOutput, what: &str) -> Result<u32, BoundaryError> {
    output
        .last_line()
        .and_then(|line| line.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| {
            BoundaryError::deterministic(format!(
                "{what} did not report a process id; stdout was: {:?}",
                output.stdout
            ))
            .with_context_entry("stdout", &output.stdout)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TRANSITIONS;

    #[test]
    fn test_default_stages_follow_transition_table() {
        let stages = default_stages();
        let mut state = PipelineState::INITIAL;
        for stage in &stages {
            assert!(TRANSITIONS.contains(&(state, stage.target())), "{}", stage.name());
            state = stage.target();
        }
        assert_eq!(state, PipelineState::Launched);
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid(&CommandOutput::ok("noise\n 812 \n"), "launch").unwrap(), 812);

        let err = parse_pid(&CommandOutput::ok("nohup: ignoring input"), "launch").unwrap_err();
        assert!(err.is_deterministic());
        assert!(err.message.contains("nohup: ignoring input"));
        assert!(parse_pid(&CommandOutput::ok("0"), "launch").is_err());
    }

    #[test]
    fn test_require_success() {
        assert!(require_success(&CommandOutput::ok(""), "probe").is_ok());

        let err = require_success(&CommandOutput::new(2, "", "denied\n"), "probe").unwrap_err();
        assert!(err.message.contains("exit code 2"));
        assert!(err.message.contains("denied"));
        assert_eq!(err.context.get("exit_code"), Some(&serde_json::json!(2)));
    }
}
