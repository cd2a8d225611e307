//! Workload launch.
//!
//! The workload is started detached, at the configured niceness, with idle
//! sleep inhibited and all output sent to `payload_log`. After the settle
//! interval a zero-signal probe confirms it is still alive. Every failure
//! here is deterministic: a launch that raced or was misconfigured will not
//! heal on its own, and retrying could start a second copy.

use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

use super::{parse_pid, BoundaryStage, StageOutcome};
use crate::channel::{CommandChannel, CommandOutput};
use crate::config::Config;
use crate::errors::{BoundaryError, ChannelError};
use crate::pipeline::PipelineState;
use crate::utils::quote;

/// Lines of the workload log attached to a failed liveness probe.
pub const LOG_TAIL_LINES: usize = 20;

/// Starts the workload and checks that it survives.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadLaunch;

fn channel_failure(what: &str, err: &ChannelError) -> BoundaryError {
    BoundaryError::deterministic(format!("{what} could not be run: {err}")).with_source_chain(err)
}

impl WorkloadLaunch {
    pub(crate) fn launch_command(config: &Config) -> String {
        let log = config.payload_log.as_str();
        let log_dir = Path::new(log)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());

        let inhibitor = if config.expected_os.eq_ignore_ascii_case("darwin") {
            "caffeinate -i"
        } else {
            "systemd-inhibit --what=sleep:idle"
        };

        format!(
            "mkdir -p {dir} || exit 1; nohup nice -n {nice} {inhibitor} {binary} > {log} 2>&1 & echo $!",
            dir = quote(&log_dir),
            nice = config.nice,
            binary = quote(&config.payload_binary),
            log = quote(log),
        )
    }

    pub(crate) fn tail_command(config: &Config) -> String {
        format!("tail -n {LOG_TAIL_LINES} {}", quote(&config.payload_log))
    }

    async fn read_log_tail(channel: &dyn CommandChannel, config: &Config) -> String {
        match channel.execute(&Self::tail_command(config), true).await {
            Ok(CommandOutput { exit_code: 0, stdout, .. }) => stdout,
            Ok(output) => format!(
                "<log unavailable: tail exited {}: {}>",
                output.exit_code,
                output.stderr.trim()
            ),
            Err(err) => format!("<log unavailable: {err}>"),
        }
    }
}

#[async_trait]
impl BoundaryStage for WorkloadLaunch {
    fn name(&self) -> &str {
        "workload_launch"
    }

    fn target(&self) -> PipelineState {
        PipelineState::Launched
    }

    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError> {
        let output = channel
            .execute(&Self::launch_command(config), true)
            .await
            .map_err(|e| channel_failure("launch command", &e))?;

        if !output.success() {
            return Err(BoundaryError::deterministic(format!(
                "launch command exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            ))
            .with_context_entry("exit_code", output.exit_code)
            .with_context_entry("stderr", output.stderr.trim()));
        }
        let pid = parse_pid(&output, "launch command")?;

        tokio::time::sleep(config.settle).await;

        let probe = channel
            .execute(&format!("kill -0 {pid}"), true)
            .await
            .map_err(|e| channel_failure("liveness probe", &e))?;

        if !probe.success() {
            let tail = Self::read_log_tail(channel, config).await;
            warn!(pid, log = %config.payload_log, "Workload died during settle interval");
            return Err(BoundaryError::deterministic(format!(
                "workload pid {pid} exited within {}s of launch; last {LOG_TAIL_LINES} lines of {}:\n{tail}",
                config.settle.as_secs(),
                config.payload_log
            ))
            .with_context_entry("pid", pid)
            .with_context_entry("payload_log", &config.payload_log)
            .with_context_entry("log_tail", &tail));
        }

        info!(pid, binary = %config.payload_binary, nice = config.nice, "Workload launched");
        Ok(StageOutcome::PayloadLaunched {
            pid,
            binary: config.payload_binary.clone(),
        })
    }
}
