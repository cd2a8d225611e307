//! Daemon quiescing.
//!
//! Every process whose name is not on the merged allowlist is stopped with
//! `SIGSTOP`, which is reversible: the recovery action resumes the pids
//! recorded in `stopped.pids` with `SIGCONT`.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{require_success, BoundaryStage, StageOutcome};
use crate::channel::CommandChannel;
use crate::config::Config;
use crate::errors::BoundaryError;
use crate::pipeline::PipelineState;
use crate::utils::quote;

const LIST_PROCESSES: &str = "ps -axo pid=,comm=";

/// Name of the file, under the state directory, listing stopped pids.
pub const STOPPED_PIDS_FILE: &str = "stopped.pids";

/// One row of the remote process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id.
    pub pid: u32,
    /// Executable basename.
    pub name: String,
}

/// Parses `ps -axo pid=,comm=` output.
///
/// The command column may contain spaces; only its basename is kept.
pub fn parse_process_table(raw: &str) -> Result<Vec<ProcessEntry>, BoundaryError> {
    let mut entries = Vec::new();

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let malformed = || {
            BoundaryError::deterministic(format!("malformed process listing line: {line:?}"))
                .with_context_entry("line", line)
        };
        let (pid, command) = line.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let pid = pid.parse::<u32>().map_err(|_| malformed())?;
        let name = command.trim().rsplit('/').next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(malformed());
        }
        entries.push(ProcessEntry { pid, name });
    }

    if entries.is_empty() {
        return Err(BoundaryError::deterministic("process listing was empty"));
    }
    Ok(entries)
}

/// Stops every process not on the allowlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaemonQuiesce;

impl DaemonQuiesce {
    /// Entries to stop: not allowlisted and never pid 0 or 1.
    pub(crate) fn candidates<'a>(
        entries: &'a [ProcessEntry],
        allowlist: &BTreeSet<String>,
    ) -> Vec<&'a ProcessEntry> {
        entries
            .iter()
            .filter(|e| e.pid > 1 && !allowlist.contains(&e.name))
            .collect()
    }

    pub(crate) fn stop_command(state_dir: &str, pids: &[u32]) -> String {
        let pid_file = quote(&format!("{}/{STOPPED_PIDS_FILE}", state_dir.trim_end_matches('/')));
        let pids = pids.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
        format!(
            "mkdir -p {dir} && : > {pid_file} && for p in {pids}; do \
             if kill -STOP \"$p\" 2>/dev/null; then echo \"$p\" | tee -a {pid_file}; fi; done",
            dir = quote(state_dir),
        )
    }
}

#[async_trait]
impl BoundaryStage for DaemonQuiesce {
    fn name(&self) -> &str {
        "daemon_quiesce"
    }

    fn target(&self) -> PipelineState {
        PipelineState::Undressed
    }

    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError> {
        let listing = channel.execute(LIST_PROCESSES, false).await?;
        require_success(&listing, "process listing")?;
        let entries = parse_process_table(&listing.stdout)?;

        let allowlist = config.merged_allowlist();
        let candidates = Self::candidates(&entries, &allowlist);
        let pids: Vec<u32> = candidates.iter().map(|e| e.pid).collect();

        let output = channel
            .execute(&Self::stop_command(&config.state_dir, &pids), true)
            .await?;
        require_success(&output, "stopping daemons")?;

        let stopped: BTreeSet<u32> = output
            .stdout
            .lines()
            .filter_map(|l| l.trim().parse().ok())
            .collect();

        let mut actions = Vec::with_capacity(stopped.len());
        for entry in candidates {
            if stopped.contains(&entry.pid) {
                actions.push(format!("SIGSTOP {} {}", entry.pid, entry.name));
            } else {
                debug!(pid = entry.pid, name = %entry.name, "Process exited before it could be stopped");
            }
        }

        info!(
            stopped = actions.len(),
            allowlisted = allowlist.len(),
            "Daemons quiesced"
        );
        Ok(StageOutcome::DaemonsDisabled { actions })
    }
}
