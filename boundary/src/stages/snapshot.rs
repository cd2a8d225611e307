use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{require_success, BoundaryStage, StageOutcome};
use crate::channel::CommandChannel;
use crate::config::Config;
use crate::errors::BoundaryError;
use crate::pipeline::PipelineState;
use crate::utils::quote;

/// Captures the remote process table before anything is changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot;

impl Snapshot {
    pub(crate) fn command(state_dir: &str, snapshot_id: &str) -> String {
        let path = format!("{}/snapshot-{snapshot_id}.txt", state_dir.trim_end_matches('/'));
        format!(
            "mkdir -p {} && ps -axo pid=,comm= > {}",
            quote(state_dir),
            quote(&path)
        )
    }
}

#[async_trait]
impl BoundaryStage for Snapshot {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn target(&self) -> PipelineState {
        PipelineState::Snapshotted
    }

    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError> {
        let snapshot_id = Uuid::new_v4().to_string();
        let output = channel
            .execute(&Self::command(&config.state_dir, &snapshot_id), true)
            .await?;
        require_success(&output, "process snapshot")?;

        info!(snapshot_id = %snapshot_id, state_dir = %config.state_dir, "Process table captured");
        Ok(StageOutcome::SnapshotCreated { snapshot_id })
    }
}
