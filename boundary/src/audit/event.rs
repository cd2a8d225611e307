//! Audit event vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::PipelineState;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// The pipeline moved between states.
    StateTransition {
        /// Previous state.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },
    /// The remote process table was captured.
    SnapshotCreated {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// The remote watchdog was scheduled.
    DmsArmed {
        /// Remote pid of the watchdog.
        pid: u32,
        /// Seconds until the recovery action fires.
        timeout_seconds: u64,
    },
    /// Conflicting processes were stopped.
    DaemonsDisabled {
        /// Number of actions taken.
        count: usize,
        /// One description per action.
        actions: Vec<String>,
    },
    /// The workload was started and survived the settle interval.
    PayloadLaunched {
        /// Remote pid of the workload.
        pid: u32,
        /// Path of the launched binary.
        binary: String,
    },
    /// A classified failure.
    Failure {
        /// `TransientError` or `DeterministicError`.
        error_type: String,
        /// Human-readable description.
        message: String,
        /// Structured diagnostic context.
        #[serde(default)]
        context: BTreeMap<String, serde_json::Value>,
        /// Chain of causes.
        #[serde(default)]
        traceback: Option<String>,
    },
}

impl AuditEventKind {
    /// The serialized tag of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateTransition { .. } => "state_transition",
            Self::SnapshotCreated { .. } => "snapshot_created",
            Self::DmsArmed { .. } => "dms_armed",
            Self::DaemonsDisabled { .. } => "daemons_disabled",
            Self::PayloadLaunched { .. } => "payload_launched",
            Self::Failure { .. } => "failure",
        }
    }
}

/// One timestamped entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event was recorded (ISO 8601, UTC).
    pub timestamp: String,
    /// The event payload.
    #[serde(flatten)]
    pub kind: AuditEventKind,
}
