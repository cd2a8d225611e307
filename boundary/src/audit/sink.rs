//! Observers of the audit trail.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};

use super::event::{AuditEvent, AuditEventKind};
use crate::pipeline::PipelineState;

/// Receives a copy of every audit event as it is recorded.
///
/// Sinks only observe: they cannot fail and never change what ends up in
/// the durable record.
pub trait AuditSink: Send + Sync {
    /// Called after an event has been appended.
    fn observe(&self, event: &AuditEvent);

    /// Called after the durable record has been written.
    fn finalized(&self, _path: &Path, _final_state: PipelineState) {}
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn observe(&self, _event: &AuditEvent) {}
}

/// A sink that mirrors events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingAuditSink {
    level: Level,
}

impl Default for LoggingAuditSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingAuditSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl AuditSink for LoggingAuditSink {
    fn observe(&self, event: &AuditEvent) {
        let name = event.kind.name();
        if let AuditEventKind::Failure { error_type, message, .. } = &event.kind {
            tracing::error!(event = name, error_type = %error_type, "{message}");
            return;
        }

        let data = serde_json::to_string(&event.kind).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event = name, data = %data, "Audit: {name}");
        } else {
            info!(event = name, data = %data, "Audit: {name}");
        }
    }

    fn finalized(&self, path: &Path, final_state: PipelineState) {
        info!(path = %path.display(), final_state = %final_state, "Audit record written");
    }
}

/// A sink that keeps everything it sees, for tests.
#[derive(Debug, Default)]
pub struct CollectingAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    records: RwLock<Vec<(PathBuf, PipelineState)>>,
}

impl CollectingAuditSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All observed events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Names of all observed events, in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.kind.name()).collect()
    }

    /// Every finalize notification.
    #[must_use]
    pub fn records(&self) -> Vec<(PathBuf, PipelineState)> {
        self.records.read().clone()
    }
}

impl AuditSink for CollectingAuditSink {
    fn observe(&self, event: &AuditEvent) {
        self.events.write().push(event.clone());
    }

    fn finalized(&self, path: &Path, final_state: PipelineState) {
        self.records.write().push((path.to_path_buf(), final_state));
    }
}
