//! Append-only audit trail of a pipeline run.
//!
//! Events are kept in memory in insertion order and written exactly once,
//! as a single JSON document, by [`AuditLog::finalize`].

mod event;
mod log;
mod sink;

pub use event::{AuditEvent, AuditEventKind};
pub use log::{AuditLog, AuditRecord, AUDIT_FILE_PREFIX, SCHEMA_VERSION};
pub use sink::{AuditSink, CollectingAuditSink, LoggingAuditSink, NoOpAuditSink};
