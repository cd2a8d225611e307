//! The in-memory audit log and its durable record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::event::{AuditEvent, AuditEventKind};
use super::sink::{AuditSink, NoOpAuditSink};
use crate::errors::{AuditError, BoundaryError};
use crate::pipeline::PipelineState;
use crate::utils::{compact_stamp, format_iso8601, now_utc, Timestamp};

/// Version of the record layout.
pub const SCHEMA_VERSION: &str = "1.0";

/// File name prefix of durable records.
pub const AUDIT_FILE_PREFIX: &str = "ban_audit_";

const MAX_NAME_ATTEMPTS: usize = 1000;

/// The durable form of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record layout version.
    pub schema_version: String,
    /// When the log was created.
    pub started: String,
    /// When the log was finalized.
    pub finalized: String,
    /// Terminal state of the run.
    pub final_state: PipelineState,
    /// Number of events.
    pub event_count: usize,
    /// SHA-256 over the serialized `events` array.
    pub events_sha256: String,
    /// Every event, in insertion order.
    pub events: Vec<AuditEvent>,
}

impl AuditRecord {
    /// Reads a record from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Returns true if `events_sha256` matches the events.
    #[must_use]
    pub fn verify_digest(&self) -> bool {
        digest_events(&self.events).is_ok_and(|digest| digest == self.events_sha256)
    }
}

fn digest_events(events: &[AuditEvent]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(events)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Append-only record of one pipeline run.
///
/// Owned by the orchestrator for the whole run. Timestamps are taken when
/// each event is appended and never go backwards within one log.
pub struct AuditLog {
    output_dir: PathBuf,
    started: Timestamp,
    last_stamp: Timestamp,
    events: Vec<AuditEvent>,
    sink: Arc<dyn AuditSink>,
    written: Option<PathBuf>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("output_dir", &self.output_dir)
            .field("started", &self.started)
            .field("events", &self.events.len())
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Creates an empty log that will be written into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let started = now_utc();
        Self {
            output_dir: output_dir.into(),
            started,
            last_stamp: started,
            events: Vec::new(),
            sink: Arc::new(NoOpAuditSink),
            written: None,
        }
    }

    /// Mirrors every event to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Recorded events so far.
    #[must_use]
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Where the record was written, once finalized.
    #[must_use]
    pub fn written_path(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    fn stamp(&mut self) -> String {
        let now = now_utc().max(self.last_stamp);
        self.last_stamp = now;
        format_iso8601(&now)
    }

    fn push(&mut self, kind: AuditEventKind) {
        let event = AuditEvent {
            timestamp: self.stamp(),
            kind,
        };
        self.sink.observe(&event);
        self.events.push(event);
    }

    /// Records a state change.
    pub fn record_state_transition(&mut self, from: PipelineState, to: PipelineState) {
        self.push(AuditEventKind::StateTransition { from, to });
    }

    /// Records a snapshot.
    pub fn record_snapshot(&mut self, snapshot_id: impl Into<String>) {
        self.push(AuditEventKind::SnapshotCreated {
            snapshot_id: snapshot_id.into(),
        });
    }

    /// Records that the dead man's switch was armed.
    pub fn record_dms_armed(&mut self, pid: u32, timeout_seconds: u64) {
        self.push(AuditEventKind::DmsArmed { pid, timeout_seconds });
    }

    /// Records the processes that were stopped.
    pub fn record_disabled_daemons(&mut self, actions: Vec<String>) {
        self.push(AuditEventKind::DaemonsDisabled {
            count: actions.len(),
            actions,
        });
    }

    /// Records the workload launch.
    pub fn record_payload_launched(&mut self, pid: u32, binary: impl Into<String>) {
        self.push(AuditEventKind::PayloadLaunched {
            pid,
            binary: binary.into(),
        });
    }

    /// Records a failure.
    pub fn record_failure(
        &mut self,
        error_type: impl Into<String>,
        message: impl Into<String>,
        context: Option<BTreeMap<String, serde_json::Value>>,
        traceback: Option<String>,
    ) {
        self.push(AuditEventKind::Failure {
            error_type: error_type.into(),
            message: message.into(),
            context: context.unwrap_or_default(),
            traceback,
        });
    }

    /// Records a classified error.
    pub fn record_error(&mut self, error: &BoundaryError) {
        self.record_failure(
            error.kind.type_name(),
            error.message.clone(),
            Some(error.context.clone()),
            error.traceback.clone(),
        );
    }

    /// Builds the record without writing it.
    pub fn to_record(&self, final_state: PipelineState) -> Result<AuditRecord, AuditError> {
        Ok(AuditRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            started: format_iso8601(&self.started),
            finalized: format_iso8601(&now_utc().max(self.last_stamp)),
            final_state,
            event_count: self.events.len(),
            events_sha256: digest_events(&self.events)?,
            events: self.events.clone(),
        })
    }

    /// Writes the durable record and returns its path.
    ///
    /// The file is named after the finalize time; a numeric suffix is added
    /// if that name is taken. Calling this again returns the first path and
    /// writes nothing. If the record cannot be written its full content is
    /// logged at error level before the error is returned.
    pub fn finalize(&mut self, final_state: PipelineState) -> Result<PathBuf, AuditError> {
        if let Some(path) = &self.written {
            tracing::warn!(path = %path.display(), "Audit log already finalized");
            return Ok(path.clone());
        }

        let finalized_at = now_utc().max(self.last_stamp);
        let mut record = self.to_record(final_state)?;
        record.finalized = format_iso8601(&finalized_at);
        let body = serde_json::to_string_pretty(&record)?;

        match self.write_unique(&compact_stamp(&finalized_at), body.as_bytes()) {
            Ok(path) => {
                self.sink.finalized(&path, final_state);
                self.written = Some(path.clone());
                Ok(path)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    final_state = %final_state,
                    record = %body,
                    "Audit record could not be written"
                );
                Err(err)
            }
        }
    }

    fn write_unique(&self, stamp: &str, body: &[u8]) -> Result<PathBuf, AuditError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| AuditError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{AUDIT_FILE_PREFIX}{stamp}.json")
            } else {
                format!("{AUDIT_FILE_PREFIX}{stamp}_{attempt}.json")
            };
            let path = self.output_dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(AuditError::Io { path, source }),
            };

            write_or_discard(&path, move || {
                file.write_all(body)?;
                file.sync_all()
            })?;
            return Ok(path);
        }

        Err(AuditError::NameExhausted {
            stamp: stamp.to_string(),
        })
    }
}

/// Runs `write` against the freshly created `path`, removing the file if
/// the write fails so no truncated record is left behind.
fn write_or_discard(path: &Path, write: impl FnOnce() -> std::io::Result<()>) -> Result<(), AuditError> {
    write().map_err(|source| {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial audit record");
        }
        AuditError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}
