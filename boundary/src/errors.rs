//! Error types for the boundary pipeline.
//!
//! Every failure raised by a stage, the dead man's switch or the
//! configuration layer is a [`BoundaryError`] carrying exactly one
//! [`ErrorKind`]. The orchestrator is the only place that looks at the kind
//! to decide between retrying and aborting.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The two failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Expected to resolve on retry (network timeouts, dropped channels).
    Transient,
    /// Requires a configuration or code change; never retried.
    Deterministic,
}

impl ErrorKind {
    /// Name written into audit records.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Transient => "TransientError",
            Self::Deterministic => "DeterministicError",
        }
    }

    /// Returns true if the failure is eligible for retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A classified pipeline failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct BoundaryError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Structured context for offline diagnosis.
    pub context: BTreeMap<String, serde_json::Value>,
    /// Chain of underlying causes, outermost first.
    pub traceback: Option<String>,
}

impl BoundaryError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            traceback: None,
        }
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Creates a deterministic error.
    #[must_use]
    pub fn deterministic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deterministic, message)
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.context.insert(key.into(), value);
        self
    }

    /// Records the `source()` chain of `err` as the traceback.
    #[must_use]
    pub fn with_source_chain(mut self, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut lines = vec![err.to_string()];
        let mut current = err.source();
        while let Some(cause) = current {
            lines.push(format!("caused by: {cause}"));
            current = cause.source();
        }
        self.traceback = Some(lines.join("\n"));
        self
    }

    /// Returns true if this error may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns true if this error must abort the run.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        matches!(self.kind, ErrorKind::Deterministic)
    }
}

/// Failures of the command transport itself.
///
/// These never describe what the remote command did, only that it could not
/// be run to completion. All of them are transient.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The local transport process could not be started.
    #[error("failed to spawn transport: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading from or writing to the transport failed.
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The command did not finish within the channel's deadline.
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// The deadline that elapsed.
        seconds: u64,
    },

    /// The connection to the remote host was lost or refused.
    #[error("connection to {host} failed: {detail}")]
    Connection {
        /// Target host.
        host: String,
        /// Transport diagnostic, usually the client's stderr.
        detail: String,
    },
}

impl From<ChannelError> for BoundaryError {
    fn from(err: ChannelError) -> Self {
        let message = err.to_string();
        Self::transient(message).with_source_chain(&err)
    }
}

/// Failures while persisting the audit record.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit directory could not be created or written.
    #[error("cannot write audit record {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialized.
    #[error("cannot serialize audit record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every candidate file name was already taken.
    #[error("no free audit file name for stamp {stamp}")]
    NameExhausted {
        /// The timestamp stem that collided.
        stamp: String,
    },
}
