//! # Boundary
//!
//! Staged, audited takeover of a remote host.
//!
//! A run verifies the host's identity, snapshots its process table, stops
//! every daemon that is not allowlisted, arms a remote dead man's switch and
//! finally launches a workload at high priority. Each step is a
//! [`stages::BoundaryStage`] driven by the [`pipeline::Orchestrator`] as an
//! explicit state machine, and every run, successful or not, ends with a
//! durable [`audit::AuditRecord`] on disk.
//!
//! - **Classified failures**: every error is either transient (retried) or
//!   deterministic (aborts the run)
//! - **Remote safety net**: the recovery timer lives on the target host, so
//!   it fires even if this process dies
//! - **Pluggable transport**: stages only see a [`channel::CommandChannel`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use boundary::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Config::from_json_file("host.json")?;
//! let channel = Arc::new(SshChannel::from_config(&config));
//! let report = Orchestrator::new(channel, config).run().await?;
//! println!("{} -> {}", report.final_state, report.audit_path.display());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod allowlist;
pub mod audit;
pub mod channel;
pub mod config;
pub mod dms;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::allowlist::{compute_merged_allowlist, AllowlistPolicy, PolicyFlag};
    pub use crate::audit::{
        AuditLog, AuditRecord, AuditSink, CollectingAuditSink, LoggingAuditSink, NoOpAuditSink,
    };
    pub use crate::channel::{CommandChannel, CommandOutput, SshChannel};
    pub use crate::config::{AuthMethod, Config, RawConfig};
    pub use crate::dms::{ArmedSwitch, DeadMansSwitch};
    pub use crate::errors::{AuditError, BoundaryError, ChannelError, ErrorKind};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Orchestrator, PipelineState, RetryPolicy, RunReport};
    pub use crate::stages::{BoundaryStage, StageOutcome};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
