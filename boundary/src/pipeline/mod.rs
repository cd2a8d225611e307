//! Pipeline execution.
//!
//! This module provides:
//! - The pipeline state machine and its transition table
//! - Retry policies for transient failures
//! - The orchestrator that drives stages and owns the audit log

#[cfg(test)]
mod integration_tests;
mod orchestrator;
mod retry;
mod state;

pub use orchestrator::{Orchestrator, RunReport};
pub use retry::{
    with_retry, BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryState,
};
pub use state::{PipelineState, ALL_STATES, TRANSITIONS};
