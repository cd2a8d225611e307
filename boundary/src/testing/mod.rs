//! Testing utilities for boundary pipelines.
//!
//! This module provides:
//! - A scripted command channel that records every call
//! - A fast test configuration
//! - A host on which the default pipeline succeeds

mod fixtures;
mod scripted;

pub use fixtures::{
    healthy_host, test_config, HEALTHY_PAYLOAD_PID, HEALTHY_PROCESS_TABLE, HEALTHY_WATCHDOG_PID,
    TEST_CONFIG_JSON,
};
pub use scripted::{ScriptedChannel, ScriptedReply};
