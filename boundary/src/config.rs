//! Pipeline configuration.
//!
//! [`RawConfig`] mirrors the on-disk JSON document, where list fields may be
//! `null`. [`Config`] is the validated, read-only snapshot every component
//! receives; it can only be obtained through [`Config::try_from`].

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::allowlist::{AllowlistPolicy, PolicyFlag};
use crate::errors::BoundaryError;
use crate::pipeline::RetryPolicy;

/// Message used when no credential is configured.
pub const MISSING_AUTH_MESSAGE: &str = "Either ssh_key_path or ssh_password must be provided";

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

fn default_expected_os() -> String {
    "Darwin".to_string()
}

fn default_expected_arch() -> String {
    "arm64".to_string()
}

fn default_min_os_version() -> String {
    "13.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_nice() -> i32 {
    -20
}

fn default_payload_log() -> String {
    "/var/tmp/boundary/payload.log".to_string()
}

fn default_state_dir() -> String {
    "/var/tmp/boundary".to_string()
}

fn default_dms_timeout() -> u64 {
    300
}

fn default_settle() -> u64 {
    2
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Treats an explicit `null` list the same as an absent one.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Configuration as loaded from JSON, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    /// Target host name or address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote login user.
    #[serde(default = "default_username")]
    pub username: String,
    /// Private key file.
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,
    /// Login password.
    #[serde(default)]
    pub ssh_password: Option<String>,
    /// Expected `uname -s`.
    #[serde(default = "default_expected_os")]
    pub expected_os: String,
    /// Expected `uname -m`.
    #[serde(default = "default_expected_arch")]
    pub expected_arch: String,
    /// Minimum OS version, dotted.
    #[serde(default = "default_min_os_version")]
    pub min_os_version: String,
    /// Whether System Integrity Protection must be disabled.
    #[serde(default = "default_true")]
    pub require_sip_disabled: bool,
    /// Extra processes allowed to keep running.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub permitted_garments: Vec<String>,
    /// Keep the network stack alive.
    #[serde(default)]
    pub network_survival: bool,
    /// Scheduling niceness for the workload.
    #[serde(default = "default_nice")]
    pub nice: i32,
    /// Absolute path of the workload binary on the target.
    pub payload_binary: String,
    /// Where the workload's output is redirected.
    #[serde(default = "default_payload_log")]
    pub payload_log: String,
    /// Remote directory for snapshots, pid files and the watchdog.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Dead man's switch timeout.
    #[serde(default = "default_dms_timeout")]
    pub dms_timeout_seconds: u64,
    /// Overrides the default recovery action.
    #[serde(default)]
    pub recovery_command: Option<String>,
    /// Wait before probing the launched workload.
    #[serde(default = "default_settle")]
    pub settle_seconds: u64,
    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Local directory for audit records.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
}

/// Credential used to open the command channel.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Private key file.
    Key(PathBuf),
    /// Password.
    Password(String),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(path) => f.debug_tuple("Key").field(path).finish(),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target host.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Remote login user.
    pub username: String,
    /// Credential.
    pub auth: AuthMethod,
    /// Expected kernel name.
    pub expected_os: String,
    /// Expected CPU architecture.
    pub expected_arch: String,
    /// Minimum OS version.
    pub min_os_version: String,
    /// Whether SIP must be disabled.
    pub require_sip_disabled: bool,
    /// Operator-supplied allowlist entries.
    pub permitted_garments: Vec<String>,
    /// Keep the network stack alive.
    pub network_survival: bool,
    /// Workload niceness.
    pub nice: i32,
    /// Workload binary.
    pub payload_binary: String,
    /// Workload log path.
    pub payload_log: String,
    /// Remote state directory.
    pub state_dir: String,
    /// Watchdog timeout in seconds.
    pub dms_timeout_seconds: u64,
    /// Custom recovery action.
    pub recovery_command: Option<String>,
    /// Settle interval after launch.
    pub settle: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Local audit directory.
    pub audit_dir: PathBuf,
    /// Allowlist sets.
    pub allowlist: AllowlistPolicy,
}

impl TryFrom<RawConfig> for Config {
    type Error = BoundaryError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let auth = match (raw.ssh_key_path, raw.ssh_password) {
            (Some(path), _) => AuthMethod::Key(path),
            (None, Some(password)) => AuthMethod::Password(password),
            (None, None) => return Err(BoundaryError::deterministic(MISSING_AUTH_MESSAGE)),
        };

        if raw.host.trim().is_empty() {
            return Err(BoundaryError::deterministic("host must not be empty"));
        }
        if !(-20..=19).contains(&raw.nice) {
            return Err(BoundaryError::deterministic(format!(
                "nice must be between -20 and 19, got {}",
                raw.nice
            ))
            .with_context_entry("nice", raw.nice));
        }
        if raw.dms_timeout_seconds == 0 {
            return Err(BoundaryError::deterministic(
                "dms_timeout_seconds must be greater than zero",
            ));
        }
        if raw.payload_binary.trim().is_empty() {
            return Err(BoundaryError::deterministic("payload_binary must not be empty"));
        }

        Ok(Self {
            host: raw.host,
            port: raw.port,
            username: raw.username,
            auth,
            expected_os: raw.expected_os,
            expected_arch: raw.expected_arch,
            min_os_version: raw.min_os_version,
            require_sip_disabled: raw.require_sip_disabled,
            permitted_garments: raw.permitted_garments,
            network_survival: raw.network_survival,
            nice: raw.nice,
            payload_binary: raw.payload_binary,
            payload_log: raw.payload_log,
            state_dir: raw.state_dir,
            dms_timeout_seconds: raw.dms_timeout_seconds,
            recovery_command: raw.recovery_command,
            settle: Duration::from_secs(raw.settle_seconds),
            retry: raw.retry,
            audit_dir: raw.audit_dir,
            allowlist: AllowlistPolicy::default(),
        })
    }
}

impl Config {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, BoundaryError> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|e| {
            BoundaryError::deterministic(format!("invalid configuration: {e}"))
                .with_context_entry("line", e.line())
                .with_context_entry("column", e.column())
        })?;
        Self::try_from(raw)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BoundaryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BoundaryError::deterministic(format!("cannot read {}: {e}", path.display()))
                .with_source_chain(&e)
        })?;
        Self::from_json_str(&text)
    }

    /// Replaces the allowlist sets.
    #[must_use]
    pub fn with_allowlist(mut self, allowlist: AllowlistPolicy) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Enabled policy flags.
    #[must_use]
    pub fn policy_flags(&self) -> BTreeSet<PolicyFlag> {
        let mut flags = BTreeSet::new();
        if self.network_survival {
            flags.insert(PolicyFlag::NetworkSurvival);
        }
        flags
    }

    /// The effective allowlist; always contains the whole core set.
    #[must_use]
    pub fn merged_allowlist(&self) -> BTreeSet<String> {
        self.allowlist
            .merge(Some(self.permitted_garments.as_slice()), &self.policy_flags())
    }
}
