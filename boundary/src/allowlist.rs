//! Allowlist of processes ("garments") that keep running on the target.
//!
//! The effective allowlist is the union of an immutable core set, the
//! conditional sets whose flag is enabled, and whatever the operator listed
//! in the configuration. The merge never fails and never drops a core entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Version tag of the built-in core and conditional sets.
pub const CORE_SET_VERSION: &str = "1";

/// Processes that must survive any quiesce: the kernel, init, the remote
/// login path, the shells the pipeline itself runs in, and the daemons the
/// workload's sleep inhibitor talks to.
///
/// Names are matched against `comm`, which Linux truncates to 15 bytes, so
/// `systemd-journald` also appears as `systemd-journal`.
pub const DEFAULT_CORE_SET: &[&str] = &[
    "kernel_task",
    "launchd",
    "init",
    "systemd",
    "sshd",
    "sshd-session",
    "login",
    "sh",
    "bash",
    "zsh",
    "sudo",
    "ps",
    "sleep",
    "nohup",
    "caffeinate",
    "powerd",
    "systemd-inhibit",
    "systemd-logind",
    "dbus-daemon",
    "dbus-broker",
    "systemd-journald",
    "systemd-journal",
    "logd",
    "syslogd",
    "kextd",
    "securityd",
    "opendirectoryd",
];

/// Processes that keep the host reachable over the network.
pub const DEFAULT_NETWORK_SURVIVAL_SET: &[&str] = &[
    "configd",
    "mDNSResponder",
    "networkd",
    "wifid",
    "airportd",
    "symptomsd",
    "apsd",
    "networkserviceproxy",
];

/// Flags that switch conditional sets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyFlag {
    /// Keep the network stack alive while quiesced.
    NetworkSurvival,
}

/// A set of process names included only when its flag is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalSet {
    /// Triggering flag.
    pub flag: PolicyFlag,
    /// Process names.
    pub entries: BTreeSet<String>,
}

impl ConditionalSet {
    /// Creates a conditional set from string slices.
    #[must_use]
    pub fn new(flag: PolicyFlag, entries: &[&str]) -> Self {
        Self {
            flag,
            entries: entries.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Computes the merged allowlist.
///
/// `user_entries` of `None` is the same as an empty list.
#[must_use]
pub fn compute_merged_allowlist<S: AsRef<str>>(
    immutable_core: &BTreeSet<String>,
    conditional_sets: &[ConditionalSet],
    user_entries: Option<&[S]>,
    flags: &BTreeSet<PolicyFlag>,
) -> BTreeSet<String> {
    let mut merged = immutable_core.clone();

    for set in conditional_sets.iter().filter(|set| flags.contains(&set.flag)) {
        merged.extend(set.entries.iter().cloned());
    }

    merged.extend(
        user_entries
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.as_ref().trim())
            .filter(|entry| !entry.is_empty())
            .map(String::from),
    );

    merged
}

/// The versioned core set plus its conditional sets.
///
/// Passed explicitly into the components that need it; nothing reads a
/// process-wide default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistPolicy {
    /// Version of the sets.
    pub version: String,
    /// Always-included entries.
    pub core: BTreeSet<String>,
    /// Flag-gated entries.
    pub conditional: Vec<ConditionalSet>,
}

impl Default for AllowlistPolicy {
    fn default() -> Self {
        Self {
            version: CORE_SET_VERSION.to_string(),
            core: DEFAULT_CORE_SET.iter().map(|s| (*s).to_string()).collect(),
            conditional: vec![ConditionalSet::new(
                PolicyFlag::NetworkSurvival,
                DEFAULT_NETWORK_SURVIVAL_SET,
            )],
        }
    }
}

impl AllowlistPolicy {
    /// Creates a policy with the built-in sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds entries to the core set.
    #[must_use]
    pub fn with_core_entries(mut self, entries: &[&str]) -> Self {
        self.core.extend(entries.iter().map(|s| (*s).to_string()));
        self
    }

    /// Adds a conditional set.
    #[must_use]
    pub fn with_conditional(mut self, set: ConditionalSet) -> Self {
        self.conditional.push(set);
        self
    }

    /// Merges the policy with the operator's entries.
    #[must_use]
    pub fn merge<S: AsRef<str>>(
        &self,
        user_entries: Option<&[S]>,
        flags: &BTreeSet<PolicyFlag>,
    ) -> BTreeSet<String> {
        compute_merged_allowlist(&self.core, &self.conditional, user_entries, flags)
    }
}
