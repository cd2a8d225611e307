//! Ready-made configurations and hosts.

use super::scripted::ScriptedChannel;
use crate::channel::CommandOutput;
use crate::config::Config;

/// Pid the healthy host reports for the launched workload.
pub const HEALTHY_PAYLOAD_PID: u32 = 4242;

/// Pid the healthy host reports for the armed watchdog.
pub const HEALTHY_WATCHDOG_PID: u32 = 777;

/// Process table served by [`healthy_host`].
pub const HEALTHY_PROCESS_TABLE: &str = "    1 /sbin/launchd
   88 /usr/sbin/sshd
  301 /System/Library/CoreServices/Spotlight.app/Contents/MacOS/Spotlight
  302 /usr/sbin/cfprefsd
  310 /usr/libexec/configd
  410 /bin/zsh
";

/// The configuration document behind [`test_config`].
pub const TEST_CONFIG_JSON: &str = r#"{
    "host": "mac-mini.local",
    "ssh_key_path": "/home/op/.ssh/id_ed25519",
    "payload_binary": "/usr/local/bin/payload",
    "settle_seconds": 0,
    "retry": {"max_attempts": 3, "base_delay_ms": 0, "max_delay_ms": 0, "jitter": "none"}
}"#;

/// A valid configuration for an Apple Silicon host, with no settle wait
/// and instant retries.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_config() -> Config {
    Config::from_json_str(TEST_CONFIG_JSON).expect("test configuration is valid")
}

/// A host that lets every stage of the default pipeline succeed.
///
/// `Spotlight`, `cfprefsd` and `configd` are outside the default allowlist
/// (`configd` is spared only with `network_survival`); all of them stop
/// cleanly.
#[must_use]
pub fn healthy_host() -> ScriptedChannel {
    ScriptedChannel::new()
        .on("uname -s", CommandOutput::ok("Darwin\n"))
        .on("uname -m", CommandOutput::ok("arm64\n"))
        .on("sw_vers -productVersion", CommandOutput::ok("14.2.1\n"))
        .on(
            "csrutil status",
            CommandOutput::ok("System Integrity Protection status: disabled.\n"),
        )
        .on("snapshot-", CommandOutput::ok(""))
        .on("ps -axo pid=,comm=", CommandOutput::ok(HEALTHY_PROCESS_TABLE))
        .on("kill -STOP", CommandOutput::ok("301\n302\n310\n"))
        .on("nohup sh -c", CommandOutput::ok(format!("{HEALTHY_WATCHDOG_PID}\n")))
        .on("pid=$(cat", CommandOutput::ok(format!("{HEALTHY_WATCHDOG_PID}\n")))
        .on("nohup nice", CommandOutput::ok(format!("{HEALTHY_PAYLOAD_PID}\n")))
        .on("kill -0", CommandOutput::ok(""))
}
