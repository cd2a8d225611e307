//! Classification of opaque transport failures.
//!
//! This is the only place in the crate that inspects failure text. The
//! `ssh` client exits with 255 both when it cannot reach the host and when
//! the remote command itself exits 255, so stderr decides which one it was.

use regex::Regex;
use std::sync::LazyLock;

/// Exit status the `ssh` client uses for its own errors.
pub const SSH_CLIENT_FAILURE: i32 = 255;

#[allow(clippy::expect_used)]
static CONNECTION_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(connection (refused|reset|timed out|closed)|could not resolve|network is unreachable|no route to host|broken pipe|operation timed out|kex_exchange_identification)",
    )
    .expect("connection failure pattern is valid")
});

/// Returns true if an `ssh` exit status and stderr describe a lost or
/// refused connection rather than a failed remote command.
#[must_use]
pub fn is_connection_failure(exit_code: i32, stderr: &str) -> bool {
    exit_code == SSH_CLIENT_FAILURE && CONNECTION_FAILURE.is_match(stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_phrases() {
        assert!(is_connection_failure(255, "ssh: connect to host h port 22: Connection refused"));
        assert!(is_connection_failure(255, "Connection reset by peer"));
        assert!(is_connection_failure(255, "ssh: Could not resolve hostname nope"));
        assert!(is_connection_failure(255, "client_loop: send disconnect: Broken pipe"));
    }

    #[test]
    fn test_remote_failures_are_not_connection_failures() {
        assert!(!is_connection_failure(255, "payload: exited with 255"));
        assert!(!is_connection_failure(1, "Connection refused"));
        assert!(!is_connection_failure(0, ""));
    }
}
