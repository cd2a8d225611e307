//! Host identity verification.

use async_trait::async_trait;
use tracing::{info, warn};

use super::version::parse_version;
use super::{BoundaryStage, StageOutcome};
use crate::channel::{CommandChannel, CommandOutput};
use crate::config::Config;
use crate::errors::BoundaryError;
use crate::pipeline::PipelineState;

const KERNEL_QUERY: &str = "uname -s";
const ARCH_QUERY: &str = "uname -m";
const DARWIN_VERSION_QUERY: &str = "sw_vers -productVersion";
const GENERIC_VERSION_QUERY: &str = "uname -r";
const SIP_QUERY: &str = "csrutil status";
const SIP_STATUS_LABEL: &str = "System Integrity Protection status";

/// Confirms the host is what the configuration says it is.
///
/// Read-only. Every check runs even when an earlier one already failed, so
/// the error lists every mismatch at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnatomyVerification;

impl AnatomyVerification {
    fn version_query(config: &Config) -> &'static str {
        if config.expected_os.eq_ignore_ascii_case("darwin") {
            DARWIN_VERSION_QUERY
        } else {
            GENERIC_VERSION_QUERY
        }
    }

    fn check_equal(output: &CommandOutput, label: &str, expected: &str, mismatches: &mut Vec<String>) {
        if !output.success() {
            mismatches.push(format!(
                "{label} query failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
            return;
        }
        let got = output.stdout_trimmed();
        if got != expected {
            mismatches.push(format!("{label} mismatch: expected {expected}, got {got}"));
        }
    }

    fn check_version(output: &CommandOutput, minimum: &str, mismatches: &mut Vec<String>) {
        if !output.success() {
            mismatches.push(format!(
                "OS version query failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
            return;
        }
        let reported = output.stdout_trimmed();
        if parse_version(reported) < parse_version(minimum) {
            mismatches.push(format!("OS version {reported} is below minimum {minimum}"));
        }
    }

    /// Value of the overall `System Integrity Protection status:` line.
    ///
    /// Per-feature lines of a custom configuration are ignored; only the
    /// headline status decides.
    fn sip_status(stdout: &str) -> Option<&str> {
        stdout.lines().find_map(|line| {
            let (label, value) = line.split_once(':')?;
            label
                .trim()
                .eq_ignore_ascii_case(SIP_STATUS_LABEL)
                .then(|| value.trim())
        })
    }

    fn check_sip(output: &CommandOutput, mismatches: &mut Vec<String>) {
        if !output.success() && output.stdout_trimmed().is_empty() {
            mismatches.push(format!(
                "SIP status query failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
            return;
        }
        let disabled = Self::sip_status(&output.stdout)
            .is_some_and(|status| status.to_ascii_lowercase().starts_with("disabled"));
        if !disabled {
            mismatches.push(format!(
                "SIP must be disabled, status is: {}",
                Self::sip_status(&output.stdout).unwrap_or_else(|| output.stdout_trimmed())
            ));
        }
    }
}

#[async_trait]
impl BoundaryStage for AnatomyVerification {
    fn name(&self) -> &str {
        "anatomy_verification"
    }

    fn target(&self) -> PipelineState {
        PipelineState::Peeping
    }

    async fn run(&self, channel: &dyn CommandChannel, config: &Config) -> Result<StageOutcome, BoundaryError> {
        let mut mismatches = Vec::new();

        let kernel = channel.execute(KERNEL_QUERY, false).await?;
        Self::check_equal(&kernel, "OS", &config.expected_os, &mut mismatches);

        let arch = channel.execute(ARCH_QUERY, false).await?;
        Self::check_equal(&arch, "Architecture", &config.expected_arch, &mut mismatches);

        let version = channel.execute(Self::version_query(config), false).await?;
        Self::check_version(&version, &config.min_os_version, &mut mismatches);

        if config.require_sip_disabled {
            let sip = channel.execute(SIP_QUERY, false).await?;
            Self::check_sip(&sip, &mut mismatches);
        }

        if mismatches.is_empty() {
            info!(host = %config.host, "Host anatomy verified");
            return Ok(StageOutcome::Verified);
        }

        warn!(host = %config.host, count = mismatches.len(), "Host anatomy mismatch");
        Err(BoundaryError::deterministic(mismatches.join("; "))
            .with_context_entry("mismatches", &mismatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockCommandChannel;
    use crate::testing::{test_config, ScriptedChannel, ScriptedReply};

    fn matching_host() -> ScriptedChannel {
        ScriptedChannel::new()
            .on(KERNEL_QUERY, CommandOutput::ok("Darwin\n"))
            .on(ARCH_QUERY, CommandOutput::ok("arm64\n"))
            .on(DARWIN_VERSION_QUERY, CommandOutput::ok("14.2.1\n"))
            .on(SIP_QUERY, CommandOutput::ok("System Integrity Protection status: disabled.\n"))
    }

    fn wrong_host(sip_output: &str) -> ScriptedChannel {
        ScriptedChannel::new()
            .on(KERNEL_QUERY, CommandOutput::ok("Linux\n"))
            .on(ARCH_QUERY, CommandOutput::ok("x86_64\n"))
            .on(DARWIN_VERSION_QUERY, CommandOutput::ok("10.9\n"))
            .on(SIP_QUERY, CommandOutput::ok(sip_output))
    }

    fn mismatch_list(err: &BoundaryError) -> Vec<String> {
        serde_json::from_value(err.context["mismatches"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_matching_host_verifies() {
        let channel = matching_host();
        let outcome = AnatomyVerification.run(&channel, &test_config()).await.unwrap();
        assert_eq!(outcome, StageOutcome::Verified);
        assert_eq!(channel.calls().len(), 4);
        assert!(channel.calls().iter().all(|(_, sudo)| !sudo));
    }

    #[tokio::test]
    async fn test_collects_all_three_mismatches() {
        let mut config = test_config();
        config.require_sip_disabled = false;
        config.min_os_version = "10.10".to_string();

        let channel = wrong_host("");
        let err = AnatomyVerification.run(&channel, &config).await.unwrap_err();

        assert!(err.is_deterministic());
        let mismatches = mismatch_list(&err);
        assert_eq!(mismatches.len(), 3);
        assert_eq!(err.message, mismatches.join("; "));
        assert!(err.message.contains("expected Darwin, got Linux"));
        assert!(err.message.contains("expected arm64, got x86_64"));
        assert!(err.message.contains("10.9 is below minimum 10.10"));
        assert_eq!(channel.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_collects_four_mismatches_with_sip() {
        let mut config = test_config();
        config.min_os_version = "10.10".to_string();

        let channel = wrong_host("System Integrity Protection status: enabled.\n");
        let err = AnatomyVerification.run(&channel, &config).await.unwrap_err();

        assert_eq!(mismatch_list(&err).len(), 4);
        assert!(err.message.contains("SIP must be disabled"));
    }

    #[tokio::test]
    async fn test_custom_sip_configuration_is_rejected() {
        let channel = matching_host().on(
            SIP_QUERY,
            CommandOutput::ok(
                "System Integrity Protection status: enabled (Custom Configuration).\n\n\
                 Configuration:\n\
                 \tApple Internal: disabled\n\
                 \tKext Signing: disabled\n\
                 \tFilesystem Protections: enabled\n\
                 \tDebugging Restrictions: disabled\n",
            ),
        );
        let err = AnatomyVerification.run(&channel, &test_config()).await.unwrap_err();

        assert!(err.is_deterministic());
        assert_eq!(
            mismatch_list(&err),
            vec!["SIP must be disabled, status is: enabled (Custom Configuration).".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_sip_status_is_rejected() {
        let channel = matching_host().on(
            SIP_QUERY,
            CommandOutput::ok("System Integrity Protection status: unknown (Custom Configuration).\n"),
        );
        let err = AnatomyVerification.run(&channel, &test_config()).await.unwrap_err();
        assert_eq!(mismatch_list(&err).len(), 1);

        let channel = matching_host().on(SIP_QUERY, CommandOutput::ok("Kext Signing: disabled\n"));
        assert!(AnatomyVerification.run(&channel, &test_config()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_version_query_is_a_mismatch() {
        let channel = matching_host().on_first(
            DARWIN_VERSION_QUERY,
            CommandOutput::new(127, "", "sw_vers: command not found"),
        );
        let err = AnatomyVerification.run(&channel, &test_config()).await.unwrap_err();

        assert!(err.is_deterministic());
        assert_eq!(mismatch_list(&err).len(), 1);
        assert!(err.message.contains("exit code 127"));
    }

    #[tokio::test]
    async fn test_version_prefix_is_below_minimum() {
        let mut config = test_config();
        config.min_os_version = "13.0".to_string();
        let channel = matching_host().on(DARWIN_VERSION_QUERY, CommandOutput::ok("13\n"));

        let err = AnatomyVerification.run(&channel, &config).await.unwrap_err();
        assert_eq!(mismatch_list(&err), vec!["OS version 13 is below minimum 13.0".to_string()]);
    }

    #[tokio::test]
    async fn test_channel_failure_is_transient() {
        let channel = matching_host().on_first(ARCH_QUERY, ScriptedReply::Timeout);
        let err = AnatomyVerification.run(&channel, &test_config()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_exactly_three_queries_without_sip_check() {
        let mut config = test_config();
        config.require_sip_disabled = false;

        let mut channel = MockCommandChannel::new();
        channel
            .expect_execute()
            .withf(|command, sudo| command == KERNEL_QUERY && !*sudo)
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("Darwin")));
        channel
            .expect_execute()
            .withf(|command, _| command == ARCH_QUERY)
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("arm64")));
        channel
            .expect_execute()
            .withf(|command, _| command == DARWIN_VERSION_QUERY)
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("13.0")));
        channel
            .expect_execute()
            .withf(|command, _| command == SIP_QUERY)
            .never();

        let outcome = AnatomyVerification.run(&channel, &config).await.unwrap();
        assert_eq!(outcome, StageOutcome::Verified);
    }

    #[tokio::test]
    async fn test_generic_os_uses_uname_release() {
        let mut config = test_config();
        config.expected_os = "Linux".to_string();
        config.expected_arch = "x86_64".to_string();
        config.min_os_version = "5.10".to_string();
        config.require_sip_disabled = false;

        let channel = ScriptedChannel::new()
            .on(KERNEL_QUERY, CommandOutput::ok("Linux"))
            .on(ARCH_QUERY, CommandOutput::ok("x86_64"))
            .on(GENERIC_VERSION_QUERY, CommandOutput::ok("5.15.0-91-generic"));

        let outcome = AnatomyVerification.run(&channel, &config).await.unwrap();
        assert_eq!(outcome, StageOutcome::Verified);
    }
}
