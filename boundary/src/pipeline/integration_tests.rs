//! End-to-end tests for pipeline runs.

#[cfg(test)]
mod tests {
    use crate::audit::{AuditEventKind, AuditRecord, CollectingAuditSink, AUDIT_FILE_PREFIX};
    use crate::channel::{CommandChannel, CommandOutput};
    use crate::config::Config;
    use crate::errors::BoundaryError;
    use crate::pipeline::{Orchestrator, PipelineState};
    use crate::stages::{default_stages, BoundaryStage, StageOutcome};
    use crate::testing::{healthy_host, ScriptedChannel, HEALTHY_PAYLOAD_PID};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config_in(dir: &Path, extra: &str) -> Config {
        let json = format!(
            r#"{{
                "host": "studio.lan",
                "ssh_password": "hunter2",
                "permitted_garments": null,
                "payload_binary": "/opt/llm/bin/serve",
                "payload_log": "/var/tmp/boundary/serve.log",
                "settle_seconds": 0,
                "retry": {{"max_attempts": 2, "base_delay_ms": 0, "jitter": "none"}},
                "audit_dir": {dir}
                {extra}
            }}"#,
            dir = serde_json::to_string(dir).unwrap()
        );
        Config::from_json_str(&json).unwrap()
    }

    /// Fails transiently a fixed number of times, then verifies.
    #[derive(Debug)]
    struct FlakyStage {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BoundaryStage for FlakyStage {
        fn name(&self) -> &str {
            "flaky"
        }

        fn target(&self) -> PipelineState {
            PipelineState::Peeping
        }

        async fn run(&self, _channel: &dyn CommandChannel, _config: &Config) -> Result<StageOutcome, BoundaryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(BoundaryError::transient(format!("hiccup {call}")))
            } else {
                Ok(StageOutcome::Verified)
            }
        }
    }

    #[tokio::test]
    async fn test_full_run_over_password_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "");
        let host = Arc::new(healthy_host());
        let sink = Arc::new(CollectingAuditSink::new());

        let report = Orchestrator::new(host.clone(), config)
            .with_sink(sink.clone())
            .run()
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.payload_pid, Some(HEALTHY_PAYLOAD_PID));

        let file_name = report.audit_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with(AUDIT_FILE_PREFIX));
        assert!(file_name.ends_with(".json"));

        let record = AuditRecord::load(&report.audit_path).unwrap();
        assert_eq!(record.event_count, record.events.len());
        assert_eq!(record.events, sink.events());
        assert_eq!(sink.records(), vec![(report.audit_path.clone(), PipelineState::Complete)]);

        let launched = record
            .events
            .iter()
            .find_map(|e| match &e.kind {
                AuditEventKind::PayloadLaunched { pid, binary } => Some((*pid, binary.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(launched, (HEALTHY_PAYLOAD_PID, "/opt/llm/bin/serve".to_string()));

        let launch = &host.calls_matching("nohup nice")[0].0;
        assert!(launch.contains("> /var/tmp/boundary/serve.log 2>&1"));
    }

    #[tokio::test]
    async fn test_every_state_transition_is_a_legal_edge() {
        let dir = tempfile::tempdir().unwrap();
        let report = Orchestrator::new(Arc::new(healthy_host()), config_in(dir.path(), ""))
            .run()
            .await
            .unwrap();

        let record = AuditRecord::load(&report.audit_path).unwrap();
        let mut state = PipelineState::INITIAL;
        for event in &record.events {
            if let AuditEventKind::StateTransition { from, to } = event.kind {
                assert_eq!(from, state);
                assert!(from.can_transition_to(to), "{from} -> {to}");
                state = to;
            }
        }
        assert_eq!(state, record.final_state);
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let report = Orchestrator::new(Arc::new(healthy_host()), config_in(dir.path(), ""))
            .run()
            .await
            .unwrap();

        let record = AuditRecord::load(&report.audit_path).unwrap();
        let stamps: Vec<&str> = record.events.iter().map(|e| e.timestamp.as_str()).collect();
        let mut sorted = stamps.clone();
        sorted.sort_unstable();
        assert_eq!(stamps, sorted);
        assert!(record.started.as_str() <= stamps[0]);
        assert!(stamps[stamps.len() - 1] <= record.finalized.as_str());
    }

    #[tokio::test]
    async fn test_flaky_stage_recovers_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Arc::new(FlakyStage {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let mut stages: Vec<Arc<dyn BoundaryStage>> = vec![flaky.clone()];
        stages.extend(default_stages().into_iter().skip(1));

        let report = Orchestrator::new(Arc::new(healthy_host()), config_in(dir.path(), ""))
            .with_stages(stages)
            .run()
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flaky_stage_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Arc::new(FlakyStage {
            failures: 5,
            calls: AtomicUsize::new(0),
        });

        let report = Orchestrator::new(Arc::new(ScriptedChannel::new()), config_in(dir.path(), ""))
            .with_stages(vec![flaky.clone()])
            .run()
            .await
            .unwrap();

        assert_eq!(report.final_state, PipelineState::Aborted);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        let record = AuditRecord::load(&report.audit_path).unwrap();
        match &record.events[0].kind {
            AuditEventKind::Failure { error_type, message, context, .. } => {
                assert_eq!(error_type, "DeterministicError");
                assert_eq!(message, "hiccup 1");
                assert_eq!(context.get("original_kind"), Some(&serde_json::json!("TransientError")));
                assert_eq!(context.get("attempts"), Some(&serde_json::json!(2)));
                assert_eq!(context.get("stage"), Some(&serde_json::json!("flaky")));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sip_check_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), r#", "require_sip_disabled": false"#);
        let host = Arc::new(healthy_host().on(
            "csrutil status",
            CommandOutput::ok("System Integrity Protection status: enabled.\n"),
        ));

        let report = Orchestrator::new(host.clone(), config).run().await.unwrap();
        assert!(report.succeeded());
        assert!(host.calls_matching("csrutil").is_empty());
    }

    #[tokio::test]
    async fn test_two_runs_write_two_records() {
        let dir = tempfile::tempdir().unwrap();
        let first = Orchestrator::new(Arc::new(healthy_host()), config_in(dir.path(), ""))
            .run()
            .await
            .unwrap();
        let second = Orchestrator::new(Arc::new(healthy_host()), config_in(dir.path(), ""))
            .run()
            .await
            .unwrap();

        assert_ne!(first.audit_path, second.audit_path);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
