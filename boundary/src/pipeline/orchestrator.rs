//! The pipeline orchestrator.
//!
//! Drives the stages in order as a finite-state machine, turns each stage
//! outcome into the matching audit entry, retries transient failures, and
//! guarantees that every run ends with a durable audit record.
//!
//! On success the dead man's switch is disarmed before the run is marked
//! `COMPLETE`. On abort it is left armed so the remote recovery action
//! returns the host to its pre-pipeline state on schedule.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::retry::with_retry;
use super::state::PipelineState;
use crate::audit::{AuditLog, AuditSink, LoggingAuditSink};
use crate::channel::CommandChannel;
use crate::config::Config;
use crate::dms::{ArmedSwitch, DeadMansSwitch};
use crate::errors::{AuditError, BoundaryError};
use crate::observability::StageTimer;
use crate::stages::{default_stages, BoundaryStage, StageOutcome};

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    /// `COMPLETE` or `ABORTED`.
    pub final_state: PipelineState,
    /// Where the durable audit record was written.
    pub audit_path: PathBuf,
    /// Why the run aborted.
    pub error: Option<BoundaryError>,
    /// Remote pid of the workload, if it was launched.
    pub payload_pid: Option<u32>,
    /// The switch left armed on the host, if the run aborted after arming.
    pub armed_switch: Option<ArmedSwitch>,
    /// Wall-clock duration of the run.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns true if the run reached `COMPLETE`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.final_state == PipelineState::Complete
    }
}

#[derive(Debug)]
struct RunState {
    state: PipelineState,
    payload_pid: Option<u32>,
    armed: Option<ArmedSwitch>,
}

/// Runs one pipeline against one host.
pub struct Orchestrator {
    channel: Arc<dyn CommandChannel>,
    config: Config,
    stages: Vec<Arc<dyn BoundaryStage>>,
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("host", &self.config.host)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator running the default stages.
    #[must_use]
    pub fn new(channel: Arc<dyn CommandChannel>, config: Config) -> Self {
        Self {
            channel,
            config,
            stages: default_stages(),
            sink: Arc::new(LoggingAuditSink::default()),
        }
    }

    /// Replaces the stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<Arc<dyn BoundaryStage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Mirrors audit events to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs every stage, then completes or aborts.
    ///
    /// Only fails if the audit record itself cannot be written; every
    /// pipeline failure is reported through [`RunReport::error`].
    pub async fn run(&self) -> Result<RunReport, AuditError> {
        let started = Instant::now();
        let mut log = AuditLog::new(&self.config.audit_dir).with_sink(Arc::clone(&self.sink));
        let mut run = RunState {
            state: PipelineState::INITIAL,
            payload_pid: None,
            armed: None,
        };

        info!(host = %self.config.host, stages = self.stages.len(), "Pipeline started");

        let outcome = match self.advance(&mut log, &mut run).await {
            Ok(()) => self.complete(&mut log, &mut run).await,
            Err(err) => Err(err),
        };

        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                self.abort(&mut log, &mut run, &err);
                Some(err)
            }
        };

        let audit_path = log.finalize(run.state)?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            final_state = %run.state,
            audit_path = %audit_path.display(),
            duration_ms,
            "Pipeline finished"
        );

        Ok(RunReport {
            final_state: run.state,
            audit_path,
            error,
            payload_pid: run.payload_pid,
            armed_switch: if run.state == PipelineState::Aborted { run.armed } else { None },
            duration_ms,
        })
    }

    async fn advance(&self, log: &mut AuditLog, run: &mut RunState) -> Result<(), BoundaryError> {
        let channel = self.channel.as_ref();
        let config = &self.config;

        for stage in &self.stages {
            let stage: &dyn BoundaryStage = stage.as_ref();
            let target = stage.target();
            if !run.state.can_transition_to(target) {
                return Err(BoundaryError::deterministic(format!(
                    "stage {} cannot move the pipeline from {} to {target}",
                    stage.name(),
                    run.state
                ))
                .with_context_entry("stage", stage.name()));
            }

            let timer = StageTimer::start(stage.name());
            let result = with_retry(&config.retry, stage.name(), move || stage.run(channel, config)).await;
            timer.finish(result.is_ok());

            let outcome = result.map_err(|err| err.with_context_entry("stage", stage.name()))?;
            Self::record_outcome(log, run, outcome);
            log.record_state_transition(run.state, target);
            run.state = target;
        }
        Ok(())
    }

    fn record_outcome(log: &mut AuditLog, run: &mut RunState, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Verified => {}
            StageOutcome::SnapshotCreated { snapshot_id } => log.record_snapshot(snapshot_id),
            StageOutcome::DaemonsDisabled { actions } => log.record_disabled_daemons(actions),
            StageOutcome::SwitchArmed(armed) => {
                log.record_dms_armed(armed.pid, armed.timeout_seconds);
                run.armed = Some(armed);
            }
            StageOutcome::PayloadLaunched { pid, binary } => {
                log.record_payload_launched(pid, binary);
                run.payload_pid = Some(pid);
            }
        }
    }

    async fn complete(&self, log: &mut AuditLog, run: &mut RunState) -> Result<(), BoundaryError> {
        if !run.state.can_transition_to(PipelineState::Complete) {
            return Err(BoundaryError::deterministic(format!(
                "pipeline stopped in {} and cannot complete",
                run.state
            )));
        }

        if run.armed.is_some() {
            let switch = DeadMansSwitch::from_config(&self.config);
            let channel = self.channel.as_ref();
            let switch = &switch;
            with_retry(&self.config.retry, "disarm_dead_mans_switch", move || switch.disarm(channel))
                .await
                .map_err(|err| err.with_context_entry("stage", "disarm_dead_mans_switch"))?;
            run.armed = None;
        }

        log.record_state_transition(run.state, PipelineState::Complete);
        run.state = PipelineState::Complete;
        Ok(())
    }

    fn abort(&self, log: &mut AuditLog, run: &mut RunState, err: &BoundaryError) {
        error!(
            state = %run.state,
            error_type = err.kind.type_name(),
            error = %err.message,
            "Pipeline aborted"
        );
        if let Some(armed) = run.armed {
            warn!(
                pid = armed.pid,
                timeout_seconds = armed.timeout_seconds,
                host = %self.config.host,
                "Dead man's switch left armed; recovery will run on the host"
            );
        }

        log.record_error(err);
        log.record_state_transition(run.state, PipelineState::Aborted);
        run.state = PipelineState::Aborted;
    }
}
