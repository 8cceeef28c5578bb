//! The phased engine: runs discovery, implementation, and validation in order.
//!
//! Each phase builds its prompt, runs one agent session, then post-processes. A
//! failing gate enters the retry loop:
//!
//! ```text
//! Running ──gate ok──────────────▶ Done
//!    │
//!    └─gate FAIL─▶ Retrying ──retry + rerun──▶ Running
//!                     │
//!                     └─budget spent─▶ Escalated
//! ```
//!
//! State is saved on every transition so `rpi status` and resume see progress.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::log::OrchestrationLog;
use super::postprocess::{PostProcessor, ensure_phase_summary};
use super::prompts::{RetryContext, build_prompt, build_retry_prompt};
use super::tracker::{CliTracker, WorkTracker};
use crate::config::Config;
use crate::errors::PhaseError;
use crate::executor::{PhaseExecutor, select_executor};
use crate::gates::{GateFailure, PolicyMode, RetryAction, RetryState, resolve_action};
use crate::phase::{PHASES, Phase, get_phase, get_phases_from};
use crate::rpi_config::EngineOptions;
use crate::state::{
    PhaseResult, PhaseStatus, RunState, StateStore, TerminalStatus, clean_phase_artifacts,
    write_phase_result,
};
use crate::ui;
use crate::util::format_duration;

pub struct PhaseEngine {
    config: Config,
    opts: EngineOptions,
    executor: Arc<dyn PhaseExecutor>,
    backend_reason: &'static str,
    tracker: Arc<dyn WorkTracker>,
    store: StateStore,
    log: OrchestrationLog,
    cycle: u32,
    cancel: CancellationToken,
}

impl PhaseEngine {
    /// Engine with the configured backend and the `bd`/`ao` CLI tracker.
    pub fn new(config: Config, opts: EngineOptions) -> Self {
        let (executor, reason) = select_executor(&opts);
        let tracker = CliTracker::from_options(&opts, &config.project_dir);
        Self::with_collaborators(config, opts, Arc::from(executor), reason, Arc::new(tracker))
    }

    pub fn with_collaborators(
        config: Config,
        opts: EngineOptions,
        executor: Arc<dyn PhaseExecutor>,
        backend_reason: &'static str,
        tracker: Arc<dyn WorkTracker>,
    ) -> Self {
        let store = StateStore::new(&config);
        let log = OrchestrationLog::new(config.log_file.clone());
        Self {
            config,
            opts,
            executor,
            backend_reason,
            tracker,
            store,
            log,
            cycle: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Supervisor cycle number recorded in the run state.
    pub fn with_cycle(mut self, cycle: u32) -> Self {
        self.cycle = cycle;
        self
    }

    /// Cancelling the token stops the current session and ends the run as interrupted.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run phases from `start_phase` through validation.
    ///
    /// The terminal state is persisted before returning, on success and on failure.
    pub async fn run(&self, goal: &str, start_phase: u32) -> Result<RunState, PhaseError> {
        let mut state = self.prepare_state(goal, start_phase)?;

        if self.opts.dry_run {
            self.dry_run(&state);
            return Ok(state);
        }

        self.config.ensure_directories()?;
        if start_phase == 1 {
            clean_phase_artifacts(&self.config);
        }

        let start = get_phase(start_phase).map(|p| p.name).unwrap_or("unknown");
        ui::print_info(&format!("Goal: {}", state.goal));
        ui::print_info(&format!("Starting from phase {} ({})", start_phase, start));
        self.log.record(
            &state.run_id,
            "start",
            &format!("goal={:?} from={}", state.goal, start),
        );

        let backend = self.executor.name();
        self.log.record(
            &state.run_id,
            "backend-selection",
            &format!("backend={} reason={:?}", backend, self.backend_reason),
        );
        ui::print_info(&format!("Executor backend: {} ({})", backend, self.backend_reason));
        state.backend = Some(backend.to_string());
        self.save(&state);
        self.store.write_heartbeat(&state.run_id);

        for phase in get_phases_from(start_phase) {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(PhaseError::Interrupted {
                    phase: phase.number,
                    name: phase.name.to_string(),
                }),
                res = self.run_phase(&phase, &mut state) => res,
            };
            if let Err(err) = outcome {
                return Err(self.fail(&mut state, &phase, err));
            }
        }

        state.mark_terminal(TerminalStatus::Completed, "all phases completed");
        self.save(&state);
        self.print_final_report(&state);
        Ok(state)
    }

    fn prepare_state(&self, goal: &str, start_phase: u32) -> Result<RunState, PhaseError> {
        let Some(phase) = get_phase(start_phase) else {
            return Err(anyhow::anyhow!(
                "unknown start phase {} (valid: discovery, implementation, validation)",
                start_phase
            )
            .into());
        };
        if start_phase == 1 && goal.trim().is_empty() {
            return Err(anyhow::anyhow!("goal is required (provide as argument)").into());
        }

        let mut state = RunState::new(goal.trim(), start_phase, self.opts.clone());
        state.cycle = self.cycle;
        if start_phase >= 2 {
            if let Some(prior) = self.store.load_optional()? {
                tracing::debug!(run_id = %prior.run_id, "resuming prior run state");
                state.merge_prior(prior);
            }
            if state.epic_id.is_none() {
                return Err(anyhow::anyhow!(
                    "cannot start at phase {} ({}): no epic ID in prior state (run discovery first)",
                    phase.number,
                    phase.name
                )
                .into());
            }
        }
        Ok(state)
    }

    fn dry_run(&self, state: &RunState) {
        for phase in get_phases_from(state.start_phase) {
            ui::print_phase_start(phase.number, PHASES.len() as u32, phase.name);
            let prompt = build_prompt(&self.config.rpi_dir, &phase, state);
            ui::print_dry_run(&format!(
                "Would spawn: {} -p '{}'",
                self.opts.runtime_command, prompt
            ));
        }
        ui::print_dry_run(&format!(
            "Backend: {} ({}); no state written",
            self.executor.name(),
            self.backend_reason
        ));
    }

    async fn run_phase(&self, phase: &Phase, state: &mut RunState) -> Result<(), PhaseError> {
        ui::print_phase_start(phase.number, PHASES.len() as u32, phase.name);
        state.phase = phase.number;
        self.save(state);

        let prompt = build_prompt(&self.config.rpi_dir, phase, state);
        self.log.record(&state.run_id, phase.name, "started");

        let started_at = Utc::now();
        let started = Instant::now();
        self.store.write_heartbeat(&state.run_id);
        let mut result = PhaseResult::running(&state.run_id, phase.number, phase.name, started_at);
        self.write_result(&result);

        if let Err(source) = self
            .executor
            .execute(&prompt, &self.config.project_dir, &state.run_id, phase.number)
            .await
        {
            self.log
                .record(&state.run_id, phase.name, &format!("FAILED: {}", source));
            result.error = Some(source.to_string());
            result.finish(PhaseStatus::Failed, Utc::now());
            self.write_result(&result);
            return Err(PhaseError::Execution {
                phase: phase.number,
                name: phase.name.to_string(),
                source,
            });
        }

        let elapsed = started.elapsed();
        ui::print_phase_complete(phase.name, elapsed);
        self.log.record(
            &state.run_id,
            phase.name,
            &format!("completed in {}", format_duration(elapsed)),
        );

        result.retries = state.attempts_for(&phase.attempt_key());
        result.verdicts = state.verdicts.clone();
        result.backend = Some(self.executor.name().to_string());
        result.finish(PhaseStatus::Completed, Utc::now());
        self.write_result(&result);
        self.store.write_heartbeat(&state.run_id);

        self.run_gate(phase, state).await?;

        if self.config.handoff_path(phase.number).exists() {
            ui::print_warning(&format!(
                "Phase {}: handoff detected, phase reported context degradation",
                phase.number
            ));
            self.log.record(
                &state.run_id,
                phase.name,
                "HANDOFF detected: context degradation",
            );
        }

        ensure_phase_summary(&self.config, state, phase.number);
        self.tracker.record_checkpoint(phase.step).await;
        self.save(state);
        Ok(())
    }

    /// Post-process the phase and drive the retry loop until it passes or escalates.
    async fn run_gate(&self, phase: &Phase, state: &mut RunState) -> Result<(), PhaseError> {
        let post = PostProcessor {
            config: &self.config,
            tracker: self.tracker.as_ref(),
            log: &self.log,
        };

        let mut retry = RetryState::Running;
        loop {
            retry = match retry {
                RetryState::Running => match post.process(state, phase.number).await {
                    Ok(()) => RetryState::Done,
                    Err(PhaseError::Gate(failure)) => RetryState::Retrying(failure),
                    Err(e) => return Err(e),
                },
                RetryState::Retrying(failure) => self.retry_phase(phase, state, failure).await?,
                RetryState::Escalated { failure, attempt } => {
                    tracing::warn!(
                        phase = phase.number,
                        attempt,
                        verdict = %failure.verdict,
                        "gate escalated"
                    );
                    return Err(PhaseError::Escalated {
                        phase: phase.number,
                        name: phase.name.to_string(),
                    });
                }
                RetryState::Done => return Ok(()),
            };
        }
    }

    async fn retry_phase(
        &self,
        phase: &Phase,
        state: &mut RunState,
        failure: GateFailure,
    ) -> Result<RetryState, PhaseError> {
        let key = phase.attempt_key();
        let attempt = state.attempts_for(&key) + 1;
        state.attempts.insert(key, attempt);
        self.save(state);

        let max = self.opts.max_retries;
        let (action, decision) = resolve_action(self.opts.policy_mode, &failure, attempt, max);
        if decision.mode != PolicyMode::Off {
            self.log.record(
                &state.run_id,
                phase.name,
                &format!(
                    "memrl policy mode={} failure_class={} attempt_bucket={} policy_action={} selected_action={} rule={}",
                    decision.mode,
                    decision.failure_class,
                    decision.attempt_bucket,
                    decision.action,
                    action,
                    decision.rule_id
                ),
            );
        }

        if action == RetryAction::Escalate {
            let msg = format!(
                "{} escalated (mode={}, action={}, rule={}, attempt={}/{}). Last report: {}. Manual intervention needed.",
                phase.name, decision.mode, action, decision.rule_id, attempt, max, failure.report
            );
            ui::print_escalation(&msg);
            self.log.record(&state.run_id, phase.name, &msg);
            return Ok(RetryState::Escalated { failure, attempt });
        }

        ui::print_retry(phase.name, &failure.verdict, attempt, max);
        self.log.record(
            &state.run_id,
            phase.name,
            &format!(
                "RETRY attempt {}/{} verdict={} report={}",
                attempt, max, failure.verdict, failure.report
            ),
        );

        let retry = RetryContext {
            attempt,
            max_retries: max,
            findings: &failure.findings,
        };
        let cwd: &Path = &self.config.project_dir;
        let retry_prompt = build_retry_prompt(&self.config.rpi_dir, phase, state, &retry);
        self.executor
            .execute(&retry_prompt, cwd, &state.run_id, phase.number)
            .await
            .map_err(|e| anyhow::anyhow!("retry failed: {}", e))?;

        ui::print_info(&format!("Re-running phase {} after retry", phase.number));
        let rerun_prompt = build_prompt(&self.config.rpi_dir, phase, state);
        self.executor
            .execute(&rerun_prompt, cwd, &state.run_id, phase.number)
            .await
            .map_err(|e| anyhow::anyhow!("rerun failed: {}", e))?;
        self.store.write_heartbeat(&state.run_id);

        Ok(RetryState::Running)
    }

    fn fail(&self, state: &mut RunState, phase: &Phase, err: PhaseError) -> PhaseError {
        let message = err.to_string();
        self.log.record_failure(&state.run_id, phase.name, &message);
        let status = match err {
            PhaseError::Interrupted { .. } => TerminalStatus::Interrupted,
            _ => TerminalStatus::Failed,
        };
        state.mark_terminal(status, format!("{}: {}", phase.name, message));
        self.save(state);
        ui::print_error(&message);
        err
    }

    fn print_final_report(&self, state: &RunState) {
        ui::print_success("RPI phased run complete");
        ui::print_info(&format!("Goal: {}", state.goal));
        if let Some(epic) = &state.epic_id {
            ui::print_info(&format!("Epic: {}", epic));
        }
        let verdicts = state
            .verdicts
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        ui::print_info(&format!("Verdicts: {}", verdicts));
        self.log.record(
            &state.run_id,
            "complete",
            &format!(
                "epic={} verdicts={}",
                state.epic_id.as_deref().unwrap_or_default(),
                verdicts
            ),
        );
    }

    fn save(&self, state: &RunState) {
        if let Err(e) = self.store.save(state) {
            tracing::warn!(run_id = %state.run_id, error = %format!("{:#}", e), "could not persist run state");
        }
    }

    fn write_result(&self, result: &PhaseResult) {
        if let Err(e) = write_phase_result(&self.config, result) {
            tracing::warn!(phase = result.phase, error = %format!("{:#}", e), "could not write phase result");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::errors::ExecError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Step = Box<dyn Fn(usize, &Path) -> Result<(), ExecError> + Send + Sync>;

    /// Executor that records prompts and runs a per-call step against the project dir.
    pub struct ScriptedExecutor {
        pub prompts: Mutex<Vec<String>>,
        step: Step,
    }

    impl ScriptedExecutor {
        pub fn new(step: impl Fn(usize, &Path) -> Result<(), ExecError> + Send + Sync + 'static) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                step: Box::new(step),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PhaseExecutor for ScriptedExecutor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(
            &self,
            prompt: &str,
            cwd: &Path,
            _run_id: &str,
            _phase: u32,
        ) -> Result<(), ExecError> {
            let call = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(prompt.to_string());
                prompts.len()
            };
            (self.step)(call, cwd)
        }
    }

    pub fn council_report(project: &Path, name: &str, verdict: &str) {
        let dir = project.join(".agents").join("council");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(name),
            format!(
                "## Council Verdict: {}\n\nFINDING: gap | FIX: close it | REF: src/lib.rs\n",
                verdict
            ),
        )
        .unwrap();
    }
}
