//! The autonomous `rpi loop` supervisor.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `queue` | `next-work.jsonl` selection and consumed/failed marking |
//! | `gates` | Quality gate scripts |
//! | `cycle` | One cycle: baseline, engine, gates, landing |
//!
//! The loop picks a goal (explicit, or the highest-severity queue item), runs the
//! cycle with retries and backoff, marks the queue entry, and applies the failure
//! policy. Only task failures mark an entry failed; infrastructure failures leave it
//! eligible for a later cycle.

pub mod cycle;
pub mod gates;
pub mod queue;

pub use cycle::{CycleRunner, PhasedCycle};
pub use queue::{QueueSelection, WorkQueue};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::CycleFailure;
use crate::lease::Lease;
use crate::orchestrator::OrchestrationLog;
use crate::rpi_config::{EngineOptions, SupervisorConfig};
use crate::state::new_run_id;
use crate::ui;
use crate::util::format_duration;

const CONSUMED_BY: &str = "rpi-loop";

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxCycles,
    QueueEmpty,
    GoalCompleted,
    KillSwitch,
    DryRun,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub executed_cycles: u32,
    pub stop: StopReason,
}

impl LoopSummary {
    fn new(executed_cycles: u32, stop: StopReason) -> Self {
        Self {
            executed_cycles,
            stop,
        }
    }
}

enum AttemptOutcome {
    Succeeded,
    Failed(CycleFailure),
    /// The kill switch appeared between attempts.
    Killed,
}

pub struct Supervisor {
    config: Config,
    settings: SupervisorConfig,
    runner: Arc<dyn CycleRunner>,
    queue: WorkQueue,
    log: OrchestrationLog,
    dry_run: bool,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: Config,
        settings: SupervisorConfig,
        opts: EngineOptions,
        cancel: CancellationToken,
    ) -> Self {
        let dry_run = opts.dry_run;
        let runner = PhasedCycle::new(config.clone(), settings.clone(), opts, cancel.clone());
        Self::with_runner(config, settings, Arc::new(runner), dry_run, cancel)
    }

    pub fn with_runner(
        config: Config,
        settings: SupervisorConfig,
        runner: Arc<dyn CycleRunner>,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Self {
        let queue = WorkQueue::new(config.queue_file.clone());
        let log = OrchestrationLog::new(config.log_file.clone());
        Self {
            config,
            settings,
            runner,
            queue,
            log,
            dry_run,
            cancel,
        }
    }

    /// Run cycles until the goal completes, the queue drains, a limit is hit, or a
    /// failure stops the loop. A failure is returned as a [`CycleFailure`].
    pub async fn run(&self, explicit_goal: Option<&str>) -> Result<LoopSummary> {
        if !self.dry_run {
            self.config.ensure_directories()?;
        }

        let lease = if self.settings.lease_enabled && !self.dry_run {
            let run_id = new_run_id();
            let lease = Lease::acquire(&self.settings.lease_path, self.settings.lease_ttl, &run_id)?;
            ui::print_lease(&format!(
                "Supervisor lease acquired: {} (run={})",
                lease.path().display(),
                run_id
            ));
            Some(lease)
        } else {
            None
        };

        let result = self.run_cycles(explicit_goal).await;

        if let Some(lease) = lease
            && let Err(e) = lease.release().await
        {
            tracing::warn!(error = %format!("{:#}", e), "could not release supervisor lease");
        }

        let summary = result?;
        println!(
            "\nRPI loop finished after {} cycle(s).",
            summary.executed_cycles
        );
        Ok(summary)
    }

    async fn run_cycles(&self, explicit_goal: Option<&str>) -> Result<LoopSummary> {
        let explicit_goal = explicit_goal.map(str::trim).filter(|g| !g.is_empty());
        let mut executed_cycles = 0;

        let mut cycle = 0;
        loop {
            cycle += 1;
            if self.settings.max_cycles > 0 && cycle > self.settings.max_cycles {
                ui::print_info(&format!(
                    "Reached max cycles ({}). Stopping.",
                    self.settings.max_cycles
                ));
                return Ok(LoopSummary::new(executed_cycles, StopReason::MaxCycles));
            }
            if cycle > 1 && !self.settings.cycle_delay.is_zero() {
                ui::print_wait(&format!(
                    "Sleeping {} before next cycle...",
                    format_duration(self.settings.cycle_delay)
                ));
                if !self.sleep(self.settings.cycle_delay).await {
                    return Ok(LoopSummary::new(executed_cycles, StopReason::Interrupted));
                }
            }
            if self.kill_switch_engaged()? {
                return Ok(LoopSummary::new(executed_cycles, StopReason::KillSwitch));
            }

            ui::print_cycle_header(cycle);

            let (goal, selection) = match explicit_goal {
                Some(goal) => (goal.to_string(), None),
                None => match self.queue.select_next(self.settings.repo_filter.as_deref()) {
                    Ok(Some(sel)) if !sel.item.title.trim().is_empty() => {
                        ui::print_info(&format!("From queue: {}", sel.item.title));
                        (sel.item.title.clone(), Some(sel))
                    }
                    Ok(_) => {
                        ui::print_info("No unconsumed work in queue. Flywheel stable.");
                        return Ok(LoopSummary::new(executed_cycles, StopReason::QueueEmpty));
                    }
                    Err(e) => {
                        tracing::warn!(error = %format!("{:#}", e), "could not read work queue");
                        ui::print_info("No unconsumed work in queue. Flywheel stable.");
                        return Ok(LoopSummary::new(executed_cycles, StopReason::QueueEmpty));
                    }
                },
            };

            if self.dry_run {
                ui::print_dry_run(&format!("Would run phased engine for: {:?}", goal));
                if explicit_goal.is_none() {
                    ui::print_dry_run("Queue not consumed in dry-run. Showing first cycle only.");
                }
                return Ok(LoopSummary::new(executed_cycles, StopReason::DryRun));
            }

            ui::print_info(&format!("Running phased engine for: {:?}", goal));
            self.log.record("", "loop", &format!("cycle {} started goal={:?}", cycle, goal));
            executed_cycles += 1;
            let started = Instant::now();

            let outcome = self.run_attempts(&goal, cycle).await?;
            let elapsed = format_duration(started.elapsed());

            if self.cancel.is_cancelled() {
                ui::print_warning("Loop interrupted; queue entry left unmodified.");
                self.log.record("", "loop", &format!("cycle {} interrupted", cycle));
                return Ok(LoopSummary::new(executed_cycles, StopReason::Interrupted));
            }

            match outcome {
                AttemptOutcome::Killed => {
                    return Ok(LoopSummary::new(executed_cycles, StopReason::KillSwitch));
                }
                AttemptOutcome::Succeeded => {
                    ui::print_success(&format!("Cycle {} completed in {}", cycle, elapsed));
                    self.log.record("", "loop", &format!("cycle {} completed in {}", cycle, elapsed));
                    if let Some(sel) = &selection {
                        match self.queue.mark_consumed(sel.entry_index, CONSUMED_BY) {
                            Ok(true) => ui::print_info(&format!("Queue entry consumed: {:?}", sel.item.title)),
                            Ok(false) => {}
                            Err(e) => tracing::warn!(error = %format!("{:#}", e), "could not mark queue entry consumed"),
                        }
                    }
                    if explicit_goal.is_some() {
                        ui::print_success("Explicit goal completed.");
                        return Ok(LoopSummary::new(executed_cycles, StopReason::GoalCompleted));
                    }
                }
                AttemptOutcome::Failed(failure) => {
                    ui::print_error(&format!("Cycle {} failed after {}: {}", cycle, elapsed, failure));
                    self.log.record(
                        "",
                        "loop",
                        &format!("cycle {} failed kind={} stage={:?}", cycle, failure.kind, failure.stage),
                    );
                    if let Some(sel) = &selection {
                        self.record_queue_failure(sel, &failure);
                    }
                    if self.settings.continue_after_failure() && explicit_goal.is_none() {
                        ui::print_info(&format!(
                            "Failure policy {:?}: continuing to next queue item.",
                            self.settings.failure_policy.as_str()
                        ));
                        continue;
                    }
                    ui::print_error("Stopping loop due to failure policy.");
                    return Err(failure.into());
                }
            }
        }
    }

    /// Run up to `max_cycle_attempts` attempts, backing off between them.
    async fn run_attempts(&self, goal: &str, cycle: u32) -> Result<AttemptOutcome> {
        let max_attempts = self.settings.max_cycle_attempts();
        let mut attempt = 1;
        loop {
            let failure = match self.runner.run_cycle(goal, cycle, attempt).await {
                Ok(()) => return Ok(AttemptOutcome::Succeeded),
                Err(failure) => failure,
            };
            if attempt >= max_attempts || self.cancel.is_cancelled() {
                return Ok(AttemptOutcome::Failed(failure));
            }

            ui::print_warning(&format!(
                "Cycle {} attempt {}/{} failed: {}",
                cycle, attempt, max_attempts, failure
            ));
            if !self.settings.retry_backoff.is_zero() {
                ui::print_wait(&format!(
                    "Retrying in {}...",
                    format_duration(self.settings.retry_backoff)
                ));
                if !self.sleep(self.settings.retry_backoff).await {
                    return Ok(AttemptOutcome::Failed(failure));
                }
            }
            if self.kill_switch_engaged()? {
                return Ok(AttemptOutcome::Killed);
            }
            attempt += 1;
        }
    }

    fn record_queue_failure(&self, selection: &QueueSelection, failure: &CycleFailure) {
        if !failure.marks_queue_entry_failed() {
            ui::print_info(&format!(
                "Queue entry left unmodified (transient infra failure): {:?}",
                selection.item.title
            ));
            return;
        }
        match self.queue.mark_failed(selection.entry_index) {
            Ok(true) => ui::print_info(&format!(
                "Queue entry marked failed (clear failed_at to retry): {:?}",
                selection.item.title
            )),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "could not mark queue entry failed"),
        }
    }

    fn kill_switch_engaged(&self) -> Result<bool> {
        let engaged = kill_switch_set(&self.settings.kill_switch_path)?;
        if engaged {
            ui::print_warning(&format!(
                "Kill switch present at {}. Stopping.",
                self.settings.kill_switch_path.display()
            ));
            self.log.record("", "loop", "kill switch engaged");
        }
        Ok(engaged)
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Whether the kill switch file exists. A directory at the path is an error.
pub fn kill_switch_set(path: &Path) -> Result<bool> {
    if path.as_os_str().is_empty() {
        return Ok(false);
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            anyhow::bail!("kill switch path is a directory: {}", path.display())
        }
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("check kill switch {}", path.display())),
    }
}
