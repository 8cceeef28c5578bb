//! Post-phase processing: epic extraction, verdict checks, and fallback summaries.
//!
//! A failing verdict comes back as [`PhaseError::Gate`] so the engine can run the
//! retry policy. Every other error is fatal for the run.

use anyhow::Context;

use super::log::OrchestrationLog;
use super::tracker::WorkTracker;
use crate::config::Config;
use crate::errors::PhaseError;
use crate::gates::{
    CrankStatus, GateFailure, MAX_FINDINGS, extract_findings, extract_verdict,
    find_latest_council_report, is_micro_epic,
};
use crate::state::{RunState, validate_prior_phase_result};
use crate::ui;

pub struct PostProcessor<'a> {
    pub config: &'a Config,
    pub tracker: &'a dyn WorkTracker,
    pub log: &'a OrchestrationLog,
}

impl PostProcessor<'_> {
    pub async fn process(&self, state: &mut RunState, phase: u32) -> Result<(), PhaseError> {
        match phase {
            1 => self.discovery(state).await,
            2 => self.implementation(state).await,
            3 => self.validation(state),
            _ => Ok(()),
        }
    }

    async fn discovery(&self, state: &mut RunState) -> Result<(), PhaseError> {
        let epic = self.tracker.latest_open_epic().await.context(
            "discovery phase: could not extract epic ID (implementation needs this)",
        )?;
        ui::print_info(&format!("Epic ID: {}", epic));
        self.log
            .record(&state.run_id, "discovery", &format!("extracted epic: {}", epic));
        state.epic_id = Some(epic.clone());

        if !state.opts.fast_path {
            match self.tracker.epic_children(&epic).await {
                Ok(children) if is_micro_epic(&children) => {
                    state.fast_path = true;
                    ui::print_info("Micro-epic detected, using fast path (--quick for gates)");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    epic = %epic,
                    error = %format!("{:#}", e),
                    "fast-path detection failed, continuing without"
                ),
            }
        }

        let report = match find_latest_council_report(
            &self.config.project_dir,
            "pre-mortem",
            state.epic_id.as_deref(),
        ) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "pre-mortem report not found, session may have handled retries internally");
                return Ok(());
            }
        };
        let verdict = match extract_verdict(&report) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "could not extract pre-mortem verdict");
                return Ok(());
            }
        };
        state.verdicts.insert("pre_mortem".into(), verdict.clone());
        ui::print_info(&format!("Pre-mortem verdict: {}", verdict));
        self.log.record(
            &state.run_id,
            "discovery",
            &format!("pre-mortem verdict: {} report={}", verdict, report.display()),
        );

        if verdict == "FAIL" {
            return Err(PhaseError::Gate(GateFailure {
                phase: 1,
                verdict,
                findings: extract_findings(&report, MAX_FINDINGS).unwrap_or_default(),
                report: report.display().to_string(),
            }));
        }
        Ok(())
    }

    async fn implementation(&self, state: &mut RunState) -> Result<(), PhaseError> {
        if state.start_phase <= 1 {
            validate_prior_phase_result(self.config, 1)?;
        }
        let Some(epic) = state.epic_id.clone() else {
            return Ok(());
        };
        let status = match self.tracker.epic_children(&epic).await {
            Ok(children) => CrankStatus::from_children(&children),
            Err(e) => {
                tracing::warn!(
                    epic = %epic,
                    error = %format!("{:#}", e),
                    "could not check crank completion, continuing to validation"
                );
                return Ok(());
            }
        };
        ui::print_info(&format!("Crank status: {}", status.as_str()));
        self.log.record(
            &state.run_id,
            "implementation",
            &format!("crank status: {}", status.as_str()),
        );
        match status {
            CrankStatus::Done => Ok(()),
            CrankStatus::Blocked | CrankStatus::Partial => Err(PhaseError::Gate(GateFailure {
                phase: 2,
                verdict: status.as_str().to_string(),
                findings: Vec::new(),
                report: format!("bd children {}", epic),
            })),
        }
    }

    fn validation(&self, state: &mut RunState) -> Result<(), PhaseError> {
        if state.start_phase <= 2 {
            validate_prior_phase_result(self.config, 2)?;
        }
        let project_dir = &self.config.project_dir;
        let epic = state.epic_id.as_deref();

        let report = find_latest_council_report(project_dir, "vibe", epic)
            .context("validation phase: vibe report not found (phase may not have completed)")?;
        let verdict = extract_verdict(&report).with_context(|| {
            format!(
                "validation phase: could not extract vibe verdict from {}",
                report.display()
            )
        })?;
        state.verdicts.insert("vibe".into(), verdict.clone());
        ui::print_info(&format!("Vibe verdict: {}", verdict));
        self.log.record(
            &state.run_id,
            "validation",
            &format!("vibe verdict: {} report={}", verdict, report.display()),
        );

        if verdict == "FAIL" {
            return Err(PhaseError::Gate(GateFailure {
                phase: 3,
                verdict,
                findings: extract_findings(&report, MAX_FINDINGS).unwrap_or_default(),
                report: report.display().to_string(),
            }));
        }

        if let Ok(pm_report) = find_latest_council_report(project_dir, "post-mortem", epic)
            && let Ok(pm_verdict) = extract_verdict(&pm_report)
        {
            ui::print_info(&format!("Post-mortem verdict: {}", pm_verdict));
            self.log.record(
                &state.run_id,
                "validation",
                &format!(
                    "post-mortem verdict: {} report={}",
                    pm_verdict,
                    pm_report.display()
                ),
            );
            state.verdicts.insert("post_mortem".into(), pm_verdict);
        }
        Ok(())
    }
}

/// Mechanical summary for a phase whose session did not write one.
pub fn fallback_summary(state: &RunState, phase: u32) -> String {
    let epic = state.epic_id.as_deref().unwrap_or_default();
    match phase {
        1 => {
            let mut out = format!(
                "Discovery completed for goal: {}\nResearch: see .agents/research/ for findings.\n",
                state.goal
            );
            if !epic.is_empty() {
                out.push_str(&format!("Plan: epic {}", epic));
                if state.fast_path {
                    out.push_str(" (micro-epic, fast path)");
                }
                out.push('\n');
            }
            if let Some(v) = state.verdicts.get("pre_mortem") {
                out.push_str(&format!(
                    "Pre-mortem verdict: {}\nSee .agents/council/*pre-mortem*.md for details.",
                    v
                ));
            }
            out
        }
        2 => format!(
            "Crank completed for epic {}.\nCheck bd children {} for issue statuses.",
            epic, epic
        ),
        3 => {
            let mut out = String::new();
            if let Some(v) = state.verdicts.get("vibe") {
                out.push_str(&format!(
                    "Vibe verdict: {}\nSee .agents/council/*vibe*.md for details.\n",
                    v
                ));
            }
            if let Some(v) = state.verdicts.get("post_mortem") {
                out.push_str(&format!("Post-mortem verdict: {}\n", v));
            }
            out.push_str(
                "See .agents/council/*post-mortem*.md and .agents/learnings/ for extracted knowledge.",
            );
            out
        }
        _ => String::new(),
    }
}

/// Write the fallback summary unless the session already wrote one.
pub fn ensure_phase_summary(config: &Config, state: &RunState, phase: u32) {
    let path = config.summary_path(phase);
    if path.exists() {
        tracing::debug!(phase, "agent-written summary found");
        return;
    }
    let summary = fallback_summary(state, phase);
    if summary.is_empty() {
        return;
    }
    tracing::debug!(phase, "no agent summary found, writing fallback");
    if let Err(e) = crate::state::write_atomic(&path, summary.as_bytes()) {
        tracing::warn!(phase, error = %format!("{:#}", e), "could not write phase summary");
    }
}
