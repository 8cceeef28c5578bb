//! Per-phase result artifacts (`phase-<N>-result.json`).
//!
//! A phase writes `running` when it starts, then `completed` or `failed`. The next
//! phase refuses to start unless its predecessor's result says `completed`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::atomic::write_atomic;
use crate::config::Config;
use crate::errors::PhaseError;
use crate::phase::PHASES;

pub const PHASE_RESULT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub schema_version: u32,
    pub run_id: String,
    pub phase: u32,
    pub phase_name: String,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub verdicts: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl PhaseResult {
    pub fn running(run_id: &str, phase: u32, phase_name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: PHASE_RESULT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            phase,
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Running,
            retries: 0,
            error: None,
            backend: None,
            artifacts: BTreeMap::new(),
            verdicts: BTreeMap::new(),
            started_at,
            completed_at: None,
            duration_seconds: None,
        }
    }

    /// Mark finished with `status` at `now`, filling in the duration.
    pub fn finish(&mut self, status: PhaseStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        let elapsed = now.signed_duration_since(self.started_at);
        self.duration_seconds = Some(elapsed.num_milliseconds().max(0) as f64 / 1000.0);
    }
}

pub fn write_phase_result(config: &Config, result: &PhaseResult) -> Result<()> {
    let mut data =
        serde_json::to_vec_pretty(result).context("Failed to serialize phase result")?;
    data.push(b'\n');
    let path = config.phase_result_path(result.phase);
    write_atomic(&path, &data)?;
    tracing::debug!(path = %path.display(), status = %result.status, "phase result written");
    Ok(())
}

/// Require that `phase-<expected>-result.json` exists with status `completed`.
pub fn validate_prior_phase_result(config: &Config, expected: u32) -> Result<(), PhaseError> {
    let path = config.phase_result_path(expected);
    let incomplete = |reason: String| PhaseError::PriorPhaseIncomplete {
        phase: expected + 1,
        reason,
    };
    let data = std::fs::read_to_string(&path).map_err(|e| {
        incomplete(format!(
            "prior phase {} result not found at {}: {}",
            expected,
            path.display(),
            e
        ))
    })?;
    let result: PhaseResult = serde_json::from_str(&data)
        .map_err(|e| incomplete(format!("prior phase {} result is malformed: {}", expected, e)))?;
    if result.status != PhaseStatus::Completed {
        return Err(incomplete(format!(
            "prior phase {} has status \"{}\" (expected \"completed\")",
            expected, result.status
        )));
    }
    Ok(())
}

/// Remove summaries, handoffs, and results left by a previous run.
pub fn clean_phase_artifacts(config: &Config) {
    for phase in PHASES {
        for path in [
            config.summary_path(phase.number),
            config.handoff_path(phase.number),
            config.phase_result_path(phase.number),
        ] {
            remove_if_exists(&path);
        }
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove stale phase artifact");
    }
}
