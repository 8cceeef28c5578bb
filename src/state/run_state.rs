use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rpi_config::EngineOptions;

pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Terminal outcome of a run, recorded once the engine stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Interrupted,
}

/// Persistent record of one phased run.
///
/// Maps are always present after deserialization, even when the file omitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub schema_version: u32,
    pub goal: String,
    #[serde(default, with = "crate::util::empty_as_none")]
    pub epic_id: Option<String>,
    pub phase: u32,
    pub start_phase: u32,
    #[serde(default)]
    pub cycle: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_epic: Option<String>,
    #[serde(default)]
    pub fast_path: bool,
    #[serde(default)]
    pub test_first: bool,
    #[serde(default)]
    pub swarm_first: bool,
    #[serde(default)]
    pub verdicts: BTreeMap<String, String>,
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_status: Option<TerminalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opts: EngineOptions,
}

impl RunState {
    pub fn new(goal: &str, start_phase: u32, opts: EngineOptions) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            goal: goal.to_string(),
            epic_id: None,
            phase: start_phase,
            start_phase,
            cycle: 1,
            parent_epic: None,
            fast_path: opts.fast_path,
            test_first: opts.test_first,
            swarm_first: opts.swarm_first,
            verdicts: BTreeMap::new(),
            attempts: BTreeMap::new(),
            started_at: Utc::now(),
            worktree_path: None,
            run_id: new_run_id(),
            orchestrator_pid: Some(std::process::id()),
            backend: None,
            terminal_status: None,
            terminal_reason: None,
            terminated_at: None,
            opts,
        }
    }

    /// Carry epic, verdicts, and attempts forward from a prior run being resumed.
    ///
    /// Fields already set on `self` win, except that an empty goal is filled in
    /// and the prior run id is reused so the registry keeps one entry per run.
    pub fn merge_prior(&mut self, prior: RunState) {
        if self.epic_id.is_none() {
            self.epic_id = prior.epic_id;
        }
        self.fast_path |= prior.fast_path;
        for (k, v) in prior.verdicts {
            self.verdicts.entry(k).or_insert(v);
        }
        for (k, v) in prior.attempts {
            self.attempts.entry(k).or_insert(v);
        }
        if self.goal.trim().is_empty() {
            self.goal = prior.goal;
        }
        if !prior.run_id.is_empty() {
            self.run_id = prior.run_id;
        }
        if self.parent_epic.is_none() {
            self.parent_epic = prior.parent_epic;
        }
        if self.worktree_path.is_none() {
            self.worktree_path = prior.worktree_path;
        }
    }

    pub fn attempts_for(&self, key: &str) -> u32 {
        self.attempts.get(key).copied().unwrap_or(0)
    }

    pub fn mark_terminal(&mut self, status: TerminalStatus, reason: impl Into<String>) {
        self.terminal_status = Some(status);
        self.terminal_reason = Some(reason.into());
        self.terminated_at = Some(Utc::now());
    }
}

/// Short random identifier for a run: 12 lowercase hex characters.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_id_shape() {
        let id = new_run_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_run_id());
    }

    #[test]
    fn test_missing_maps_deserialize_as_empty() {
        let json = r#"{
            "schema_version": 1,
            "goal": "add auth",
            "phase": 2,
            "start_phase": 1,
            "started_at": "2026-01-02T03:04:05Z"
        }"#;
        let state: RunState = serde_json::from_str(json).unwrap();
        assert!(state.verdicts.is_empty());
        assert!(state.attempts.is_empty());
        assert_eq!(state.opts, EngineOptions::default());
    }

    #[test]
    fn test_epic_id_key_is_always_written() {
        let mut state = RunState::new("g", 1, EngineOptions::default());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["epic_id"], "");

        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back.epic_id, None);

        state.epic_id = Some("ag-abc".into());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["epic_id"], "ag-abc");
        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back.epic_id.as_deref(), Some("ag-abc"));
    }

    #[test]
    fn test_merge_prior_keeps_epic_and_run_id() {
        let mut prior = RunState::new("add auth", 1, EngineOptions::default());
        prior.epic_id = Some("ag-abc".into());
        prior.verdicts.insert("pre_mortem".into(), "PASS".into());
        prior.attempts.insert("phase_1".into(), 2);
        let prior_id = prior.run_id.clone();

        let mut resumed = RunState::new("", 2, EngineOptions::default());
        resumed.merge_prior(prior);
        assert_eq!(resumed.epic_id.as_deref(), Some("ag-abc"));
        assert_eq!(resumed.goal, "add auth");
        assert_eq!(resumed.run_id, prior_id);
        assert_eq!(resumed.attempts_for("phase_1"), 2);
        assert_eq!(resumed.verdicts["pre_mortem"], "PASS");
    }

    #[test]
    fn test_mark_terminal() {
        let mut state = RunState::new("g", 1, EngineOptions::default());
        state.mark_terminal(TerminalStatus::Completed, "all phases completed");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["terminal_status"], "completed");
        assert_eq!(json["terminal_reason"], "all phases completed");
        assert!(state.terminated_at.is_some());
    }
}
