//! Phase gates: verdict extraction from council reports and the retry/escalation policy.

pub mod report;
pub mod retry;

use serde::{Deserialize, Serialize};

pub use report::{extract_findings, extract_verdict, find_latest_council_report};
pub use retry::{
    AttemptBucket, FailureClass, PolicyDecision, PolicyMode, RetryAction, RetryState,
    classify_failure, decide, resolve_action,
};

/// Maximum number of findings carried into a retry prompt.
pub const MAX_FINDINGS: usize = 5;

/// One actionable item from a council report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub description: String,
    pub fix: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// A failing gate verdict. Recovered locally by the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct GateFailure {
    pub phase: u32,
    pub verdict: String,
    pub findings: Vec<Finding>,
    /// Report path, or the tracker query that produced the verdict.
    pub report: String,
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gate FAIL at phase {}: {} (report: {})",
            self.phase, self.verdict, self.report
        )
    }
}

/// Completion status of the implementation phase, derived from the epic's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrankStatus {
    Done,
    Blocked,
    Partial,
}

impl CrankStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrankStatus::Done => "DONE",
            CrankStatus::Blocked => "BLOCKED",
            CrankStatus::Partial => "PARTIAL",
        }
    }

    /// Derive completion from `bd children` output lines.
    ///
    /// An empty epic or one whose children are all closed is done. Otherwise any
    /// blocked child makes it blocked, else partial.
    pub fn from_children(output: &str) -> Self {
        let mut total = 0;
        let mut closed = 0;
        let mut blocked = 0;
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            total += 1;
            let lower = line.to_lowercase();
            if lower.contains("closed") || lower.contains('✓') {
                closed += 1;
            }
            if lower.contains("blocked") {
                blocked += 1;
            }
        }
        if total == 0 || closed == total {
            CrankStatus::Done
        } else if blocked > 0 {
            CrankStatus::Blocked
        } else {
            CrankStatus::Partial
        }
    }
}

/// A micro-epic has at most two children and none of them blocked.
pub fn is_micro_epic(children_output: &str) -> bool {
    let mut count = 0;
    for line in children_output.lines().filter(|l| !l.trim().is_empty()) {
        count += 1;
        if line.to_lowercase().contains("blocked") {
            return false;
        }
    }
    count <= 2
}
