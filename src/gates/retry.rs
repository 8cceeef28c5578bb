//! Gate retry / escalation policy.
//!
//! The default (legacy) rule is attempt-count only: escalate once the attempt
//! budget is spent. The classified policy is additive and is only consulted for
//! the final action when `PolicyMode::Enforce` is configured. In `Observe` mode it
//! is evaluated and logged but the legacy action is applied.

use super::GateFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryAction {
    Retry,
    Escalate,
}

impl fmt::Display for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryAction::Retry => write!(f, "retry"),
            RetryAction::Escalate => write!(f, "escalate"),
        }
    }
}

/// How the classified policy participates in retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Off,
    Observe,
    Enforce,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Off => write!(f, "off"),
            PolicyMode::Observe => write!(f, "observe"),
            PolicyMode::Enforce => write!(f, "enforce"),
        }
    }
}

impl FromStr for PolicyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "off" => Ok(PolicyMode::Off),
            "observe" => Ok(PolicyMode::Observe),
            "enforce" => Ok(PolicyMode::Enforce),
            _ => anyhow::bail!(
                "Invalid policy mode '{}'. Valid values: off, observe, enforce",
                s
            ),
        }
    }
}

/// Failure class derived from a gate failure's phase and verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    PreMortemFail,
    CrankBlocked,
    CrankPartial,
    VibeFail,
    PhaseTimeout,
    PhaseStall,
    PhaseExitError,
    /// Lowercased verdict with no known mapping.
    Other(String),
}

impl FailureClass {
    pub fn as_str(&self) -> &str {
        match self {
            FailureClass::PreMortemFail => "pre_mortem_fail",
            FailureClass::CrankBlocked => "crank_blocked",
            FailureClass::CrankPartial => "crank_partial",
            FailureClass::VibeFail => "vibe_fail",
            FailureClass::PhaseTimeout => "phase_timeout",
            FailureClass::PhaseStall => "phase_stall",
            FailureClass::PhaseExitError => "phase_exit_error",
            FailureClass::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, FailureClass::Other(_))
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify by (phase, verdict) first, falling back to the verdict string alone.
pub fn classify_failure(phase: u32, verdict: &str) -> FailureClass {
    let verdict = verdict.trim().to_uppercase();
    match (phase, verdict.as_str()) {
        (1, "FAIL") => FailureClass::PreMortemFail,
        (2, "BLOCKED") => FailureClass::CrankBlocked,
        (2, "PARTIAL") => FailureClass::CrankPartial,
        (3, "FAIL") => FailureClass::VibeFail,
        (_, "TIMEOUT") => FailureClass::PhaseTimeout,
        (_, "STALL") => FailureClass::PhaseStall,
        (_, "EXIT_ERROR") => FailureClass::PhaseExitError,
        (_, other) => FailureClass::Other(other.to_lowercase()),
    }
}

/// Position of an attempt within the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptBucket {
    Initial,
    Middle,
    Final,
    Overflow,
}

impl AttemptBucket {
    pub fn of(attempt: u32, max_attempts: u32) -> Self {
        if max_attempts == 0 {
            AttemptBucket::Overflow
        } else if attempt <= 1 {
            AttemptBucket::Initial
        } else if attempt < max_attempts {
            AttemptBucket::Middle
        } else if attempt == max_attempts {
            AttemptBucket::Final
        } else {
            AttemptBucket::Overflow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptBucket::Initial => "initial",
            AttemptBucket::Middle => "middle",
            AttemptBucket::Final => "final",
            AttemptBucket::Overflow => "overflow",
        }
    }
}

impl fmt::Display for AttemptBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of evaluating the classified policy, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub mode: PolicyMode,
    pub failure_class: FailureClass,
    pub attempt_bucket: AttemptBucket,
    pub action: RetryAction,
    pub rule_id: String,
}

/// Legacy decision rule: escalate iff `attempt >= max_attempts`.
pub fn decide(attempt: u32, max_attempts: u32) -> RetryAction {
    if attempt >= max_attempts {
        RetryAction::Escalate
    } else {
        RetryAction::Retry
    }
}

fn evaluate_policy(
    mode: PolicyMode,
    failure_class: FailureClass,
    attempt: u32,
    max_attempts: u32,
    metadata_present: bool,
) -> PolicyDecision {
    let attempt_bucket = AttemptBucket::of(attempt, max_attempts);
    let (action, rule_id) = if !metadata_present {
        (RetryAction::Escalate, "default.missing_metadata".to_string())
    } else if !failure_class.is_known() {
        (
            RetryAction::Escalate,
            "default.unknown_failure_class".to_string(),
        )
    } else {
        let action = match attempt_bucket {
            AttemptBucket::Final | AttemptBucket::Overflow => RetryAction::Escalate,
            _ if mode == PolicyMode::Enforce && failure_class == FailureClass::CrankBlocked => {
                RetryAction::Escalate
            }
            _ => RetryAction::Retry,
        };
        (
            action,
            format!("{}.{}.{}", mode, failure_class, attempt_bucket),
        )
    };
    PolicyDecision {
        mode,
        failure_class,
        attempt_bucket,
        action,
        rule_id,
    }
}

/// Resolve the action for a gate failure at `attempt` (1-based).
///
/// Returns the selected action and the policy decision for the orchestration log.
pub fn resolve_action(
    mode: PolicyMode,
    failure: &GateFailure,
    attempt: u32,
    max_attempts: u32,
) -> (RetryAction, PolicyDecision) {
    let failure_class = classify_failure(failure.phase, &failure.verdict);
    let metadata_present = !failure.verdict.trim().is_empty();
    let decision = evaluate_policy(mode, failure_class, attempt, max_attempts, metadata_present);
    let action = match mode {
        PolicyMode::Enforce => decision.action,
        PolicyMode::Off | PolicyMode::Observe => decide(attempt, max_attempts),
    };
    (action, decision)
}

/// States of the per-phase gate loop driven by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    /// Re-check the phase's verdict.
    Running,
    /// The last check failed; consult the policy and possibly re-run.
    Retrying(GateFailure),
    /// Budget exhausted. Terminal.
    Escalated {
        failure: GateFailure,
        attempt: u32,
    },
    /// Gate passed. Terminal.
    Done,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Escalated { .. } | RetryState::Done)
    }
}
