//! Typed error hierarchy for the rpi engine and supervisor.
//!
//! Top-level enums, one per subsystem:
//! - `ExecError`: agent session failures, classified by `FailureReason`
//! - `PhaseError`: per-phase failures, including retryable gate failures
//! - `LeaseError`: single-flight lock acquisition failures
//! - `ConfigError`: invalid policy or option values, raised before any side effect
//! - `CycleFailure`: supervisor cycle failures tagged with a `FailureKind`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::gates::GateFailure;

/// Coarse classification of a failed agent session, consumed by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Stall,
    ExitError,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Stall => "stall",
            FailureReason::ExitError => "exit_error",
            FailureReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from spawning and supervising one agent session.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("phase {phase} (timeout) timed out after {}s (set --phase-timeout to increase)", .after.as_secs())]
    Timeout { phase: u32, after: Duration },

    #[error("phase {phase} (stall): stall detected: no stream activity for {}s", .idle.as_secs())]
    Stall { phase: u32, idle: Duration },

    #[error("stream startup timeout: {0}")]
    StreamStartup(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("{command} exited with code {code} (exit_error)")]
    NonZeroExit { command: String, code: i32 },

    #[error("{command} execution failed (unknown): {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stream execution failed: {stream}; direct fallback failed: {direct}")]
    FallbackFailed {
        stream: Box<ExecError>,
        direct: Box<ExecError>,
    },
}

impl ExecError {
    /// Classify this failure for the retry policy.
    pub fn reason(&self) -> FailureReason {
        match self {
            ExecError::Timeout { .. } => FailureReason::Timeout,
            ExecError::Stall { .. } => FailureReason::Stall,
            ExecError::NonZeroExit { .. } => FailureReason::ExitError,
            ExecError::FallbackFailed { direct, .. } => direct.reason(),
            ExecError::SpawnFailed { .. }
            | ExecError::StreamStartup(_)
            | ExecError::StreamParse(_)
            | ExecError::Wait { .. } => FailureReason::Unknown,
        }
    }

    /// Whether a stream-backend failure should be retried once with the direct backend.
    pub fn should_fall_back_to_direct(&self) -> bool {
        matches!(
            self,
            ExecError::StreamStartup(_) | ExecError::StreamParse(_) | ExecError::Stall { .. }
        )
    }
}

/// Errors from a single phase of the workflow.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Retryable: a report or tracker query produced a failing verdict.
    #[error("{0}")]
    Gate(GateFailure),

    #[error("phase {phase} prerequisite not met: {reason}")]
    PriorPhaseIncomplete { phase: u32, reason: String },

    #[error("phase {phase} ({name}) failed: {source}")]
    Execution {
        phase: u32,
        name: String,
        #[source]
        source: ExecError,
    },

    #[error("phase {phase} ({name}): gate failed after max retries")]
    Escalated { phase: u32, name: String },

    #[error("run interrupted during phase {phase} ({name})")]
    Interrupted { phase: u32, name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from acquiring a single-flight lease.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("single-flight lease already held: {holder}")]
    AlreadyHeld { path: PathBuf, holder: String },

    #[error("Failed to open lease file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid configuration, detected before any side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} {value:?} (valid: {valid})")]
    InvalidChoice {
        field: &'static str,
        value: String,
        valid: &'static str,
    },

    #[error("{field} must be >= 0")]
    Negative { field: &'static str },

    #[error("{field} {value} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        max: u32,
    },

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Conflict(String),
}

/// Which side of the cycle failed. Only task failures mark queue entries failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Task,
    Infrastructure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Task => write!(f, "task"),
            FailureKind::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// A supervisor cycle failure tagged with the stage that failed.
#[derive(Debug, Error)]
#[error("{kind} failure ({stage}): {source:#}")]
pub struct CycleFailure {
    pub kind: FailureKind,
    pub stage: String,
    #[source]
    pub source: anyhow::Error,
}

impl CycleFailure {
    pub fn task(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::wrap(FailureKind::Task, stage, source.into())
    }

    pub fn infrastructure(stage: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::wrap(FailureKind::Infrastructure, stage, source.into())
    }

    /// Wrap `source`, keeping an existing tag instead of nesting a second one.
    fn wrap(kind: FailureKind, stage: impl Into<String>, source: anyhow::Error) -> Self {
        match source.downcast::<CycleFailure>() {
            Ok(existing) => existing,
            Err(source) => Self {
                kind,
                stage: stage.into(),
                source,
            },
        }
    }

    /// Whether the originating work-queue entry should be marked failed.
    pub fn marks_queue_entry_failed(&self) -> bool {
        match self.kind {
            FailureKind::Task => true,
            FailureKind::Infrastructure => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::Finding;

    #[test]
    fn exec_error_timeout_is_classified() {
        let err = ExecError::Timeout {
            phase: 2,
            after: Duration::from_secs(90),
        };
        assert_eq!(err.reason(), FailureReason::Timeout);
        assert!(err.to_string().contains("phase 2 (timeout)"));
        assert!(!err.should_fall_back_to_direct());
    }

    #[test]
    fn exec_error_stall_falls_back_to_direct() {
        let err = ExecError::Stall {
            phase: 1,
            idle: Duration::from_secs(600),
        };
        assert_eq!(err.reason(), FailureReason::Stall);
        assert!(err.to_string().contains("no stream activity"));
        assert!(err.should_fall_back_to_direct());
    }

    #[test]
    fn exec_error_non_zero_exit_carries_code() {
        let err = ExecError::NonZeroExit {
            command: "claude".to_string(),
            code: 3,
        };
        match &err {
            ExecError::NonZeroExit { code, .. } => assert_eq!(*code, 3),
            _ => panic!("Expected NonZeroExit"),
        }
        assert_eq!(err.reason(), FailureReason::ExitError);
        assert_eq!(err.to_string(), "claude exited with code 3 (exit_error)");
    }

    #[test]
    fn fallback_failure_classified_by_direct_error() {
        let err = ExecError::FallbackFailed {
            stream: Box::new(ExecError::StreamParse("bad json".into())),
            direct: Box::new(ExecError::NonZeroExit {
                command: "claude".into(),
                code: 1,
            }),
        };
        assert_eq!(err.reason(), FailureReason::ExitError);
        assert!(err.to_string().contains("direct fallback failed"));
    }

    #[test]
    fn phase_error_gate_is_matchable() {
        let err = PhaseError::Gate(GateFailure {
            phase: 3,
            verdict: "FAIL".into(),
            findings: vec![Finding {
                description: "missing test".into(),
                fix: "add test".into(),
                reference: "src/lib.rs".into(),
            }],
            report: ".agents/council/vibe.md".into(),
        });
        match &err {
            PhaseError::Gate(g) => {
                assert_eq!(g.phase, 3);
                assert_eq!(g.findings.len(), 1);
            }
            _ => panic!("Expected Gate"),
        }
    }

    #[test]
    fn phase_error_escalated_message() {
        let err = PhaseError::Escalated {
            phase: 1,
            name: "discovery".into(),
        };
        assert_eq!(
            err.to_string(),
            "phase 1 (discovery): gate failed after max retries"
        );
    }

    #[test]
    fn cycle_failure_does_not_double_wrap() {
        let inner = CycleFailure::infrastructure("landing", anyhow::anyhow!("push rejected"));
        let outer = CycleFailure::task("phased engine", anyhow::Error::new(inner));
        assert_eq!(outer.kind, FailureKind::Infrastructure);
        assert_eq!(outer.stage, "landing");
        assert!(!outer.marks_queue_entry_failed());
    }

    #[test]
    fn cycle_failure_task_marks_queue_entry() {
        let err = CycleFailure::task("quality gates", anyhow::anyhow!("gate failures: a"));
        assert!(err.marks_queue_entry_failed());
        assert!(err.to_string().contains("quality gates"));
    }

    #[test]
    fn config_error_lists_valid_values() {
        let err = ConfigError::InvalidChoice {
            field: "landing-policy",
            value: "yolo".into(),
            valid: "off|commit|sync-push",
        };
        assert_eq!(
            err.to_string(),
            "invalid landing-policy \"yolo\" (valid: off|commit|sync-push)"
        );
    }

    #[test]
    fn lease_error_already_held_names_holder() {
        let err = LeaseError::AlreadyHeld {
            path: PathBuf::from("/tmp/x.lock"),
            holder: "run=abc pid=1 host=h renewed_at=t".into(),
        };
        assert!(err.to_string().contains("run=abc"));
    }
}
