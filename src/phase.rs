//! Phase definitions for the rpi workflow.
//!
//! The workflow has exactly three phases, executed in order:
//! - `discovery`: research, plan, and pre-mortem in one session; creates the epic
//! - `implementation`: crank the epic
//! - `validation`: vibe the changes, then post-mortem
//!
//! Older step names are accepted as aliases when choosing where to start.

use anyhow::Result;
use std::fmt;

/// A single workflow phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    /// 1-based phase number
    pub number: u32,
    /// Canonical phase name
    pub name: &'static str,
    /// Step name recorded with the progress tracker after the phase completes
    pub step: &'static str,
}

pub const DISCOVERY: Phase = Phase {
    number: 1,
    name: "discovery",
    step: "research",
};

pub const IMPLEMENTATION: Phase = Phase {
    number: 2,
    name: "implementation",
    step: "implement",
};

pub const VALIDATION: Phase = Phase {
    number: 3,
    name: "validation",
    step: "validate",
};

pub const PHASES: [Phase; 3] = [DISCOVERY, IMPLEMENTATION, VALIDATION];

impl Phase {
    /// Key under which retry attempts for this phase are counted.
    pub fn attempt_key(&self) -> String {
        attempt_key(self.number)
    }

    /// Context budget guidance embedded in this phase's prompt.
    pub fn context_budget(&self) -> &'static str {
        match self.number {
            1 => {
                "BUDGET: This session runs research + plan + pre-mortem. Research: limit to ~15 file reads, write findings to .agents/research/. Plan: write to .agents/plans/, focus on issue creation. Pre-mortem: invoke /council, read the verdict, done. If pre-mortem FAILs, re-plan and re-run pre-mortem within this session (max 3 attempts)."
            }
            2 => {
                "BUDGET (CRITICAL): Crank is the highest-risk phase for context. /crank spawns workers internally. Do NOT re-read worker output into your context. Trust /crank to manage its waves. Read only the completion status."
            }
            _ => {
                "BUDGET: This session runs vibe + post-mortem. Vibe: invoke /council on recent changes, read the verdict. Post-mortem: invoke /council + /retro, read output files, write summary. Minimal context for both."
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub fn attempt_key(number: u32) -> String {
    format!("phase_{}", number)
}

/// Look up a phase by number.
pub fn get_phase(number: u32) -> Option<Phase> {
    PHASES.iter().copied().find(|p| p.number == number)
}

/// Phases from `start` (inclusive) to the end of the workflow.
pub fn get_phases_from(start: u32) -> Vec<Phase> {
    PHASES.iter().copied().filter(|p| p.number >= start).collect()
}

/// Resolve a phase name, alias, or number to a phase number.
pub fn resolve_phase(name: &str) -> Result<u32> {
    let normalized = name.trim().to_lowercase();
    if let Ok(n) = normalized.parse::<u32>()
        && get_phase(n).is_some()
    {
        return Ok(n);
    }
    let number = match normalized.as_str() {
        "discovery" | "research" | "plan" | "pre-mortem" | "premortem" | "pre_mortem" => 1,
        "implementation" | "crank" | "implement" => 2,
        "validation" | "vibe" | "validate" | "post-mortem" | "postmortem" | "post_mortem" => 3,
        _ => anyhow::bail!(
            "Unknown phase '{}'. Valid values: discovery, implementation, validation (or 1-3)",
            name
        ),
    };
    Ok(number)
}
