//! Prompt construction for phase sessions.
//!
//! Every prompt opens with the context-discipline preamble and the summary
//! contract so both survive context compaction. Phases 2 and 3 then get a context
//! block carrying the goal, verdicts so far, and prior phase summaries. The skill
//! invocation comes last.

use std::fmt::Write;
use std::path::Path;

use crate::gates::Finding;
use crate::phase::{Phase, get_phase};
use crate::state::RunState;
use crate::util::truncate_chars;

/// Per-summary cap when carrying prior phases into a prompt.
pub const SUMMARY_CAP: usize = 2000;

/// Retry details fed into a targeted retry prompt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    pub attempt: u32,
    pub max_retries: u32,
    pub findings: &'a [Finding],
}

fn context_discipline(phase: &Phase) -> String {
    let n = phase.number;
    format!(
        "CONTEXT DISCIPLINE: You are running inside rpi phased (phase {n} of 3). Each phase gets a FRESH context window. Stay disciplined:\n\
- Do NOT accumulate large file contents in context. Read files with the Read tool JIT and extract only what you need.\n\
- Do NOT explore broadly when narrow exploration suffices. Be surgical.\n\
- Write findings, plans, and results to DISK (files in .agents/), not just in conversation.\n\
- If you are delegating to workers or spawning agents, do NOT accumulate their full output. Read their result files from disk.\n\
- If you notice context degradation (forgetting earlier instructions, repeating yourself, losing track of the goal), IMMEDIATELY write a handoff to .agents/rpi/phase-{n}-handoff.md with: (1) what you accomplished, (2) what remains, (3) key context. Then finish cleanly.\n\
{budget}\n",
        budget = phase.context_budget()
    )
}

fn summary_contract(phase: &Phase) -> String {
    format!(
        "PHASE SUMMARY CONTRACT: Before finishing this session, write a concise summary (max 500 tokens) to .agents/rpi/phase-{}-summary.md covering key insights, tradeoffs considered, and risks for subsequent phases. This file is read by the next phase.\n\n",
        phase.number
    )
}

fn preamble(phase: &Phase) -> String {
    let mut out = context_discipline(phase);
    out.push_str(&summary_contract(phase));
    out
}

/// `Prefer: ... Fallback direct command:` lines for swarm-first steps.
fn swarm_step(swarm_first: bool, prefer: &str) -> String {
    if swarm_first {
        format!("Prefer: {}\nFallback direct command:\n", prefer)
    } else {
        String::new()
    }
}

fn quick(fast_path: bool) -> &'static str {
    if fast_path { " --quick" } else { "" }
}

fn epic(state: &RunState) -> &str {
    state.epic_id.as_deref().unwrap_or_default()
}

fn crank_invocation(state: &RunState) -> String {
    let test_first = if state.test_first { " --test-first" } else { "" };
    format!("/crank {}{}", epic(state), test_first)
}

fn discovery_skills(state: &RunState) -> String {
    let auto = if state.opts.interactive { "" } else { " --auto" };
    let mut out = String::new();
    if state.swarm_first {
        out.push_str(
            "SWARM-FIRST EXECUTION CONTRACT:\n\
- Default to /swarm for each step in this phase (research, plan, pre-mortem) using a lead + worker team pattern.\n\
- If /swarm runtime is unavailable, execute the direct commands below in this same session.\n\
- Keep worker outputs on disk and consume thin summaries only.\n\n",
        );
    }
    out.push_str("Run these skills IN SEQUENCE. Do not skip any step.\n\n");
    let _ = write!(
        out,
        "STEP 1 - Research:\n{}/research \"{}\"{}\n\n",
        swarm_step(state.swarm_first, "execute this step via /swarm with research-focused workers."),
        state.goal,
        auto
    );
    let _ = write!(
        out,
        "STEP 2 - Plan:\nAfter research completes, run:\n{}/plan \"{}\"{}\n\n",
        swarm_step(
            state.swarm_first,
            "execute this step via /swarm with planning/decomposition workers."
        ),
        state.goal,
        auto
    );
    let _ = write!(
        out,
        "STEP 3 - Pre-mortem:\nAfter plan completes, run:\n{}/pre-mortem{}\n\n",
        swarm_step(
            state.swarm_first,
            "execute this step via /swarm (including council/critique workers when available)."
        ),
        quick(state.fast_path)
    );
    out.push_str(
        "If pre-mortem returns FAIL, re-run /plan with the findings and then /pre-mortem again. Max 3 total attempts. If still FAIL after 3 attempts, stop and report.\n\
If pre-mortem returns PASS or WARN, proceed.",
    );
    out
}

fn implementation_skills(state: &RunState) -> String {
    let mut out = String::new();
    if state.swarm_first {
        out.push_str(
            "SWARM-FIRST EXECUTION CONTRACT:\n\
- Run implementation with swarm-managed waves by default (lead + worker teams).\n\
- Prefer crank paths that delegate to /swarm for wave execution.\n\n",
        );
    }
    out.push_str(&crank_invocation(state));
    out
}

fn validation_skills(state: &RunState) -> String {
    let mut out = String::new();
    if state.swarm_first {
        out.push_str(
            "SWARM-FIRST EXECUTION CONTRACT:\n\
- Use swarm/team execution for validation and retrospective steps where available.\n\
- Keep validator and implementer contexts isolated; do not reuse implementation worker context.\n\n",
        );
    }
    out.push_str("Run these skills IN SEQUENCE. Do not skip any step.\n\n");
    let _ = write!(
        out,
        "STEP 1 - Vibe:\n{}/vibe{} recent\n\n",
        swarm_step(state.swarm_first, "execute vibe using /swarm-driven validation workers."),
        quick(state.fast_path)
    );
    out.push_str(
        "If vibe returns FAIL, STOP and report the findings. Do NOT proceed to post-mortem.\n\
If vibe returns PASS or WARN, proceed.\n\n",
    );
    let _ = write!(
        out,
        "STEP 2 - Post-mortem:\n{}/post-mortem{} {}",
        swarm_step(state.swarm_first, "execute post-mortem using /swarm-driven retro workers."),
        quick(state.fast_path),
        epic(state)
    );
    out
}

/// Context block from the goal, verdicts so far, and summaries of phases before `phase`.
///
/// Returns an empty string when there is nothing to carry forward.
pub fn build_phase_context(rpi_dir: &Path, state: &RunState, phase: u32) -> String {
    let mut parts = Vec::new();
    if !state.goal.is_empty() {
        parts.push(format!("Goal: {}", state.goal));
    }
    for (key, verdict) in &state.verdicts {
        parts.push(format!("{} verdict: {}", key.replace('_', "-"), verdict));
    }
    let summaries = read_phase_summaries(rpi_dir, phase);
    if !summaries.is_empty() {
        parts.push(summaries);
    }
    if parts.is_empty() {
        return String::new();
    }
    format!("--- RPI Context (from prior phases) ---\n{}", parts.join("\n"))
}

fn read_phase_summaries(rpi_dir: &Path, current: u32) -> String {
    let mut summaries = Vec::new();
    for n in 1..current {
        let path = rpi_dir.join(format!("phase-{}-summary.md", n));
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let content = raw.trim();
        if content.is_empty() {
            continue;
        }
        let name = get_phase(n).map(|p| p.name).unwrap_or("unknown");
        summaries.push(format!(
            "[Phase {}: {}]\n{}",
            n,
            name,
            truncate_chars(content, SUMMARY_CAP)
        ));
    }
    summaries.join("\n\n")
}

/// Full prompt for a phase session.
pub fn build_prompt(rpi_dir: &Path, phase: &Phase, state: &RunState) -> String {
    let skills = match phase.number {
        1 => discovery_skills(state),
        2 => implementation_skills(state),
        _ => validation_skills(state),
    };

    let mut prompt = preamble(phase);
    if phase.number >= 2 {
        let context = build_phase_context(rpi_dir, state, phase.number);
        if !context.is_empty() {
            prompt.push_str(&context);
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(&skills);
    prompt
}

/// Targeted retry prompt carrying only the findings to address.
///
/// Validation failures re-crank the epic with the findings attached. Other phases
/// have no targeted form and get their regular prompt.
pub fn build_retry_prompt(
    rpi_dir: &Path,
    phase: &Phase,
    state: &RunState,
    retry: &RetryContext<'_>,
) -> String {
    if phase.number != 3 {
        return build_prompt(rpi_dir, phase, state);
    }
    let mut prompt = preamble(phase);
    prompt.push_str(&crank_invocation(state));
    let _ = write!(
        prompt,
        "\n\nVibe FAIL (attempt {}/{}). Address these findings:\n",
        retry.attempt, retry.max_retries
    );
    for f in retry.findings {
        let _ = writeln!(
            prompt,
            "FINDING: {} | FIX: {} | REF: {}",
            f.description, f.fix, f.reference
        );
    }
    prompt
}
