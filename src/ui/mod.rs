//! Terminal output for phased runs and the supervisor loop.
//!
//! Everything user-facing goes through here so styling stays consistent. Agent
//! sessions get an `indicatif` spinner that hides itself when stderr is not a TTY.

pub mod icons;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use icons::{CHECK, CLOCK, CROSS, ESCALATE, LAND, LOCK, PHASE, RETRY, WARN};

/// Banner printed before a phase's agent session starts.
pub fn print_phase_start(number: u32, total: u32, name: &str) {
    println!(
        "\n{}{} {}",
        PHASE,
        style(format!("Phase {}/{}:", number, total)).bold(),
        style(name).cyan()
    );
}

pub fn print_phase_complete(name: &str, elapsed: Duration) {
    println!(
        "{}{} {}",
        CHECK,
        style(name).green(),
        style(format!("completed in {}", crate::util::format_duration(elapsed))).dim()
    );
}

pub fn print_retry(name: &str, verdict: &str, attempt: u32, max: u32) {
    println!(
        "{}{}: {} (attempt {}/{}) {}",
        RETRY,
        style(name).yellow(),
        style(verdict).yellow().bold(),
        attempt,
        max,
        style("retrying").dim()
    );
}

pub fn print_escalation(message: &str) {
    println!("{}{}", ESCALATE, style(message).red().bold());
}

pub fn print_success(message: &str) {
    println!("{}{}", CHECK, style(message).green());
}

pub fn print_error(message: &str) {
    eprintln!("{}{}", CROSS, style(message).red());
}

pub fn print_warning(message: &str) {
    eprintln!("{}{}", WARN, style(message).yellow());
}

pub fn print_info(message: &str) {
    println!("  {} {}", style("→").dim(), message);
}

/// Prefixed line describing what a dry run would have done.
pub fn print_dry_run(message: &str) {
    println!("{} {}", style("[dry-run]").magenta().bold(), message);
}

pub fn print_landing(message: &str) {
    println!("{}{} {}", LAND, style("Landing:").bold(), message);
}

pub fn print_lease(message: &str) {
    println!("{}{}", LOCK, style(message).dim());
}

/// Header for one supervisor cycle.
pub fn print_cycle_header(cycle: u32) {
    println!(
        "\n{}",
        style(format!("=== RPI Loop: Cycle {} ===", cycle)).bold().cyan()
    );
}

pub fn print_wait(message: &str) {
    println!("{}{}", CLOCK, style(message).dim());
}

/// Spinner for a running agent session. The message tracks the latest stream action.
pub fn session_spinner(phase: u32) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_prefix(format!("phase {}", phase));
    spinner.set_message("starting session");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
