//! `rpi status`: the latest run state and its heartbeat.

use anyhow::Result;
use chrono::Utc;
use console::style;
use std::path::PathBuf;

use rpi::config::Config;
use rpi::phase::{PHASES, get_phase};
use rpi::state::StateStore;
use rpi::util::format_duration;

pub fn cmd_status(project_dir: PathBuf) -> Result<()> {
    let config = Config::new(project_dir)?;
    let store = StateStore::new(&config);

    let Some(state) = store.load_optional()? else {
        println!();
        println!("No phased run found. Start one with 'rpi phased <goal>'.");
        println!();
        return Ok(());
    };

    let phase_name = get_phase(state.phase).map(|p| p.name).unwrap_or("unknown");
    println!();
    println!("{}", style("RPI run").bold());
    println!("  Run ID:   {}", state.run_id);
    println!("  Goal:     {}", state.goal);
    println!(
        "  Phase:    {}/{} ({})",
        state.phase,
        PHASES.len(),
        phase_name
    );
    if let Some(epic) = &state.epic_id {
        println!("  Epic:     {}", epic);
    }
    if let Some(backend) = &state.backend {
        println!("  Backend:  {}", backend);
    }
    if state.cycle > 1 {
        println!("  Cycle:    {}", state.cycle);
    }
    for (name, verdict) in &state.verdicts {
        println!("  Verdict:  {} = {}", name, verdict);
    }
    for (key, count) in &state.attempts {
        println!("  Retries:  {} = {}", key, count);
    }

    match (&state.terminal_status, &state.terminal_reason) {
        (Some(status), reason) => {
            let status = format!("{:?}", status).to_lowercase();
            println!(
                "  Status:   {} {}",
                style(status).bold(),
                style(reason.as_deref().unwrap_or_default()).dim()
            );
        }
        (None, _) => println!("  Status:   {}", style("running").bold()),
    }

    match store.read_heartbeat(&state.run_id) {
        Some(beat) => {
            let age = (Utc::now() - beat).to_std().unwrap_or_default();
            println!("  Heartbeat: {} ago", format_duration(age));
        }
        None => println!("  Heartbeat: none"),
    }
    println!();
    Ok(())
}
