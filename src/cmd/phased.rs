//! `rpi phased`: one run of the three-phase workflow.

use anyhow::Result;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use rpi::config::Config;
use rpi::orchestrator::PhaseEngine;
use rpi::phase::resolve_phase;

use super::engine_options;
use crate::EngineArgs;

pub async fn cmd_phased(
    project_dir: PathBuf,
    goal: Option<&str>,
    from: Option<&str>,
    args: &EngineArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let config = Config::new(project_dir)?;
    let opts = engine_options(&config, args)?;
    let start_phase = match from {
        Some(name) => resolve_phase(name)?,
        None => 1,
    };

    let engine = PhaseEngine::new(config, opts).with_cancellation(cancel);
    let state = engine.run(goal.unwrap_or_default(), start_phase).await?;
    tracing::debug!(run_id = %state.run_id, "phased run finished");
    Ok(())
}
