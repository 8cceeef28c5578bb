//! `rpi loop`: the autonomous supervisor.

use anyhow::Result;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use rpi::config::Config;
use rpi::rpi_config::SupervisorSettings;
use rpi::supervisor::Supervisor;

use super::engine_options;
use crate::{EngineArgs, LoopArgs};

impl LoopArgs {
    fn to_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            max_cycles: self.max_cycles,
            failure_policy: self.failure_policy.clone(),
            cycle_retries: self.cycle_retries,
            retry_backoff: self.retry_backoff.clone(),
            cycle_delay: self.cycle_delay.clone(),
            lease: self.lease,
            lease_path: self.lease_path.clone(),
            lease_ttl: self.lease_ttl.clone(),
            gate_policy: self.gate_policy.clone(),
            gate_scripts: (!self.gate_scripts.is_empty()).then(|| self.gate_scripts.clone()),
            landing_policy: self.landing_policy.clone(),
            landing_branch: self.landing_branch.clone(),
            landing_commit_message: self.landing_commit_message.clone(),
            landing_lock_path: self.landing_lock_path.clone(),
            bd_sync_policy: self.bd_sync_policy.clone(),
            command_timeout: self.command_timeout.clone(),
            kill_switch_path: self.kill_switch_path.clone(),
            repo_filter: self.repo_filter.clone(),
        }
    }
}

pub async fn cmd_loop(
    project_dir: PathBuf,
    goal: Option<&str>,
    args: &LoopArgs,
    engine: &EngineArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let config = Config::new(project_dir)?;
    let opts = engine_options(&config, engine)?;
    let settings = config
        .toml()
        .supervisor
        .clone()
        .merge(args.to_settings())
        .resolve(&config.project_dir, args.supervisor)?;
    tracing::debug!(?settings, "supervisor config resolved");

    let summary = Supervisor::new(config, settings, opts, cancel)
        .run(goal)
        .await?;
    tracing::debug!(?summary, "supervisor stopped");
    Ok(())
}
