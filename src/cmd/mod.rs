//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `phased`    | `Phased`         |
//! | `supervise` | `Loop`           |
//! | `status`    | `Status`         |
//!
//! Configuration is layered here, once per invocation: `rpi.toml`, then `RPI_*`
//! environment variables, then CLI flags. Every policy value is validated before
//! any command touches the filesystem.

pub mod phased;
pub mod status;
pub mod supervise;

pub use phased::cmd_phased;
pub use status::cmd_status;
pub use supervise::cmd_loop;

use anyhow::Result;
use rpi::config::Config;
use rpi::rpi_config::{EngineOptions, EngineSettings};

use crate::EngineArgs;

impl EngineArgs {
    fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            max_retries: self.max_retries,
            phase_timeout: self.phase_timeout.clone(),
            stall_timeout: self.stall_timeout.clone(),
            stream_startup_timeout: self.stream_startup_timeout.clone(),
            runtime: self.runtime.clone(),
            runtime_command: self.runtime_cmd.clone(),
            ao_command: self.ao_cmd.clone(),
            bd_command: self.bd_cmd.clone(),
            swarm_first: self.no_swarm_first.then_some(false),
            test_first: self.test_first.then_some(true),
            fast_path: self.fast_path.then_some(true),
            live_status: self.live_status.then_some(true),
            policy_mode: self.policy_mode.clone(),
            ..EngineSettings::default()
        }
    }
}

/// Resolve engine options from file, environment and flags.
pub fn engine_options(config: &Config, args: &EngineArgs) -> Result<EngineOptions> {
    let opts = config
        .toml()
        .engine
        .clone()
        .merge(EngineSettings::from_env())
        .merge(args.to_settings())
        .resolve(args.dry_run)?;
    tracing::debug!(?opts, "engine options resolved");
    Ok(opts)
}
