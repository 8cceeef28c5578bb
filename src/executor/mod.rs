//! Agent session backends.
//!
//! A [`PhaseExecutor`] runs one prompt to completion in the agent runtime:
//!
//! - `direct` runs `<runtime> -p <prompt>` with the terminal attached
//! - `stream` adds `--output-format stream-json --verbose`, parses events for live
//!   status, and watches for startup and stall timeouts. Degraded streams fall back
//!   to `direct` once.
//!
//! Backend selection is deterministic: an explicit runtime mode wins, and `auto`
//! picks `stream` only when live status is enabled.

pub mod direct;
pub mod events;
pub mod stream;

pub use direct::DirectExecutor;
pub use stream::StreamExecutor;

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::errors::ExecError;
use crate::rpi_config::{EngineOptions, RuntimeMode};

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Backend identifier recorded in the run state.
    fn name(&self) -> &'static str;

    /// Run `prompt` in `cwd` and block until the session ends.
    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        run_id: &str,
        phase: u32,
    ) -> Result<(), ExecError>;
}

/// Pick the backend for `opts` and return it with a human-readable reason.
pub fn select_executor(opts: &EngineOptions) -> (Box<dyn PhaseExecutor>, &'static str) {
    match opts.runtime_mode {
        RuntimeMode::Stream => (Box::new(StreamExecutor::from_options(opts)), "runtime=stream"),
        RuntimeMode::Direct => (Box::new(DirectExecutor::from_options(opts)), "runtime=direct"),
        RuntimeMode::Auto if opts.live_status => (
            Box::new(StreamExecutor::from_options(opts)),
            "runtime=auto live-status enabled",
        ),
        RuntimeMode::Auto => (
            Box::new(DirectExecutor::from_options(opts)),
            "runtime=auto live-status disabled",
        ),
    }
}

/// Whether an environment variable must be withheld from agent sessions.
///
/// The runtime refuses to start when it sees its own nesting markers.
pub fn is_stripped_env(key: &str) -> bool {
    key == "CLAUDECODE" || key.starts_with("CLAUDE_CODE_")
}

/// Build a runtime command in `cwd` with nesting markers removed from the environment.
pub(crate) fn runtime_command(program: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(cwd).kill_on_drop(true).env_clear();
    cmd.envs(std::env::vars_os().filter(|(k, _)| !is_stripped_env(&k.to_string_lossy())));
    cmd
}
