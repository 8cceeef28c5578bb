use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "rpi")]
#[command(version, about = "Phased workflow engine and autonomous supervisor")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run discovery, implementation and validation as separate agent sessions
    Phased {
        /// What to build. Optional when resuming from phase 2 or later.
        goal: Option<String>,

        /// Start (or resume) from a phase: discovery, implementation, validation, or 1-3
        #[arg(long)]
        from: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run phased cycles from the work queue, with gates and landing
    Loop {
        /// Run this goal once instead of draining the queue
        goal: Option<String>,

        #[command(flatten)]
        supervisor: LoopArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Show the current run state and heartbeat age
    Status,
}

/// Engine flags shared by `phased` and `loop`. Unset flags fall back to rpi.toml.
#[derive(Args, Clone, Default)]
pub struct EngineArgs {
    /// Print the prompts that would run without spawning anything
    #[arg(long)]
    pub dry_run: bool,

    /// Gate retries per phase before escalating
    #[arg(long)]
    pub max_retries: Option<i64>,

    /// Wall-clock limit per phase session (e.g. 90m)
    #[arg(long)]
    pub phase_timeout: Option<String>,

    /// Kill a session that produces no events for this long
    #[arg(long)]
    pub stall_timeout: Option<String>,

    /// Fall back to direct mode if the stream emits nothing for this long
    #[arg(long)]
    pub stream_startup_timeout: Option<String>,

    /// Executor backend: auto, direct, or stream
    #[arg(long)]
    pub runtime: Option<String>,

    /// Agent runtime command
    #[arg(long)]
    pub runtime_cmd: Option<String>,

    /// Issue tracker command
    #[arg(long)]
    pub bd_cmd: Option<String>,

    /// Progress tracker command
    #[arg(long)]
    pub ao_cmd: Option<String>,

    /// Gate failure policy mode: off, observe, or enforce
    #[arg(long)]
    pub policy_mode: Option<String>,

    /// Ask implementation to write tests first
    #[arg(long)]
    pub test_first: bool,

    /// Skip the swarm-first execution hints in prompts
    #[arg(long)]
    pub no_swarm_first: bool,

    /// Force the fast path for small epics
    #[arg(long)]
    pub fast_path: bool,

    /// Show a live progress spinner (selects the stream backend in auto mode)
    #[arg(long)]
    pub live_status: bool,
}

/// Supervisor flags for `loop`.
#[derive(Args, Clone, Default)]
pub struct LoopArgs {
    /// Use the autonomous defaults: lease, continue on failure, retries, gates
    #[arg(long)]
    pub supervisor: bool,

    /// Stop after this many cycles (0 = until the queue is empty)
    #[arg(long)]
    pub max_cycles: Option<i64>,

    /// stop or continue after a failed cycle
    #[arg(long)]
    pub failure_policy: Option<String>,

    /// Extra attempts per cycle
    #[arg(long)]
    pub cycle_retries: Option<i64>,

    #[arg(long)]
    pub retry_backoff: Option<String>,

    #[arg(long)]
    pub cycle_delay: Option<String>,

    /// Hold the single-flight supervisor lease
    #[arg(long)]
    pub lease: Option<bool>,

    #[arg(long)]
    pub lease_path: Option<PathBuf>,

    #[arg(long)]
    pub lease_ttl: Option<String>,

    /// off, best-effort, or required
    #[arg(long)]
    pub gate_policy: Option<String>,

    /// Gate script to run after the engine (repeatable)
    #[arg(long = "gate-script")]
    pub gate_scripts: Vec<PathBuf>,

    /// off, commit, or sync-push
    #[arg(long)]
    pub landing_policy: Option<String>,

    #[arg(long)]
    pub landing_branch: Option<String>,

    /// Commit message template ({{cycle}}, {{attempt}}, {{goal}})
    #[arg(long)]
    pub landing_commit_message: Option<String>,

    #[arg(long)]
    pub landing_lock_path: Option<PathBuf>,

    /// auto, always, or never
    #[arg(long)]
    pub bd_sync_policy: Option<String>,

    /// Timeout for gate scripts and landing commands
    #[arg(long)]
    pub command_timeout: Option<String>,

    #[arg(long)]
    pub kill_switch_path: Option<PathBuf>,

    /// Only take queue items targeting this repo
    #[arg(long)]
    pub repo_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current session");
            on_signal.cancel();
        }
    });

    match &cli.command {
        Commands::Phased { goal, from, engine } => {
            cmd::cmd_phased(project_dir, goal.as_deref(), from.as_deref(), engine, cancel).await?;
        }
        Commands::Loop {
            goal,
            supervisor,
            engine,
        } => {
            cmd::cmd_loop(project_dir, goal.as_deref(), supervisor, engine, cancel).await?;
        }
        Commands::Status => cmd::cmd_status(project_dir)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "rpi=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
