//! One supervised cycle: landing baseline, phased engine, quality gates, landing.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::CycleFailure;
use crate::landing::{LandingManager, LandingScope, discover_repo_root};
use crate::orchestrator::PhaseEngine;
use crate::rpi_config::{EngineOptions, LandingPolicy, SupervisorConfig};
use crate::supervisor::gates::QualityGates;
use tokio_util::sync::CancellationToken;

/// Runs a single attempt of a cycle. The supervisor loop owns retries.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, goal: &str, cycle: u32, attempt: u32) -> Result<(), CycleFailure>;
}

type EngineFactory = Arc<dyn Fn(u32) -> PhaseEngine + Send + Sync>;

/// The production cycle built on [`PhaseEngine`], [`QualityGates`] and [`LandingManager`].
pub struct PhasedCycle {
    config: Config,
    settings: SupervisorConfig,
    bd_command: String,
    engines: EngineFactory,
}

impl PhasedCycle {
    pub fn new(
        config: Config,
        settings: SupervisorConfig,
        opts: EngineOptions,
        cancel: CancellationToken,
    ) -> Self {
        let engine_config = config.clone();
        let bd_command = opts.bd_command.clone();
        let engines: EngineFactory = Arc::new(move |cycle| {
            PhaseEngine::new(engine_config.clone(), opts.clone())
                .with_cycle(cycle)
                .with_cancellation(cancel.clone())
        });
        Self {
            config,
            settings,
            bd_command,
            engines,
        }
    }

    /// Replace how each cycle's engine is built.
    pub fn with_engine_factory(
        mut self,
        factory: impl Fn(u32) -> PhaseEngine + Send + Sync + 'static,
    ) -> Self {
        self.engines = Arc::new(factory);
        self
    }

    fn capture_scope(&self) -> anyhow::Result<Option<(LandingManager, LandingScope)>> {
        if self.settings.landing_policy == LandingPolicy::Off {
            return Ok(None);
        }
        let root = discover_repo_root(&self.config.project_dir)?;
        let scope = LandingScope::capture(&root)?;
        tracing::debug!(baseline = scope.baseline().len(), "landing baseline captured");
        let manager = LandingManager::new(&root, &self.settings, &self.bd_command);
        Ok(Some((manager, scope)))
    }
}

#[async_trait]
impl CycleRunner for PhasedCycle {
    async fn run_cycle(&self, goal: &str, cycle: u32, attempt: u32) -> Result<(), CycleFailure> {
        let landing = self
            .capture_scope()
            .map_err(|e| CycleFailure::infrastructure("capture landing scope", e))?;

        let engine = (self.engines)(cycle);
        engine
            .run(goal, 1)
            .await
            .map_err(|e| CycleFailure::task("phased engine", e))?;

        QualityGates::new(
            self.settings.gate_policy,
            self.settings.gate_scripts.clone(),
            &self.config.project_dir,
            self.settings.command_timeout,
        )
        .run()
        .await
        .map_err(|e| CycleFailure::task("quality gates", e))?;

        if let Some((manager, scope)) = landing {
            let message = self.settings.render_commit_message(cycle, attempt, goal);
            let outcome = manager
                .land(self.settings.landing_policy, &message, &scope)
                .await
                .map_err(|e| CycleFailure::infrastructure("landing", e))?;
            tracing::info!(cycle, attempt, ?outcome, "landing finished");
        }
        Ok(())
    }
}
