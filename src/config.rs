use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::rpi_config::RpiToml;

/// Runtime paths for one project.
///
/// Every artifact the engine and supervisor touch lives under `.agents/` in the
/// project directory. This struct resolves those paths once and carries the parsed
/// `rpi.toml` so commands can layer CLI flags on top of it.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub rpi_dir: PathBuf,
    pub state_file: PathBuf,
    pub runs_dir: PathBuf,
    pub log_file: PathBuf,
    pub council_dir: PathBuf,
    pub queue_file: PathBuf,
    toml: RpiToml,
}

impl Config {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let rpi_dir = project_dir.join(".agents").join("rpi");
        let toml = RpiToml::load_or_default(&rpi_dir)?;
        Ok(Self::with_toml(project_dir, toml))
    }

    /// Build paths without touching the filesystem.
    pub fn with_toml(project_dir: PathBuf, toml: RpiToml) -> Self {
        let agents_dir = project_dir.join(".agents");
        let rpi_dir = agents_dir.join("rpi");
        Self {
            state_file: rpi_dir.join("phased-state.json"),
            runs_dir: rpi_dir.join("runs"),
            log_file: rpi_dir.join("phased-orchestration.log"),
            queue_file: rpi_dir.join("next-work.jsonl"),
            council_dir: agents_dir.join("council"),
            rpi_dir,
            project_dir,
            toml,
        }
    }

    pub fn toml(&self) -> &RpiToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.rpi_dir).context("Failed to create .agents/rpi directory")?;
        std::fs::create_dir_all(&self.runs_dir).context("Failed to create runs directory")?;
        Ok(())
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn phase_result_path(&self, phase: u32) -> PathBuf {
        phase_file(&self.rpi_dir, phase, "result.json")
    }

    pub fn summary_path(&self, phase: u32) -> PathBuf {
        phase_file(&self.rpi_dir, phase, "summary.md")
    }

    pub fn handoff_path(&self, phase: u32) -> PathBuf {
        phase_file(&self.rpi_dir, phase, "handoff.md")
    }
}

fn phase_file(rpi_dir: &Path, phase: u32, suffix: &str) -> PathBuf {
    rpi_dir.join(format!("phase-{}-{}", phase, suffix))
}
