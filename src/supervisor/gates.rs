//! Quality gate scripts run between the phased engine and landing.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::run_captured;
use crate::rpi_config::GatePolicy;
use crate::ui;

pub struct QualityGates {
    policy: GatePolicy,
    scripts: Vec<PathBuf>,
    cwd: PathBuf,
    timeout: Duration,
}

impl QualityGates {
    pub fn new(policy: GatePolicy, scripts: Vec<PathBuf>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            policy,
            scripts,
            cwd: cwd.to_path_buf(),
            timeout,
        }
    }

    /// Run every configured script with `bash`.
    ///
    /// `required` fails on missing scripts and aggregates all failures into one
    /// error. `best-effort` skips missing scripts and only warns on failures.
    pub async fn run(&self) -> Result<()> {
        if self.policy == GatePolicy::Off {
            return Ok(());
        }

        let required = self.policy == GatePolicy::Required;
        let mut failures = Vec::new();
        for script in &self.scripts {
            if script.as_os_str().is_empty() {
                continue;
            }
            if let Err(e) = self.run_script(script, required).await {
                if required {
                    failures.push(format!("{:#}", e));
                } else {
                    tracing::warn!(gate = %script.display(), error = %format!("{:#}", e), "gate failed");
                    ui::print_warning(&format!("gate {} failed: {:#}", script.display(), e));
                }
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("gate failures: {}", failures.join("; "));
        }
        Ok(())
    }

    async fn run_script(&self, script: &Path, required: bool) -> Result<()> {
        let path = if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.cwd.join(script)
        };

        if !path.exists() {
            if required {
                anyhow::bail!("required gate script missing: {}", path.display());
            }
            ui::print_info(&format!("Skipping optional gate (missing): {}", path.display()));
            return Ok(());
        }
        if path.is_dir() {
            if required {
                anyhow::bail!("required gate path is a directory: {}", path.display());
            }
            ui::print_info(&format!(
                "Skipping optional gate (path is directory): {}",
                path.display()
            ));
            return Ok(());
        }

        ui::print_info(&format!("Running gate: {}", path.display()));
        let path_str = path.to_string_lossy();
        let out = run_captured("bash", &[path_str.as_ref()], &self.cwd, self.timeout)
            .await
            .map_err(|e| anyhow::anyhow!("gate script {} failed: {:#}", path.display(), e))?;
        if !out.success() {
            anyhow::bail!(
                "gate script {} failed: exit code {}: {}",
                path.display(),
                out.code.unwrap_or(-1),
                out.detail()
            );
        }
        tracing::debug!(gate = %path.display(), "gate passed");
        Ok(())
    }
}
