use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use super::{PhaseExecutor, runtime_command};
use crate::errors::ExecError;
use crate::rpi_config::EngineOptions;

/// Runs `<runtime> -p <prompt>` with the terminal attached.
pub struct DirectExecutor {
    command: String,
    phase_timeout: Duration,
}

impl DirectExecutor {
    /// A zero `phase_timeout` disables the wall-clock limit.
    pub fn new(command: impl Into<String>, phase_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            phase_timeout,
        }
    }

    pub fn from_options(opts: &EngineOptions) -> Self {
        Self::new(opts.runtime_command.clone(), opts.phase_timeout)
    }
}

#[async_trait]
impl PhaseExecutor for DirectExecutor {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        run_id: &str,
        phase: u32,
    ) -> Result<(), ExecError> {
        tracing::debug!(run_id, phase, command = %self.command, "spawning direct session");
        let mut child = runtime_command(&self.command, cwd)
            .arg("-p")
            .arg(prompt)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        let waited = if self.phase_timeout.is_zero() {
            child.wait().await
        } else {
            match tokio::time::timeout(self.phase_timeout, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ExecError::Timeout {
                        phase,
                        after: self.phase_timeout,
                    });
                }
            }
        };

        let status = waited.map_err(|source| ExecError::Wait {
            command: self.command.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ExecError::NonZeroExit {
                command: self.command.clone(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}
