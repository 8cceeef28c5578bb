use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};

use super::events::{SessionProgress, parse_event};
use super::{DirectExecutor, PhaseExecutor, runtime_command};
use crate::errors::ExecError;
use crate::rpi_config::EngineOptions;
use crate::ui;

const MAX_STARTUP_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Runs the agent with `stream-json` output and watchdogs on the event stream.
pub struct StreamExecutor {
    command: String,
    phase_timeout: Duration,
    stall_timeout: Duration,
    startup_timeout: Duration,
    check_interval: Duration,
}

/// Why the read loop stopped before the stream ended on its own.
enum Interrupt {
    PhaseTimeout,
    Startup,
    Stall,
}

impl StreamExecutor {
    pub fn from_options(opts: &EngineOptions) -> Self {
        Self {
            command: opts.runtime_command.clone(),
            phase_timeout: opts.phase_timeout,
            stall_timeout: opts.stall_timeout,
            startup_timeout: opts.stream_startup_timeout,
            check_interval: opts.stall_check_interval,
        }
    }

    fn direct_fallback(&self) -> DirectExecutor {
        DirectExecutor::new(self.command.clone(), self.phase_timeout)
    }

    async fn run_stream(&self, prompt: &str, cwd: &Path, phase: u32) -> Result<(), ExecError> {
        let mut child = runtime_command(&self.command, cwd)
            .args(["-p", prompt, "--output-format", "stream-json", "--verbose"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::StreamStartup("stdout pipe unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let started = Instant::now();
        let far_future = started + Duration::from_secs(365 * 24 * 3600);
        let deadline = if self.phase_timeout.is_zero() {
            far_future
        } else {
            started + self.phase_timeout
        };
        let phase_timer = sleep_until(deadline);
        tokio::pin!(phase_timer);

        let check = if self.check_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.check_interval
        };
        let mut startup_tick = interval(check.min(MAX_STARTUP_CHECK_INTERVAL));
        let mut stall_tick = interval(check);
        startup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let spinner = ui::session_spinner(phase);
        let mut progress = SessionProgress::default();
        let mut events: u64 = 0;
        let mut last_activity = started;
        let mut read_error: Option<String> = None;

        let interrupt = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_event(&line) {
                            events += 1;
                            last_activity = Instant::now();
                            progress.apply(&event);
                            spinner.set_message(progress.current_action.clone());
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => {
                        read_error = Some(e.to_string());
                        break None;
                    }
                },
                _ = &mut phase_timer => break Some(Interrupt::PhaseTimeout),
                _ = startup_tick.tick(), if !self.startup_timeout.is_zero() && events == 0 => {
                    if started.elapsed() > self.startup_timeout {
                        break Some(Interrupt::Startup);
                    }
                }
                _ = stall_tick.tick(), if !self.stall_timeout.is_zero() => {
                    if last_activity.elapsed() > self.stall_timeout {
                        break Some(Interrupt::Stall);
                    }
                }
            }
        };

        spinner.finish_and_clear();

        if let Some(interrupt) = interrupt {
            kill(&mut child).await;
            return Err(match interrupt {
                Interrupt::PhaseTimeout => ExecError::Timeout {
                    phase,
                    after: self.phase_timeout,
                },
                Interrupt::Startup => ExecError::StreamStartup(format!(
                    "no events received after {}s",
                    self.startup_timeout.as_secs()
                )),
                Interrupt::Stall => ExecError::Stall {
                    phase,
                    idle: self.stall_timeout,
                },
            });
        }

        let waited = tokio::select! {
            status = child.wait() => status,
            _ = &mut phase_timer => {
                kill(&mut child).await;
                return Err(ExecError::Timeout { phase, after: self.phase_timeout });
            }
        };
        let status = waited.map_err(|source| ExecError::Wait {
            command: self.command.clone(),
            source,
        })?;

        if !status.success() {
            return Err(ExecError::NonZeroExit {
                command: self.command.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        if let Some(e) = read_error {
            return Err(ExecError::StreamParse(e));
        }
        if events == 0 {
            return Err(ExecError::StreamStartup(
                "stream completed without parseable events".to_string(),
            ));
        }
        tracing::debug!(
            phase,
            events,
            tools = progress.tool_count,
            turns = progress.turn_count,
            "stream session finished"
        );
        Ok(())
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill agent session");
    }
}

#[async_trait]
impl PhaseExecutor for StreamExecutor {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        run_id: &str,
        phase: u32,
    ) -> Result<(), ExecError> {
        let err = match self.run_stream(prompt, cwd, phase).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !err.should_fall_back_to_direct() {
            return Err(err);
        }
        ui::print_warning(&format!(
            "Stream backend degraded for phase {}; falling back to direct execution ({})",
            phase, err
        ));
        tracing::warn!(run_id, phase, error = %err, "stream backend degraded, falling back to direct");
        self.direct_fallback()
            .execute(prompt, cwd, run_id, phase)
            .await
            .map_err(|direct| ExecError::FallbackFailed {
                stream: Box::new(err),
                direct: Box::new(direct),
            })
    }
}
