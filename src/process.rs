//! Bounded subprocess execution for collaborator CLIs (`bd`, `ao`, `git`, gate scripts).

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `program args...` in `cwd` and capture its output.
///
/// A zero `limit` means no timeout. On timeout the child is killed and an error is
/// returned. A non-zero exit is not an error here; callers inspect `code`.
pub async fn run_captured(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: Duration,
) -> Result<CommandOutput> {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let waited = if limit.is_zero() {
        child.wait_with_output().await
    } else {
        match timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => anyhow::bail!(
                "{} {} timed out after {}",
                program,
                args.join(" "),
                crate::util::format_duration(limit)
            ),
        }
    };
    let output = waited.with_context(|| format!("Failed to wait for {}", program))?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Like [`run_captured`], but a non-zero exit becomes an error carrying stderr.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: Duration,
) -> Result<CommandOutput> {
    let output = run_captured(program, args, cwd, limit).await?;
    if !output.success() {
        anyhow::bail!(
            "{} {} exited with code {}: {}",
            program,
            args.join(" "),
            output.code.unwrap_or(-1),
            output.detail()
        );
    }
    Ok(output)
}
