//! The `git` command-line operations landing needs, each bounded by a timeout.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::{run_captured, run_checked};

pub struct GitCli {
    program: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: "git".to_string(),
            cwd: cwd.to_path_buf(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let out = run_checked(&self.program, args, &self.cwd, self.timeout).await?;
        Ok(out.stdout)
    }

    pub async fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args).await.context("git add owned paths failed")?;
        Ok(())
    }

    /// Commit exactly `paths`. Anything else already in the index stays staged
    /// and out of the commit.
    pub async fn commit_only(&self, message: &str, paths: &[String]) -> Result<()> {
        let mut args = vec!["commit", "-m", message, "--only", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args)
            .await
            .context("git commit failed")?;
        Ok(())
    }

    pub async fn fetch(&self, branch: &str) -> Result<()> {
        self.run(&["fetch", "origin", branch]).await?;
        Ok(())
    }

    pub async fn rebase_onto_origin(&self, branch: &str) -> Result<()> {
        self.run(&["rebase", &format!("origin/{}", branch)]).await?;
        Ok(())
    }

    pub async fn push_head(&self, branch: &str) -> Result<()> {
        self.run(&["push", "origin", &format!("HEAD:{}", branch)])
            .await
            .context("landing push failed")?;
        Ok(())
    }

    pub async fn status_short(&self) -> Result<String> {
        self.run(&["status", "-sb"]).await
    }

    /// Branch to publish to: the override, else origin's default branch, else the
    /// current branch, else `main`.
    pub async fn resolve_branch(&self, explicit: Option<&str>) -> String {
        if let Some(branch) = explicit.map(str::trim).filter(|b| !b.is_empty()) {
            return branch.to_string();
        }
        if let Ok(out) = self
            .run(&["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"])
            .await
        {
            let branch = out.trim();
            let branch = branch.strip_prefix("origin/").unwrap_or(branch).trim();
            if !branch.is_empty() {
                return branch.to_string();
            }
        }
        if let Ok(out) = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await {
            let branch = out.trim();
            if !branch.is_empty() && branch != "HEAD" {
                return branch.to_string();
            }
        }
        "main".to_string()
    }

    /// Abort any in-progress rebase and confirm the tree is readable again.
    pub async fn recover(&self) -> Result<()> {
        let abort = run_captured(&self.program, &["rebase", "--abort"], &self.cwd, self.timeout)
            .await
            .context("git rebase --abort failed")?;
        if !abort.success() && !is_no_rebase_in_progress(&abort.detail()) {
            anyhow::bail!("git rebase --abort failed: {}", abort.detail());
        }
        self.status_short()
            .await
            .context("git status during state recovery failed")?;
        Ok(())
    }
}

fn is_no_rebase_in_progress(output: &str) -> bool {
    let msg = output.trim().to_lowercase();
    !msg.is_empty() && (msg.contains("no rebase in progress") || msg.contains("no rebase to abort"))
}
