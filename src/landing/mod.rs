//! Ownership-scoped landing of a cycle's changes.
//!
//! Landing commits only the paths a cycle produced (see [`LandingScope`]) and, under
//! `sync-push`, rebases onto the remote branch and publishes. A failed fetch or
//! rebase is recovered by aborting the rebase; the recovery outcome is appended to
//! the error rather than swallowed. Every landing runs under its own lease so two
//! supervisors sharing a checkout never interleave commits.

pub mod git;
pub mod scope;

pub use git::GitCli;
pub use scope::LandingScope;

use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lease::Lease;
use crate::process::run_checked;
use crate::rpi_config::{BdSyncPolicy, LandingPolicy, SupervisorConfig};
use crate::state::new_run_id;
use crate::ui;

/// What a landing attempt ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingOutcome {
    Disabled,
    NoChanges,
    /// Every dirty path was already dirty before the cycle.
    BaselineOnly,
    Committed { paths: Vec<String> },
    Pushed { branch: String, paths: Vec<String> },
}

pub struct LandingManager {
    repo_root: PathBuf,
    git: GitCli,
    branch: Option<String>,
    lock_path: PathBuf,
    lease_ttl: Duration,
    bd_command: String,
    bd_sync_policy: BdSyncPolicy,
    command_timeout: Duration,
}

impl LandingManager {
    pub fn new(repo_root: &Path, config: &SupervisorConfig, bd_command: &str) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            git: GitCli::new(repo_root, config.command_timeout),
            branch: config.landing_branch.clone(),
            lock_path: config.landing_lock_path.clone(),
            lease_ttl: config.lease_ttl,
            bd_command: bd_command.to_string(),
            bd_sync_policy: config.bd_sync_policy,
            command_timeout: config.command_timeout,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Land the cycle's owned changes according to `policy`.
    pub async fn land(
        &self,
        policy: LandingPolicy,
        message: &str,
        scope: &LandingScope,
    ) -> Result<LandingOutcome> {
        if policy == LandingPolicy::Off {
            return Ok(LandingOutcome::Disabled);
        }

        let run_id = format!("{}-run-{}", policy, new_run_id());
        let lease = Lease::acquire(&self.lock_path, self.lease_ttl, &run_id)
            .context("landing lock acquisition failed")?;

        let result = self.land_locked(policy, message, scope).await;

        if let Err(e) = lease.release().await {
            tracing::warn!(error = %format!("{:#}", e), "could not release landing lock");
        }
        result
    }

    async fn land_locked(
        &self,
        policy: LandingPolicy,
        message: &str,
        scope: &LandingScope,
    ) -> Result<LandingOutcome> {
        let paths = match self.commit_owned(message, scope).await? {
            LandingOutcome::Committed { paths } => paths,
            skipped => {
                if policy == LandingPolicy::SyncPush {
                    ui::print_landing("no commit performed.");
                }
                return Ok(skipped);
            }
        };
        if policy == LandingPolicy::Commit {
            return Ok(LandingOutcome::Committed { paths });
        }

        let branch = self.git.resolve_branch(self.branch.as_deref()).await;
        self.recovering("fetch", self.git.fetch(&branch)).await?;
        self.recovering("rebase", self.git.rebase_onto_origin(&branch))
            .await?;
        self.sync_tracker().await?;
        self.git.push_head(&branch).await?;
        if let Ok(status) = self.git.status_short().await {
            tracing::debug!(status = %status.trim(), "post-push status");
        }
        ui::print_landing(&format!("pushed HEAD to origin/{}", branch));
        Ok(LandingOutcome::Pushed { branch, paths })
    }

    /// Stage and commit owned paths. Anything but `Committed` means no commit was made.
    async fn commit_owned(&self, message: &str, scope: &LandingScope) -> Result<LandingOutcome> {
        if scope::dirty_paths(&self.repo_root)?.is_empty() {
            ui::print_landing("no changes to commit.");
            return Ok(LandingOutcome::NoChanges);
        }
        let paths = scope.owned_paths(&self.repo_root)?;
        if paths.is_empty() {
            ui::print_landing("only pre-existing dirty paths detected; skipping autonomous commit.");
            return Ok(LandingOutcome::BaselineOnly);
        }

        self.git.add(&paths).await?;
        self.git.commit_only(message, &paths).await?;
        tracing::info!(paths = paths.len(), message, "landing commit created");
        ui::print_landing(&format!("committed {} owned path(s)", paths.len()));
        Ok(LandingOutcome::Committed { paths })
    }

    /// Run a sync step; on failure restore the working tree and report both outcomes.
    async fn recovering(
        &self,
        step: &str,
        op: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        let Err(err) = op.await else {
            return Ok(());
        };
        match self.git.recover().await {
            Ok(()) => anyhow::bail!("landing {} failed: {:#} (state recovered)", step, err),
            Err(recovery) => anyhow::bail!(
                "landing {} failed: {:#} (state recovery failed: {:#})",
                step,
                err,
                recovery
            ),
        }
    }

    async fn sync_tracker(&self) -> Result<()> {
        if !should_run_bd_sync(&self.repo_root, self.bd_sync_policy, &self.bd_command)? {
            return Ok(());
        }
        run_checked(&self.bd_command, &["sync"], &self.repo_root, self.command_timeout)
            .await
            .context("bd sync failed")?;
        Ok(())
    }
}

/// Root of the working tree containing `project_dir`.
pub fn discover_repo_root(project_dir: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(project_dir)
        .with_context(|| format!("{} is not inside a git repository", project_dir.display()))?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("git repository at {} is bare", project_dir.display()))
}

/// Whether `bd sync` should run before pushing.
///
/// `always` requires the CLI on PATH; `auto` runs only when it is on PATH and the
/// repo has a `.beads` directory.
pub fn should_run_bd_sync(repo_root: &Path, policy: BdSyncPolicy, bd_command: &str) -> Result<bool> {
    let command = match bd_command.trim() {
        "" => "bd",
        c => c,
    };
    let on_path = which::which(command).is_ok();
    match policy {
        BdSyncPolicy::Never => Ok(false),
        BdSyncPolicy::Always if !on_path => anyhow::bail!(
            "bd-sync-policy=always but {} CLI not found on PATH",
            command
        ),
        BdSyncPolicy::Always => Ok(true),
        BdSyncPolicy::Auto => Ok(on_path && repo_root.join(".beads").exists()),
    }
}
