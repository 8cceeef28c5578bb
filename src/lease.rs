//! Single-flight leases backed by an OS file lock.
//!
//! A lease is a non-blocking exclusive lock on a file. The holder writes JSON
//! metadata into the locked file and renews it from a background heartbeat task, so
//! a contender can report who holds the lease. Leases never queue: a second
//! acquirer fails immediately with `LeaseError::AlreadyHeld`.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::LeaseError;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseMetadata {
    pub run_id: String,
    pub pid: u32,
    pub host: String,
    pub cwd: String,
    pub acquired_at: String,
    pub renewed_at: String,
    pub expires_at: String,
}

struct LockedFile {
    file: File,
    meta: LeaseMetadata,
}

impl LockedFile {
    /// Rewrite the metadata in place. The file is never renamed, since a rename
    /// would detach the lock from the path contenders open.
    fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) -> std::io::Result<()> {
        self.meta.renewed_at = rfc3339(now);
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        self.meta.expires_at = rfc3339(now + ttl);
        let mut data = serde_json::to_vec_pretty(&self.meta)?;
        data.push(b'\n');
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;
        self.file.sync_all()
    }
}

/// A held single-flight lease. Call [`Lease::release`] to stop the heartbeat and unlock.
pub struct Lease {
    path: PathBuf,
    ttl: Duration,
    locked: Arc<Mutex<LockedFile>>,
    cancel: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl Lease {
    /// Try to take the lease at `path` for `run_id`.
    ///
    /// A zero `ttl` means [`DEFAULT_LEASE_TTL`]. Must be called inside a tokio runtime.
    pub fn acquire(path: &Path, ttl: Duration, run_id: &str) -> Result<Lease, LeaseError> {
        let ttl = if ttl.is_zero() { DEFAULT_LEASE_TTL } else { ttl };
        let io_err = |source: std::io::Error| LeaseError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_err)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(LeaseError::AlreadyHeld {
                    path: path.to_path_buf(),
                    holder: read_holder_hint(path),
                });
            }
            return Err(io_err(e));
        }

        let now = Utc::now();
        let meta = LeaseMetadata {
            run_id: run_id.to_string(),
            pid: std::process::id(),
            host: hostname(),
            cwd: std::env::current_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            acquired_at: rfc3339(now),
            renewed_at: String::new(),
            expires_at: String::new(),
        };
        let mut locked = LockedFile { file, meta };
        if let Err(e) = locked.renew(now, ttl) {
            let _ = FileExt::unlock(&locked.file);
            return Err(io_err(e));
        }

        let locked = Arc::new(Mutex::new(locked));
        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&locked),
            cancel.clone(),
            ttl,
            path.to_path_buf(),
        ));

        tracing::debug!(path = %path.display(), run_id, ttl_secs = ttl.as_secs(), "lease acquired");
        Ok(Lease {
            path: path.to_path_buf(),
            ttl,
            locked,
            cancel,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn metadata(&self) -> Option<LeaseMetadata> {
        self.locked.lock().ok().map(|l| l.meta.clone())
    }

    /// Stop the heartbeat, wait for it to exit, then unlock and close the file.
    pub async fn release(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.await;
        }
        let guard = self
            .locked
            .lock()
            .map_err(|_| anyhow::anyhow!("lease state poisoned"))?;
        FileExt::unlock(&guard.file)
            .with_context(|| format!("Failed to unlock lease {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "lease released");
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Closing the file drops the OS lock once the heartbeat task lets go of it.
        if self.heartbeat.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Renewal interval for a lease with `ttl`: half the TTL, but at least 15s.
pub fn heartbeat_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(MIN_HEARTBEAT_INTERVAL)
}

async fn run_heartbeat(
    locked: Arc<Mutex<LockedFile>>,
    cancel: CancellationToken,
    ttl: Duration,
    path: PathBuf,
) {
    let interval = heartbeat_interval(ttl);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let result = match locked.lock() {
                    Ok(mut l) => l.renew(Utc::now(), ttl),
                    Err(_) => return,
                };
                if let Err(e) = result {
                    tracing::warn!(path = %path.display(), error = %e, "lease heartbeat update failed");
                }
            }
        }
    }
}

/// Describe the current holder of the lease at `path`, for contention errors.
pub fn read_holder_hint(path: &Path) -> String {
    let fallback = || format!("lock={}", path.display());
    let Ok(data) = std::fs::read_to_string(path) else {
        return fallback();
    };
    match serde_json::from_str::<LeaseMetadata>(&data) {
        Ok(meta) if !meta.run_id.is_empty() => format!(
            "run={} pid={} host={} renewed_at={}",
            meta.run_id, meta.pid, meta.host, meta.renewed_at
        ),
        _ => fallback(),
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_second_acquire_fails_with_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("supervisor.lock");
        let lease = Lease::acquire(&path, Duration::from_secs(60), "run-a").unwrap();

        let err = Lease::acquire(&path, Duration::from_secs(60), "run-b")
            .err()
            .expect("second acquire must fail");
        match &err {
            LeaseError::AlreadyHeld { holder, .. } => {
                assert!(holder.contains("run=run-a"), "holder: {holder}");
                assert!(holder.contains(&format!("pid={}", std::process::id())));
            }
            other => panic!("Expected AlreadyHeld, got {other:?}"),
        }

        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("landing.lock");
        let first = Lease::acquire(&path, Duration::ZERO, "one").unwrap();
        assert_eq!(first.ttl(), DEFAULT_LEASE_TTL);
        first.release().await.unwrap();

        let second = Lease::acquire(&path, Duration::from_secs(30), "two").unwrap();
        assert_eq!(second.metadata().unwrap().run_id, "two");
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.lock");
        {
            let _lease = Lease::acquire(&path, Duration::from_secs(30), "dropped").unwrap();
        }
        // Give the cancelled heartbeat task a moment to drop its handle.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let lease = Lease::acquire(&path, Duration::from_secs(30), "next").unwrap();
        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_written_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.lock");
        let lease = Lease::acquire(&path, Duration::from_secs(60), "meta-run").unwrap();
        let on_disk: LeaseMetadata =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.run_id, "meta-run");
        assert!(!on_disk.expires_at.is_empty());
        let renewed = DateTime::parse_from_rfc3339(&on_disk.renewed_at).unwrap();
        let expires = DateTime::parse_from_rfc3339(&on_disk.expires_at).unwrap();
        assert_eq!((expires - renewed).num_seconds(), 60);
        lease.release().await.unwrap();
    }

    fn backdate_renewal(path: &Path) {
        let mut meta: LeaseMetadata =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        meta.renewed_at = "2000-01-01T00:00:00Z".into();
        meta.expires_at = "2000-01-01T00:02:00Z".into();
        std::fs::write(path, serde_json::to_vec_pretty(&meta).unwrap()).unwrap();
    }

    fn renewed_at(path: &Path) -> String {
        let meta: LeaseMetadata =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        meta.renewed_at
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_renews_until_released() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beat.lock");
        let ttl = Duration::from_secs(40);
        let lease = Lease::acquire(&path, ttl, "beating").unwrap();

        backdate_renewal(&path);
        tokio::time::sleep(heartbeat_interval(ttl) + Duration::from_secs(1)).await;
        assert_ne!(renewed_at(&path), "2000-01-01T00:00:00Z");
        let on_disk: LeaseMetadata =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_ne!(on_disk.expires_at, "2000-01-01T00:02:00Z");
        assert_eq!(on_disk.run_id, "beating");

        lease.release().await.unwrap();
        backdate_renewal(&path);
        tokio::time::sleep(heartbeat_interval(ttl) * 3).await;
        assert_eq!(renewed_at(&path), "2000-01-01T00:00:00Z");
    }

    #[test]
    fn test_heartbeat_interval_floor() {
        assert_eq!(heartbeat_interval(Duration::from_secs(120)), Duration::from_secs(60));
        assert_eq!(heartbeat_interval(Duration::from_secs(10)), Duration::from_secs(15));
    }

    #[test]
    fn test_holder_hint_falls_back_to_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.lock");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(read_holder_hint(&path), format!("lock={}", path.display()));
    }
}
