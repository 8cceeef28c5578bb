//! Run state persistence and the per-run registry.
//!
//! Every save writes the same snapshot twice: to the flat
//! `.agents/rpi/phased-state.json` and to `.agents/rpi/runs/<run-id>/phased-state.json`.
//! Each write is atomic on its own. There is no atomicity across the two paths, so
//! `load` picks whichever copy is newer by mtime.

pub mod atomic;
pub mod phase_result;
pub mod run_state;

pub use atomic::write_atomic;
pub use phase_result::{
    PhaseResult, PhaseStatus, clean_phase_artifacts, validate_prior_phase_result,
    write_phase_result,
};
pub use run_state::{RunState, TerminalStatus, new_run_id};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use glob::glob;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Config;

const STATE_FILE: &str = "phased-state.json";
const HEARTBEAT_FILE: &str = "heartbeat.txt";

pub struct StateStore {
    flat_path: PathBuf,
    runs_dir: PathBuf,
}

impl StateStore {
    pub fn new(config: &Config) -> Self {
        Self {
            flat_path: config.state_file.clone(),
            runs_dir: config.runs_dir.clone(),
        }
    }

    pub fn registry_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id).join(STATE_FILE)
    }

    /// Persist `state` to the flat file and the run registry.
    ///
    /// Failure to write the flat file is an error. Failure to write the registry
    /// copy is logged and ignored.
    pub fn save(&self, state: &RunState) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(state).context("Failed to serialize run state")?;
        data.push(b'\n');

        write_atomic(&self.flat_path, &data).context("Failed to write phased state")?;

        if !state.run_id.is_empty() {
            let registry = self.registry_path(&state.run_id);
            if let Err(e) = write_atomic(&registry, &data) {
                tracing::warn!(
                    run_id = %state.run_id,
                    error = %format!("{:#}", e),
                    "failed to write run registry state"
                );
            }
        }
        tracing::debug!(path = %self.flat_path.display(), "state saved");
        Ok(())
    }

    /// Load the most recent state.
    ///
    /// The newest registry snapshot wins when the flat file is missing or is not
    /// newer than it. Otherwise, or when that snapshot cannot be read, the flat
    /// file is read.
    pub fn load(&self) -> Result<RunState> {
        if let Some((registry_path, registry_mtime)) = self.latest_registry_snapshot()? {
            let flat_mtime = modified(&self.flat_path);
            let prefer_registry = match flat_mtime {
                None => true,
                Some(flat) => registry_mtime >= flat,
            };
            if prefer_registry {
                match read_state(&registry_path) {
                    Ok(state) => return Ok(state),
                    Err(e) => tracing::warn!(
                        path = %registry_path.display(),
                        error = %format!("{:#}", e),
                        "unreadable run registry snapshot, falling back to flat state"
                    ),
                }
            }
        }
        read_state(&self.flat_path)
    }

    /// Load the most recent state, or `None` if no run has ever been saved.
    pub fn load_optional(&self) -> Result<Option<RunState>> {
        if !self.flat_path.exists() && self.latest_registry_snapshot()?.is_none() {
            return Ok(None);
        }
        self.load().map(Some)
    }

    fn latest_registry_snapshot(&self) -> Result<Option<(PathBuf, SystemTime)>> {
        let pattern = self.runs_dir.join("*").join(STATE_FILE);
        let pattern = pattern.to_string_lossy();
        let latest = glob(&pattern)
            .context("Failed to read run registry pattern")?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| modified(&path).map(|mtime| (path, mtime)))
            .max_by_key(|(_, mtime)| *mtime);
        Ok(latest)
    }

    /// Write the liveness timestamp for `run_id`. Errors are logged, never returned.
    pub fn write_heartbeat(&self, run_id: &str) {
        if run_id.is_empty() {
            return;
        }
        let path = self.runs_dir.join(run_id).join(HEARTBEAT_FILE);
        let stamp = format!(
            "{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
        );
        if let Err(e) = write_atomic(&path, stamp.as_bytes()) {
            tracing::warn!(run_id, error = %format!("{:#}", e), "failed to update heartbeat");
        }
    }

    /// Last heartbeat for `run_id`, or `None` if absent or unparseable.
    pub fn read_heartbeat(&self, run_id: &str) -> Option<DateTime<Utc>> {
        if run_id.is_empty() {
            return None;
        }
        let raw = std::fs::read_to_string(self.runs_dir.join(run_id).join(HEARTBEAT_FILE)).ok()?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_state(path: &Path) -> Result<RunState> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse state: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpi_config::{EngineOptions, RpiToml};
    use std::fs::{self, File};
    use std::time::Duration;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> (Config, StateStore) {
        let config = Config::with_toml(dir.to_path_buf(), RpiToml::default());
        let store = StateStore::new(&config);
        (config, store)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_save_writes_flat_and_registry() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        let state = RunState::new("add auth", 1, EngineOptions::default());
        store.save(&state).unwrap();

        assert!(config.state_file.exists());
        let registry = store.registry_path(&state.run_id);
        assert_eq!(
            fs::read_to_string(&config.state_file).unwrap(),
            fs::read_to_string(&registry).unwrap()
        );
        assert!(fs::read_to_string(&registry).unwrap().ends_with("}\n"));
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_load_prefers_newer_registry() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        let mut old = RunState::new("old goal", 1, EngineOptions::default());
        old.run_id = "aaaaaaaaaaaa".into();
        store.save(&old).unwrap();

        let mut newer = RunState::new("new goal", 1, EngineOptions::default());
        newer.run_id = "bbbbbbbbbbbb".into();
        store.save(&newer).unwrap();

        // Flat file is older than the newest registry snapshot.
        let now = SystemTime::now();
        set_mtime(&config.state_file, now - Duration::from_secs(60));
        set_mtime(&store.registry_path("aaaaaaaaaaaa"), now - Duration::from_secs(120));
        set_mtime(&store.registry_path("bbbbbbbbbbbb"), now);

        assert_eq!(store.load().unwrap().goal, "new goal");
    }

    #[test]
    fn test_load_prefers_newer_flat_file() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        let mut state = RunState::new("registry goal", 1, EngineOptions::default());
        state.run_id = "cccccccccccc".into();
        store.save(&state).unwrap();

        state.goal = "flat goal".into();
        let data = serde_json::to_vec_pretty(&state).unwrap();
        write_atomic(&config.state_file, &data).unwrap();
        let now = SystemTime::now();
        set_mtime(&store.registry_path("cccccccccccc"), now - Duration::from_secs(30));
        set_mtime(&config.state_file, now);

        assert_eq!(store.load().unwrap().goal, "flat goal");
    }

    #[test]
    fn test_unreadable_registry_snapshot_falls_back_to_flat_file() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        let state = RunState::new("valid goal", 1, EngineOptions::default());
        store.save(&state).unwrap();

        let crashed = config.runs_dir.join("crashed").join(STATE_FILE);
        fs::create_dir_all(crashed.parent().unwrap()).unwrap();
        fs::write(&crashed, "{ truncated").unwrap();
        let now = SystemTime::now();
        set_mtime(&config.state_file, now - Duration::from_secs(5));
        set_mtime(&crashed, now);

        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_load_falls_back_to_registry_without_flat_file() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        let state = RunState::new("worktree goal", 2, EngineOptions::default());
        store.save(&state).unwrap();
        fs::remove_file(&config.state_file).unwrap();
        assert_eq!(store.load().unwrap().goal, "worktree goal");
    }

    #[test]
    fn test_load_optional_without_any_state() {
        let dir = tempdir().unwrap();
        let (_, store) = store_in(dir.path());
        assert!(store.load_optional().unwrap().is_none());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        assert!(store.read_heartbeat("r1").is_none());
        store.write_heartbeat("r1");
        let raw = fs::read_to_string(config.run_dir("r1").join("heartbeat.txt")).unwrap();
        assert!(raw.ends_with('\n'));
        let beat = store.read_heartbeat("r1").unwrap();
        assert!(Utc::now().signed_duration_since(beat).num_seconds() < 5);
    }

    #[test]
    fn test_garbage_heartbeat_reads_as_none() {
        let dir = tempdir().unwrap();
        let (config, store) = store_in(dir.path());
        fs::create_dir_all(config.run_dir("r2")).unwrap();
        fs::write(config.run_dir("r2").join("heartbeat.txt"), "yesterday\n").unwrap();
        assert!(store.read_heartbeat("r2").is_none());
    }
}
