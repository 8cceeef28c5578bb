use chrono::{SecondsFormat, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only orchestration log: `[RFC3339] [run_id] phase: details`.
///
/// Write failures are reported through `tracing` and never interrupt a run.
#[derive(Debug, Clone)]
pub struct OrchestrationLog {
    path: PathBuf,
}

impl OrchestrationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, run_id: &str, phase: &str, details: &str) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let entry = if run_id.is_empty() {
            format!("[{}] {}: {}\n", stamp, phase, details)
        } else {
            format!("[{}] [{}] {}: {}\n", stamp, run_id, phase, details)
        };
        if let Err(e) = self.append(&entry) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not write orchestration log");
        }
    }

    /// Record a fatal phase error followed by remediation context.
    pub fn record_failure(&self, run_id: &str, phase: &str, err: &str) {
        self.record(run_id, phase, &format!("FATAL: {}", err));
        self.record(
            run_id,
            phase,
            &format!(
                "FAILURE_CONTEXT: {} | action: check .agents/rpi/ for phase artifacts, review .agents/council/ for verdicts",
                err
            ),
        );
    }

    fn append(&self, entry: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_appends_formatted_lines() {
        let dir = tempdir().unwrap();
        let log = OrchestrationLog::new(dir.path().join("rpi").join("phased-orchestration.log"));
        log.record("abc123def456", "discovery", "started");
        log.record("", "supervisor", "cycle 1 started");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[abc123def456] discovery: started"));
        assert!(lines[1].ends_with("] supervisor: cycle 1 started"));
        assert!(!lines[1].contains("[]"));
    }

    #[test]
    fn test_record_failure_writes_context() {
        let dir = tempdir().unwrap();
        let log = OrchestrationLog::new(dir.path().join("o.log"));
        log.record_failure("r1", "validation", "vibe report not found");
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("validation: FATAL: vibe report not found"));
        assert!(content.contains("FAILURE_CONTEXT: vibe report not found"));
    }

    #[test]
    fn test_unwritable_log_does_not_panic() {
        let dir = tempdir().unwrap();
        // A directory where the file should be.
        let path = dir.path().join("log");
        std::fs::create_dir(&path).unwrap();
        OrchestrationLog::new(&path).record("r", "p", "d");
    }
}
