//! Issue tracker (`bd`) and progress tracker (`ao`) collaborators.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::process::{run_captured, run_checked};
use crate::rpi_config::EngineOptions;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(60);

static ISSUE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*-[a-z0-9][a-z0-9.]*$").unwrap());

#[async_trait]
pub trait WorkTracker: Send + Sync {
    /// The most recently created open epic.
    async fn latest_open_epic(&self) -> Result<String>;

    /// Raw `children <epic>` listing, one issue per line.
    async fn epic_children(&self, epic: &str) -> Result<String>;

    /// Record a progress checkpoint. Best-effort: failures are logged.
    async fn record_checkpoint(&self, step: &str);
}

/// Tracker backed by the `bd` and `ao` command-line tools.
pub struct CliTracker {
    bd: String,
    ao: String,
    cwd: PathBuf,
}

impl CliTracker {
    pub fn new(bd: impl Into<String>, ao: impl Into<String>, cwd: &Path) -> Self {
        Self {
            bd: bd.into(),
            ao: ao.into(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn from_options(opts: &EngineOptions, cwd: &Path) -> Self {
        Self::new(opts.bd_command.clone(), opts.ao_command.clone(), cwd)
    }
}

#[async_trait]
impl WorkTracker for CliTracker {
    async fn latest_open_epic(&self) -> Result<String> {
        let json = run_checked(
            &self.bd,
            &["list", "--type", "epic", "--status", "open", "--json"],
            &self.cwd,
            TRACKER_TIMEOUT,
        )
        .await;
        match json {
            Ok(out) => match parse_latest_epic_json(&out.stdout) {
                Ok(id) => return Ok(id),
                Err(e) => tracing::debug!(error = %e, "bd JSON epic list unparseable, falling back to text"),
            },
            Err(e) => tracing::debug!(error = %format!("{:#}", e), "bd list --json failed, falling back to text"),
        }

        let out = run_checked(
            &self.bd,
            &["list", "--type", "epic", "--status", "open"],
            &self.cwd,
            TRACKER_TIMEOUT,
        )
        .await
        .context("bd list")?;
        parse_latest_epic_text(&out.stdout)
    }

    async fn epic_children(&self, epic: &str) -> Result<String> {
        let out = run_checked(&self.bd, &["children", epic], &self.cwd, TRACKER_TIMEOUT)
            .await
            .context("bd children")?;
        Ok(out.stdout)
    }

    async fn record_checkpoint(&self, step: &str) {
        match run_captured(&self.ao, &["ratchet", "record", step], &self.cwd, TRACKER_TIMEOUT).await {
            Ok(out) if out.success() => tracing::debug!(step, "ratchet checkpoint recorded"),
            Ok(out) => tracing::warn!(step, code = ?out.code, detail = %out.detail(), "ratchet record failed"),
            Err(e) => tracing::warn!(step, error = %format!("{:#}", e), "ratchet record failed"),
        }
    }
}

#[derive(Deserialize)]
struct EpicEntry {
    #[serde(default)]
    id: String,
}

/// The last non-empty id in a JSON epic list.
pub fn parse_latest_epic_json(data: &str) -> Result<String> {
    let entries: Vec<EpicEntry> =
        serde_json::from_str(data).context("Failed to parse bd list JSON")?;
    entries
        .iter()
        .rev()
        .map(|e| e.id.trim())
        .find(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no epic found in bd list output"))
}

/// The last issue-like token among the first three fields of each line.
pub fn parse_latest_epic_text(output: &str) -> Result<String> {
    let mut latest = None;
    for line in output.lines() {
        let found = line
            .split_whitespace()
            .take(3)
            .map(|f| f.trim_matches(|c| matches!(c, '[' | ']' | '(' | ')')))
            .find(|token| ISSUE_ID_REGEX.is_match(token));
        if let Some(token) = found {
            latest = Some(token.to_string());
        }
    }
    latest.ok_or_else(|| anyhow::anyhow!("no epic found in bd list output"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::fake_runtime;
    use tempfile::tempdir;

    #[test]
    fn test_parse_json_takes_last_epic() {
        let data = r#"[{"id":"ag-old","title":"a"},{"id":"ag-new","title":"b"},{"id":"  "}]"#;
        assert_eq!(parse_latest_epic_json(data).unwrap(), "ag-new");
        assert!(parse_latest_epic_json("[]").is_err());
        assert!(parse_latest_epic_json("not json").is_err());
    }

    #[test]
    fn test_parse_text_accepts_custom_prefixes() {
        let out = "○ bd-12 [epic] Old thing\n○ (ag-x7.2) [epic] New thing\nno ids here\n";
        assert_eq!(parse_latest_epic_text(out).unwrap(), "ag-x7.2");
    }

    #[test]
    fn test_parse_text_ignores_later_fields() {
        let out = "a b c ag-late\n";
        assert!(parse_latest_epic_text(out).is_err());
    }

    #[tokio::test]
    async fn test_cli_tracker_falls_back_to_text() {
        let dir = tempdir().unwrap();
        let bd = fake_runtime(
            dir.path(),
            "bd",
            r#"case "$*" in
  *--json*) exit 1 ;;
  "list --type epic --status open") echo "ag-abc [epic] Auth" ;;
  "children ag-abc") echo "ag-abc.1 closed x" ;;
esac"#,
        );
        let tracker = CliTracker::new(bd.to_string_lossy(), "ao", dir.path());
        assert_eq!(tracker.latest_open_epic().await.unwrap(), "ag-abc");
        assert_eq!(
            tracker.epic_children("ag-abc").await.unwrap().trim(),
            "ag-abc.1 closed x"
        );
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let tracker = CliTracker::new("bd", "/nonexistent/ao", dir.path());
        tracker.record_checkpoint("research").await;
    }
}
