//! Council report lookup and parsing.
//!
//! Council reports live in `.agents/council/` and carry a verdict line:
//!
//! ```text
//! ## Council Verdict: PASS
//! ```
//!
//! Findings are either structured (`FINDING: ... | FIX: ... | REF: ...`) or, as a
//! fallback, numbered bold items (`1. **Title** - detail`).

use super::Finding;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static VERDICT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## Council Verdict:\s*(PASS|WARN|FAIL)").unwrap());

static FINDING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)FINDING:\s*(.+?)\s*\|\s*FIX:\s*(.+?)\s*\|\s*REF:\s*(.+?)$").unwrap()
});

static NUMBERED_FINDING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\d+\.\s+\*\*(.+?)\*\*\s*[—–-]\s*(.+)$").unwrap());

/// Find the most recent council report whose filename contains `pattern`.
///
/// Reports naming `epic_id` are preferred; otherwise all matches are considered.
/// "Most recent" is the lexically greatest filename, since reports are date-prefixed.
pub fn find_latest_council_report(
    project_dir: &Path,
    pattern: &str,
    epic_id: Option<&str>,
) -> Result<PathBuf> {
    let council_dir = project_dir.join(".agents").join("council");
    let entries = fs::read_dir(&council_dir)
        .with_context(|| format!("Failed to read council directory: {}", council_dir.display()))?;

    let mut matches = Vec::new();
    let mut epic_matches = Vec::new();
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.contains(pattern) || !name.ends_with(".md") {
            continue;
        }
        if let Some(epic) = epic_id.filter(|e| !e.is_empty())
            && name.contains(epic)
        {
            epic_matches.push(entry.path());
        }
        matches.push(entry.path());
    }

    let mut selected = if epic_matches.is_empty() {
        matches
    } else {
        epic_matches
    };
    selected.sort();
    selected
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no council report matching {:?} found", pattern))
}

/// Extract the PASS/WARN/FAIL verdict from a council report.
pub fn extract_verdict(report: &Path) -> Result<String> {
    let content = fs::read_to_string(report)
        .with_context(|| format!("Failed to read report: {}", report.display()))?;
    VERDICT_REGEX
        .captures(&content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow::anyhow!("no verdict found in {}", report.display()))
}

/// Extract up to `max` findings from a council report.
pub fn extract_findings(report: &Path, max: usize) -> Result<Vec<Finding>> {
    let content = fs::read_to_string(report)
        .with_context(|| format!("Failed to read report: {}", report.display()))?;

    let findings: Vec<Finding> = FINDING_REGEX
        .captures_iter(&content)
        .take(max)
        .map(|c| Finding {
            description: c[1].to_string(),
            fix: c[2].to_string(),
            reference: c[3].to_string(),
        })
        .collect();
    if !findings.is_empty() {
        return Ok(findings);
    }

    Ok(NUMBERED_FINDING_REGEX
        .captures_iter(&content)
        .take(max)
        .map(|c| Finding {
            description: format!("{}: {}", &c[1], &c[2]),
            fix: "See council report".to_string(),
            reference: report.display().to_string(),
        })
        .collect())
}
