//! The `next-work.jsonl` work queue.
//!
//! One JSON entry per line, each carrying harvested work items. Entries are
//! addressed by their index among parseable lines; blank and malformed lines get no
//! index and are preserved verbatim whenever the file is rewritten.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::state::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(default)]
    pub source_epic: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub items: Vec<WorkItem>,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default)]
    pub consumed_by: Option<String>,
    #[serde(default)]
    pub consumed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    /// Fields written by other producers, carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueueEntry {
    fn is_eligible(&self) -> bool {
        !self.consumed && self.failed_at.is_none() && !self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub evidence: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_repo: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkItem {
    /// Items without a target repo, or targeting `*`, match every filter.
    pub fn matches_repo(&self, filter: Option<&str>) -> bool {
        match filter {
            None => true,
            Some(repo) => {
                self.target_repo.is_empty() || self.target_repo == "*" || self.target_repo == repo
            }
        }
    }
}

/// high > medium > low > anything else.
pub fn severity_rank(severity: &str) -> u8 {
    match severity {
        "high" => 3,
        "medium" => 2,
        "low" => 1,
        _ => 0,
    }
}

/// The chosen item and the index of the entry it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSelection {
    pub item: WorkItem,
    pub entry_index: usize,
}

pub struct WorkQueue {
    path: PathBuf,
}

impl WorkQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unconsumed, non-failed entries with at least one item, paired with their
    /// index. A missing file is an empty queue.
    pub fn eligible_entries(&self) -> Result<Vec<(usize, QueueEntry)>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let mut entries = Vec::new();
        let mut index = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<QueueEntry>(line) {
                Ok(entry) => {
                    if entry.is_eligible() {
                        entries.push((index, entry));
                    }
                    index += 1;
                }
                Err(e) => tracing::debug!(error = %e, "skipping malformed queue line"),
            }
        }
        Ok(entries)
    }

    /// The highest-severity item across eligible entries. Ties go to the item that
    /// appears first in the file.
    pub fn select_next(&self, repo_filter: Option<&str>) -> Result<Option<QueueSelection>> {
        let mut best: Option<(u8, QueueSelection)> = None;
        for (entry_index, entry) in self.eligible_entries()? {
            for item in entry.items {
                if !item.matches_repo(repo_filter) {
                    continue;
                }
                let rank = severity_rank(&item.severity);
                if best.as_ref().is_none_or(|(best_rank, _)| rank > *best_rank) {
                    best = Some((rank, QueueSelection { item, entry_index }));
                }
            }
        }
        Ok(best.map(|(_, selection)| selection))
    }

    /// Mark the entry consumed by `consumed_by`, clearing any failure mark.
    /// Returns whether an entry was updated.
    pub fn mark_consumed(&self, entry_index: usize, consumed_by: &str) -> Result<bool> {
        if !self.path.exists() {
            anyhow::bail!("{} not found", self.path.display());
        }
        let now = now_rfc3339();
        self.rewrite(entry_index, |entry| {
            entry.consumed = true;
            entry.consumed_at = Some(now.clone());
            entry.consumed_by = Some(consumed_by.to_string());
            entry.failed_at = None;
        })
    }

    /// Record a failure without consuming the entry. Clearing `failed_at` makes it
    /// eligible again. Returns whether an entry was updated.
    pub fn mark_failed(&self, entry_index: usize) -> Result<bool> {
        let now = now_rfc3339();
        self.rewrite(entry_index, |entry| entry.failed_at = Some(now.clone()))
    }

    fn rewrite(&self, entry_index: usize, mut update: impl FnMut(&mut QueueEntry)) -> Result<bool> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), entry_index, "queue file missing, entry not updated");
                return Ok(false);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let mut out = String::with_capacity(content.len() + 64);
        let mut index = 0;
        let mut updated = false;
        for line in content.lines() {
            let rewritten = if line.trim().is_empty() {
                None
            } else {
                match serde_json::from_str::<QueueEntry>(line) {
                    Ok(mut entry) => {
                        let current = index;
                        index += 1;
                        if current == entry_index {
                            update(&mut entry);
                            updated = true;
                            serde_json::to_string(&entry).ok()
                        } else {
                            None
                        }
                    }
                    Err(_) => None,
                }
            };
            out.push_str(rewritten.as_deref().unwrap_or(line));
            out.push('\n');
        }
        if !updated {
            tracing::warn!(
                path = %self.path.display(),
                entry_index,
                "no queue entry at index, queue changed underneath"
            );
            return Ok(false);
        }
        write_atomic(&self.path, out.as_bytes())?;
        Ok(true)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
