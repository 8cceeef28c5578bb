//! Crash-safe file replacement.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use tempfile::Builder;

/// Atomically replace `path` with `data`.
///
/// Writes to a temp file in the target's directory, fsyncs it, then renames it
/// over the target. Readers see either the previous content or the new content,
/// never a partial write. On error the temp file is removed.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = Builder::new()
        .prefix(".phased-state-")
        .suffix(".json.tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("Failed to write temp file")?;
    tmp.as_file().sync_all().context("Failed to sync temp file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file onto {}", path.display()))?;
    Ok(())
}
