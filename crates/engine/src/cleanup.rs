//! Garbage collection of abandoned write runs.
//!
//! A run stages its files in `<dataset>/.smb-tmp-*` and removes that
//! directory on commit or abort. A crashed process leaves it behind; nothing
//! under it is ever visible to readers, so it is always safe to delete.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, SmbError};

/// Name prefix of a write run's staging directory.
pub const TEMP_DIR_PREFIX: &str = ".smb-tmp-";

/// Removes every stale staging directory under `dir` and returns how many
/// were removed.
///
/// Must not run concurrently with a live write run on the same dataset. A
/// missing `dir` is not an error.
pub fn cleanup_stale_runs(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SmbError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(TEMP_DIR_PREFIX));
        if !is_stale || !path.is_dir() {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale write run");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale write run"),
        }
    }
    Ok(removed)
}
