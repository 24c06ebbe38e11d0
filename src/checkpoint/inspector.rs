//! Read-only checkpoint inspection, used to offer a resume before splitting again.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::format::Checkpoint;
use crate::error::EngineError;

/// Summary of a checkpoint file, suitable for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointInfo {
    pub file: PathBuf,
    pub version: f64,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub unprocessed_chunks: usize,
    pub chunk_size: usize,
    pub can_resume: bool,
}

/// Loads and validates `path`, then summarizes its progress.
pub fn inspect(path: impl AsRef<Path>) -> Result<CheckpointInfo, EngineError> {
    let path = path.as_ref();
    let checkpoint = Checkpoint::load(path)?;

    let total_chunks = checkpoint.chunks.len();
    let processed_chunks = checkpoint.summary.processed_ids.len();
    let unprocessed_chunks = total_chunks - processed_chunks;

    Ok(CheckpointInfo {
        file: path.to_path_buf(),
        version: checkpoint.version,
        total_chunks,
        processed_chunks,
        unprocessed_chunks,
        chunk_size: checkpoint.summary.chunk_size,
        can_resume: unprocessed_chunks > 0,
    })
}

/// Finds the first `*.json` checkpoint in `dir` (by file name) that still has
/// unprocessed chunks. Unreadable or incompatible files are skipped.
///
/// A missing directory yields `Ok(None)`.
pub fn find_resumable(dir: impl AsRef<Path>) -> Result<Option<PathBuf>, EngineError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(None);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        EngineError::IoFailure(format!("Failed to list {}: {}", dir.display(), e))
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    candidates.sort();

    for path in candidates {
        match inspect(&path) {
            Ok(info) if info.can_resume => return Ok(Some(path)),
            Ok(_) => debug!(path = %path.display(), "[TRACKER] Checkpoint fully processed"),
            Err(e) => debug!(path = %path.display(), error = %e, "[TRACKER] Skipping file"),
        }
    }
    Ok(None)
}
