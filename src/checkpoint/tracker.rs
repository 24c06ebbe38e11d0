//! Chunk tracker: the sole owner of a checkpoint file while a run is active.
//!
//! Fetching a chunk and marking it processed are separate steps so the caller
//! decides, after invoking the model, whether the chunk counts as done.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::format::{Checkpoint, Chunk};
use crate::control::RunControl;
use crate::error::EngineError;

/// Tracks processed and unprocessed chunks of one checkpoint file.
#[derive(Debug)]
pub struct ChunkTracker {
    path: PathBuf,
    checkpoint: Checkpoint,
    /// Fetched by `next_unprocessed` but not yet marked.
    current: Option<Uuid>,
    control: RunControl,
}

impl ChunkTracker {
    /// Loads the checkpoint at `path`.
    ///
    /// # Errors
    ///
    /// Propagates `NotFound`, `NotJson`, `UnsupportedVersion` and
    /// `CorruptCheckpoint` from [`Checkpoint::load`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let checkpoint = Checkpoint::load(&path)?;

        info!(
            path = %path.display(),
            total = checkpoint.chunks.len(),
            processed = checkpoint.summary.processed_ids.len(),
            "[TRACKER] Checkpoint loaded"
        );

        Ok(Self {
            path,
            checkpoint,
            current: None,
            control: RunControl::new(),
        })
    }

    /// Replaces the run control, so an existing handle can drive this tracker.
    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chunk state
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the first chunk, in checkpoint order, that is not processed.
    ///
    /// Calling this again without marking returns the same chunk.
    pub fn next_unprocessed(&mut self) -> Option<Chunk> {
        let processed = &self.checkpoint.summary.processed_ids;
        let next = self
            .checkpoint
            .chunks
            .iter()
            .find(|c| !processed.contains(&c.chunk_id))
            .cloned();

        self.current = next.as_ref().map(|c| c.chunk_id);
        if let Some(chunk) = &next {
            debug!(chunk_id = %chunk.chunk_id, rows = chunk.rows.len(), "[TRACKER] Fetched chunk");
        }
        next
    }

    /// Adds `chunk_id` (or the current chunk when `None`) to the processed set.
    ///
    /// Does not persist; call [`save`](Self::save) or use
    /// [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// - `NoCurrentChunk` if `chunk_id` is `None` and nothing was fetched since the last mark
    /// - `UnknownChunk` if the id does not belong to this checkpoint
    pub fn mark_processed(&mut self, chunk_id: Option<Uuid>) -> Result<Uuid, EngineError> {
        let id = match chunk_id.or(self.current) {
            Some(id) => id,
            None => return Err(EngineError::NoCurrentChunk),
        };
        if !self.checkpoint.contains(&id) {
            return Err(EngineError::UnknownChunk(id));
        }

        self.checkpoint.summary.processed_ids.insert(id);
        if chunk_id.is_none() || self.current == Some(id) {
            self.current = None;
        }

        debug!(chunk_id = %id, "[TRACKER] Marked processed");
        Ok(id)
    }

    /// Re-derives the summary counts and atomically rewrites the checkpoint.
    pub fn save(&mut self) -> Result<(), EngineError> {
        let total = self.checkpoint.chunks.len();
        let processed = self.checkpoint.summary.processed_ids.len();
        self.checkpoint.summary.total_chunks = total;
        self.checkpoint.summary.processed = processed;

        self.checkpoint.save(&self.path)?;

        debug!(processed, total, "[TRACKER] Checkpoint saved");
        Ok(())
    }

    /// Marks `chunk_id` processed and persists it.
    ///
    /// If the save fails, the in-memory mark is rolled back so memory never
    /// claims progress the file does not hold.
    pub fn commit(&mut self, chunk_id: Uuid) -> Result<(), EngineError> {
        let previous_current = self.current;
        let newly_marked = !self.checkpoint.summary.processed_ids.contains(&chunk_id);

        self.mark_processed(Some(chunk_id))?;

        if let Err(e) = self.save() {
            if newly_marked {
                self.checkpoint.summary.processed_ids.remove(&chunk_id);
                self.checkpoint.summary.processed = self.checkpoint.summary.processed_ids.len();
            }
            self.current = previous_current;
            warn!(chunk_id = %chunk_id, error = %e, "[TRACKER] Commit failed, mark rolled back");
            return Err(e);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn total_chunks(&self) -> usize {
        self.checkpoint.chunks.len()
    }

    pub fn processed_count(&self) -> usize {
        self.checkpoint.summary.processed_ids.len()
    }

    pub fn remaining_chunks(&self) -> usize {
        self.total_chunks() - self.processed_count()
    }

    pub fn processed_ids(&self) -> &BTreeSet<Uuid> {
        &self.checkpoint.summary.processed_ids
    }

    pub fn is_processed(&self, chunk_id: &Uuid) -> bool {
        self.checkpoint.summary.processed_ids.contains(chunk_id)
    }

    pub fn current_chunk_id(&self) -> Option<Uuid> {
        self.current
    }

    pub fn chunk_size(&self) -> usize {
        self.checkpoint.summary.chunk_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.checkpoint.metadata
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pause gate
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns a handle that controllers can pause, resume or stop from elsewhere.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    /// Resumes; a no-op when not paused.
    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Row;
    use crate::streaming::ChunkSplitter;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    /// Writes a checkpoint of `rows` rows split by `chunk_size` and returns its path.
    fn write_checkpoint(dir: &Path, rows: usize, chunk_size: usize) -> PathBuf {
        let table: Vec<Row> = (0..rows)
            .map(|i| {
                let mut row = Row::new();
                row.insert("n".into(), json!(i));
                row
            })
            .collect();
        let splitter = ChunkSplitter::new(chunk_size).unwrap();
        let path = dir.join("state").join("chunks.json");
        splitter
            .save(splitter.split(table), &path, Map::new())
            .expect("save failed")
    }

    #[test]
    fn test_next_unprocessed_follows_checkpoint_order() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 5, 2);
        let mut tracker = ChunkTracker::load(&path).unwrap();
        let ids: Vec<Uuid> = Checkpoint::load(&path)
            .unwrap()
            .chunks
            .iter()
            .map(|c| c.chunk_id)
            .collect();

        let first = tracker.next_unprocessed().unwrap();
        assert_eq!(first.chunk_id, ids[0]);
        assert_eq!(tracker.current_chunk_id(), Some(ids[0]));

        // Not marked yet: the same chunk comes back
        assert_eq!(tracker.next_unprocessed().unwrap().chunk_id, ids[0]);

        tracker.mark_processed(None).unwrap();
        assert_eq!(tracker.next_unprocessed().unwrap().chunk_id, ids[1]);
    }

    #[test]
    fn test_mark_without_fetch_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 3, 1);
        let mut tracker = ChunkTracker::load(&path).unwrap();

        assert!(matches!(
            tracker.mark_processed(None),
            Err(EngineError::NoCurrentChunk)
        ));

        tracker.next_unprocessed();
        tracker.mark_processed(None).unwrap();
        assert!(matches!(
            tracker.mark_processed(None),
            Err(EngineError::NoCurrentChunk)
        ));
    }

    #[test]
    fn test_marking_another_chunk_keeps_fetched_one_pending() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 3, 1);
        let mut tracker = ChunkTracker::load(&path).unwrap();
        let ids: Vec<Uuid> = Checkpoint::load(&path)
            .unwrap()
            .chunks
            .iter()
            .map(|c| c.chunk_id)
            .collect();

        let fetched = tracker.next_unprocessed().unwrap().chunk_id;
        assert_eq!(fetched, ids[0]);

        tracker.mark_processed(Some(ids[2])).unwrap();
        assert_eq!(tracker.current_chunk_id(), Some(fetched));

        assert_eq!(tracker.mark_processed(None).unwrap(), fetched);
        assert_eq!(tracker.current_chunk_id(), None);
        assert_eq!(tracker.processed_count(), 2);
    }

    #[test]
    fn test_mark_unknown_chunk_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 3, 1);
        let mut tracker = ChunkTracker::load(&path).unwrap();
        let stray = Uuid::new_v4();

        match tracker.mark_processed(Some(stray)) {
            Err(EngineError::UnknownChunk(id)) => assert_eq!(id, stray),
            other => panic!("Expected UnknownChunk, got {:?}", other),
        }
        assert_eq!(tracker.processed_count(), 0);
    }

    #[test]
    fn test_mark_save_reload_resumes() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 5, 2);

        let mut tracker = ChunkTracker::load(&path).unwrap();
        let before = tracker.remaining_chunks();
        let chunk = tracker.next_unprocessed().unwrap();
        tracker.mark_processed(Some(chunk.chunk_id)).unwrap();
        tracker.save().unwrap();

        let reloaded = ChunkTracker::load(&path).unwrap();
        assert_eq!(reloaded.remaining_chunks(), before - 1);
        assert!(reloaded.is_processed(&chunk.chunk_id));

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["summary"]["processed"], json!(1));
        assert_eq!(raw["summary"]["total_chunks"], json!(3));
    }

    #[test]
    fn test_exhausted_tracker_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 2, 1);
        let mut tracker = ChunkTracker::load(&path).unwrap();

        while let Some(chunk) = tracker.next_unprocessed() {
            tracker.commit(chunk.chunk_id).unwrap();
        }

        assert_eq!(tracker.remaining_chunks(), 0);
        assert_eq!(tracker.current_chunk_id(), None);
        assert!(ChunkTracker::load(&path)
            .unwrap()
            .next_unprocessed()
            .is_none());
    }

    #[test]
    fn test_commit_rolls_back_when_save_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 3, 1);
        let mut tracker = ChunkTracker::load(&path).unwrap();
        let chunk = tracker.next_unprocessed().unwrap();

        // Replace the checkpoint directory with a plain file so the write fails
        let state_dir = path.parent().unwrap().to_path_buf();
        fs::remove_dir_all(&state_dir).unwrap();
        fs::write(&state_dir, "blocker").unwrap();

        let result = tracker.commit(chunk.chunk_id);
        assert!(matches!(result, Err(EngineError::IoFailure(_))));
        assert!(!tracker.is_processed(&chunk.chunk_id));
        assert_eq!(tracker.processed_count(), 0);
        assert_eq!(tracker.current_chunk_id(), Some(chunk.chunk_id));
    }

    #[test]
    fn test_load_propagates_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 2, 1);

        let mut raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        raw["version"] = json!(0.9);
        fs::write(&path, raw.to_string()).unwrap();

        assert!(matches!(
            ChunkTracker::load(&path),
            Err(EngineError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_pause_gate_delegates_to_control() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 2, 1);
        let control = RunControl::new();
        let tracker = ChunkTracker::load(&path).unwrap().with_control(control.clone());

        tracker.resume();
        assert!(!tracker.is_paused());

        control.pause();
        assert!(tracker.is_paused());
        tracker.resume();
        assert!(!control.is_paused());

        tracker.stop();
        assert!(control.is_stopped());
        assert!(tracker.is_stopped());
    }

    #[test]
    fn test_accessors_report_checkpoint_details() {
        let dir = TempDir::new().unwrap();
        let path = write_checkpoint(dir.path(), 7, 3);
        let tracker = ChunkTracker::load(&path).unwrap();

        assert_eq!(tracker.total_chunks(), 3);
        assert_eq!(tracker.chunk_size(), 3);
        assert_eq!(tracker.path(), path.as_path());
        assert!(tracker.metadata().contains_key("created_at"));
    }
}
