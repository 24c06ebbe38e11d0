//! On-disk checkpoint format.
//!
//! A checkpoint is a single versioned JSON document holding every chunk of a
//! split dataset plus the completion bookkeeping:
//!
//! ```json
//! {
//!   "version": 1.0,
//!   "metadata": {},
//!   "chunks": [{ "chunk_id": "<uuid>", "data": [{ "...": "...", "source_id": "<uuid>" }], "original_rows": 2 }],
//!   "summary": { "total_chunks": 1, "chunk_size": 2, "processed_ids": [], "processed": 0 }
//! }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EngineError;
use crate::streaming::write_json_atomic;

/// The only checkpoint version this engine reads or writes.
pub const CHECKPOINT_VERSION: f64 = 1.0;

/// Column added to every row when a table is split.
pub const SOURCE_ID_COLUMN: &str = "source_id";

/// One dataset row: column name to JSON value, in column order.
pub type Row = Map<String, Value>;

/// A contiguous group of rows, the unit of work sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    #[serde(rename = "data")]
    pub rows: Vec<Row>,
    #[serde(rename = "original_rows")]
    pub original_row_count: usize,
}

impl Chunk {
    /// Returns the `source_id` of every row that carries one.
    pub fn source_ids(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|row| row.get(SOURCE_ID_COLUMN).and_then(Value::as_str))
            .collect()
    }
}

/// Completion bookkeeping stored alongside the chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub total_chunks: usize,
    pub chunk_size: usize,
    #[serde(default)]
    pub processed_ids: BTreeSet<Uuid>,
    /// Derived count, rewritten on every save.
    #[serde(default)]
    pub processed: usize,
}

/// The full checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub chunks: Vec<Chunk>,
    pub summary: CheckpointSummary,
}

impl Checkpoint {
    /// Builds a fresh checkpoint with nothing processed yet.
    pub fn new(chunks: Vec<Chunk>, chunk_size: usize, metadata: Map<String, Value>) -> Self {
        let total_chunks = chunks.len();
        Self {
            version: CHECKPOINT_VERSION,
            metadata,
            chunks,
            summary: CheckpointSummary {
                total_chunks,
                chunk_size,
                processed_ids: BTreeSet::new(),
                processed: 0,
            },
        }
    }

    /// Reads and validates a checkpoint file.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the file does not exist
    /// - `NotJson` if the file is not a `.json` file or does not parse
    /// - `UnsupportedVersion` if `version` is missing or differs from [`CHECKPOINT_VERSION`]
    /// - `CorruptCheckpoint` if the structure or invariants are broken
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::NotFound(path.to_path_buf()));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            return Err(EngineError::NotJson(format!(
                "File must be JSON format: {}",
                path.display()
            )));
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::IoFailure(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let value: Value =
            serde_json::from_str(&raw).map_err(|e| EngineError::NotJson(e.to_string()))?;

        check_version(&value)?;

        let checkpoint: Checkpoint = serde_json::from_value(value)
            .map_err(|e| EngineError::CorruptCheckpoint(e.to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Atomically writes the checkpoint to `path`.
    pub fn save(&self, path: &Path) -> Result<PathBuf, EngineError> {
        write_json_atomic(path, self)
    }

    /// Checks `total_chunks == len(chunks)` and `processed_ids ⊆ chunk ids`.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.summary.total_chunks != self.chunks.len() {
            return Err(EngineError::CorruptCheckpoint(format!(
                "summary lists {} chunks but {} are stored",
                self.summary.total_chunks,
                self.chunks.len()
            )));
        }

        let ids = self.chunk_ids();
        if ids.len() != self.chunks.len() {
            return Err(EngineError::CorruptCheckpoint(
                "duplicate chunk ids".to_string(),
            ));
        }
        if let Some(stray) = self.summary.processed_ids.iter().find(|id| !ids.contains(*id)) {
            return Err(EngineError::CorruptCheckpoint(format!(
                "processed id {} does not match any chunk",
                stray
            )));
        }
        Ok(())
    }

    /// Returns the set of all chunk ids.
    pub fn chunk_ids(&self) -> HashSet<Uuid> {
        self.chunks.iter().map(|c| c.chunk_id).collect()
    }

    /// Returns true if `id` names a chunk in this checkpoint.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.chunks.iter().any(|c| &c.chunk_id == id)
    }
}

/// Hard compatibility gate: the version must match exactly.
fn check_version(value: &Value) -> Result<(), EngineError> {
    match value.get("version") {
        Some(v) if v.as_f64() == Some(CHECKPOINT_VERSION) => Ok(()),
        Some(v) => Err(EngineError::UnsupportedVersion {
            found: v.to_string(),
            expected: CHECKPOINT_VERSION,
        }),
        None => Err(EngineError::UnsupportedVersion {
            found: "missing".to_string(),
            expected: CHECKPOINT_VERSION,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn sample_chunk(n: usize) -> Chunk {
        let rows = (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row.insert(SOURCE_ID_COLUMN.into(), json!(Uuid::new_v4().to_string()));
                row
            })
            .collect();
        Chunk {
            chunk_id: Uuid::new_v4(),
            rows,
            original_row_count: n,
        }
    }

    #[test]
    fn test_save_and_load_preserves_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.json");

        let mut checkpoint = Checkpoint::new(vec![sample_chunk(2), sample_chunk(1)], 2, Map::new());
        let first = checkpoint.chunks[0].chunk_id;
        checkpoint.summary.processed_ids.insert(first);
        checkpoint.summary.processed = 1;
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_wire_format_field_names() {
        let checkpoint = Checkpoint::new(vec![sample_chunk(1)], 5, Map::new());
        let value = serde_json::to_value(&checkpoint).unwrap();

        assert_eq!(value["version"], json!(1.0));
        assert!(value["chunks"][0].get("chunk_id").is_some());
        assert!(value["chunks"][0].get("data").is_some());
        assert_eq!(value["chunks"][0]["original_rows"], json!(1));
        assert_eq!(value["summary"]["total_chunks"], json!(1));
        assert_eq!(value["summary"]["chunk_size"], json!(5));
        assert_eq!(value["summary"]["processed_ids"], json!([]));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Checkpoint::load(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_load_wrong_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.txt");
        fs::write(&path, "{}").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(EngineError::NotJson(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.json");
        fs::write(&path, "{\"version\": 1.0, \"chunks\": [").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(EngineError::NotJson(_))));
    }

    #[test]
    fn test_load_rejects_other_versions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.json");

        let mut value = serde_json::to_value(Checkpoint::new(vec![sample_chunk(1)], 1, Map::new())).unwrap();
        value["version"] = json!(2.0);
        fs::write(&path, value.to_string()).unwrap();
        match Checkpoint::load(&path) {
            Err(EngineError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, "2.0");
                assert_eq!(expected, 1.0);
            }
            other => panic!("Expected UnsupportedVersion, got {:?}", other),
        }

        value.as_object_mut().unwrap().remove("version");
        fs::write(&path, value.to_string()).unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(EngineError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_integer_version_one_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.json");

        let mut value = serde_json::to_value(Checkpoint::new(vec![sample_chunk(1)], 1, Map::new())).unwrap();
        value["version"] = json!(1);
        fs::write(&path, value.to_string()).unwrap();

        assert!(Checkpoint::load(&path).is_ok());
    }

    #[test]
    fn test_validate_rejects_stray_processed_id() {
        let mut checkpoint = Checkpoint::new(vec![sample_chunk(1)], 1, Map::new());
        checkpoint.summary.processed_ids.insert(Uuid::new_v4());
        assert!(matches!(
            checkpoint.validate(),
            Err(EngineError::CorruptCheckpoint(_))
        ));
    }

    #[test]
    fn test_validate_rejects_total_mismatch() {
        let mut checkpoint = Checkpoint::new(vec![sample_chunk(1)], 1, Map::new());
        checkpoint.summary.total_chunks = 3;
        assert!(matches!(
            checkpoint.validate(),
            Err(EngineError::CorruptCheckpoint(_))
        ));
    }

    #[test]
    fn test_chunk_source_ids() {
        let chunk = sample_chunk(3);
        assert_eq!(chunk.source_ids().len(), 3);
    }
}
