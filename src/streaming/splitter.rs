//! Row-group splitting of an in-memory table into checkpointed chunks.
//!
//! Every row is stamped with a fresh `source_id` before grouping so results
//! can be joined back to their input rows later. Rows are grouped
//! contiguously in original order; the last chunk may be smaller.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, Chunk, Row, SOURCE_ID_COLUMN};
use crate::error::EngineError;

/// Chunk size presets.
#[derive(Debug, Clone, Copy)]
pub enum ChunkSize {
    /// 10 rows per chunk
    Small,
    /// 100 rows per chunk
    Medium,
    /// 1,000 rows per chunk
    Large,
    /// Custom row count
    Custom(usize),
}

impl ChunkSize {
    /// Returns the chunk size as a row count.
    pub fn as_usize(self) -> usize {
        match self {
            ChunkSize::Small => 10,
            ChunkSize::Medium => 100,
            ChunkSize::Large => 1_000,
            ChunkSize::Custom(n) => n,
        }
    }
}

impl From<ChunkSize> for usize {
    fn from(size: ChunkSize) -> Self {
        size.as_usize()
    }
}

/// Splits tables into fixed-size chunks and writes them as a checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSplitter {
    chunk_size: usize,
}

impl ChunkSplitter {
    /// Creates a splitter producing chunks of at most `chunk_size` rows.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidChunkSize` if `chunk_size` is zero.
    pub fn new(chunk_size: impl Into<usize>) -> Result<Self, EngineError> {
        let chunk_size = chunk_size.into();
        if chunk_size == 0 {
            return Err(EngineError::InvalidChunkSize { size: chunk_size });
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stamps each row with a unique `source_id` and groups rows into chunks.
    ///
    /// An empty table yields no chunks.
    pub fn split(&self, table: Vec<Row>) -> Vec<Chunk> {
        let total_rows = table.len();
        let mut chunks: Vec<Chunk> = Vec::with_capacity(total_rows.div_ceil(self.chunk_size));
        let mut current: Vec<Row> = Vec::with_capacity(self.chunk_size.min(total_rows));

        for mut row in table {
            // An existing source_id column is replaced, never trusted.
            row.insert(
                SOURCE_ID_COLUMN.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
            current.push(row);

            if current.len() == self.chunk_size {
                chunks.push(finish_chunk(std::mem::take(&mut current)));
            }
        }

        if !current.is_empty() {
            chunks.push(finish_chunk(current));
        }

        info!(
            "[SPLITTER] Split {} rows into {} chunks of up to {} rows",
            total_rows,
            chunks.len(),
            self.chunk_size
        );

        chunks
    }

    /// Writes `chunks` as a fresh checkpoint (nothing processed) to `path`.
    ///
    /// The write is atomic: on failure no partial file or temp file remains.
    /// A `created_at` unix timestamp is added to `metadata` when absent.
    ///
    /// # Errors
    ///
    /// - `EngineError::EmptyInput` if `chunks` is empty
    /// - `EngineError::IoFailure` if the file cannot be written
    pub fn save(
        &self,
        chunks: Vec<Chunk>,
        path: &Path,
        mut metadata: Map<String, Value>,
    ) -> Result<PathBuf, EngineError> {
        if chunks.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        metadata
            .entry("created_at")
            .or_insert_with(|| Value::from(current_timestamp()));

        let checkpoint = Checkpoint::new(chunks, self.chunk_size, metadata);
        let written = checkpoint.save(path)?;

        debug!(
            path = %written.display(),
            total_chunks = checkpoint.summary.total_chunks,
            "[SPLITTER] Checkpoint written"
        );

        Ok(written)
    }
}

/// Splits `table` into chunks of at most `chunk_size` rows.
///
/// # Errors
///
/// Returns `EngineError::InvalidChunkSize` if `chunk_size` is zero.
pub fn split(table: Vec<Row>, chunk_size: usize) -> Result<Vec<Chunk>, EngineError> {
    Ok(ChunkSplitter::new(chunk_size)?.split(table))
}

fn finish_chunk(rows: Vec<Row>) -> Chunk {
    Chunk {
        chunk_id: Uuid::new_v4(),
        original_row_count: rows.len(),
        rows,
    }
}

/// Returns current unix timestamp in seconds.
pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
