//! Result persistence.
//!
//! Successful chunk outcomes become one [`ResultRow`] per input row. Sinks
//! are idempotent under repeated `(source_id, prompt)` pairs: a later save
//! replaces the earlier row rather than adding a duplicate.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::EngineError;

/// Schema for the results table.
const RESULTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    prompt TEXT NOT NULL,
    response TEXT NOT NULL,
    used_tokens INTEGER NOT NULL,
    model_version TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    UNIQUE (source_id, prompt)
);

CREATE INDEX IF NOT EXISTS idx_results_chunk_id ON results(chunk_id);
"#;

const UPSERT_RESULT: &str = r#"
INSERT INTO results (source_id, chunk_id, prompt, response, used_tokens, model_version, timestamp)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT (source_id, prompt) DO UPDATE SET
    chunk_id = excluded.chunk_id,
    response = excluded.response,
    used_tokens = excluded.used_tokens,
    model_version = excluded.model_version,
    timestamp = excluded.timestamp
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Result Row
// ─────────────────────────────────────────────────────────────────────────────

/// One model answer for one input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub source_id: String,
    pub chunk_id: String,
    pub prompt: String,
    pub response: String,
    pub used_tokens: u64,
    pub model_version: String,
    /// Unix seconds.
    pub timestamp: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultSink Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Durable destination for result rows.
pub trait ResultSink: Send + Sync {
    /// Stores `rows`. Saving an empty slice is `EmptyInput`.
    fn save<'a>(
        &'a self,
        rows: &'a [ResultRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Configures connection with busy timeout and WAL mode.
fn configure_connection(conn: &Connection) -> Result<(), EngineError> {
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| EngineError::Sink(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| EngineError::Sink(format!("Failed to set WAL mode: {e}")))?;

    Ok(())
}

fn open_connection(db_path: &Path) -> Result<Connection, EngineError> {
    let conn = Connection::open(db_path)
        .map_err(|e| EngineError::Sink(format!("Failed to open database: {e}")))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// SQLite-backed result sink. Opens a connection per operation.
#[derive(Debug, Clone)]
pub struct SqliteResultSink {
    db_path: PathBuf,
}

impl SqliteResultSink {
    /// Creates parent directories, opens the database and ensures the schema.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let db_path = db_path.into();
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Sink(format!("Failed to create database directory: {e}"))
                })?;
            }

            let conn = open_connection(&path)?;
            conn.execute_batch(RESULTS_SCHEMA)
                .map_err(|e| EngineError::Sink(format!("Failed to create results table: {e}")))?;

            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Database init task failed: {e}")))??;

        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Returns every stored row, oldest first.
    pub async fn all(&self) -> Result<Vec<ResultRow>, EngineError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;

            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT source_id, chunk_id, prompt, response, used_tokens, model_version, timestamp
                    FROM results
                    ORDER BY id
                    "#,
                )
                .map_err(|e| EngineError::Sink(format!("Failed to prepare query: {e}")))?;

            let rows = stmt
                .query_map([], |row| {
                    let used_tokens: i64 = row.get(4)?;
                    Ok(ResultRow {
                        source_id: row.get(0)?,
                        chunk_id: row.get(1)?,
                        prompt: row.get(2)?,
                        response: row.get(3)?,
                        used_tokens: used_tokens.max(0) as u64,
                        model_version: row.get(5)?,
                        timestamp: row.get(6)?,
                    })
                })
                .map_err(|e| EngineError::Sink(format!("Failed to query results: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::Sink(format!("Failed to read result row: {e}")))?;

            Ok::<_, EngineError>(rows)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Result query task failed: {e}")))?
    }

    async fn upsert(&self, rows: Vec<ResultRow>) -> Result<usize, EngineError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Sink(format!("Failed to begin transaction: {e}")))?;

            {
                let mut stmt = tx
                    .prepare(UPSERT_RESULT)
                    .map_err(|e| EngineError::Sink(format!("Failed to prepare insert: {e}")))?;

                for row in &rows {
                    stmt.execute(rusqlite::params![
                        row.source_id,
                        row.chunk_id,
                        row.prompt,
                        row.response,
                        i64::try_from(row.used_tokens).unwrap_or(i64::MAX),
                        row.model_version,
                        row.timestamp,
                    ])
                    .map_err(|e| EngineError::Sink(format!("Failed to insert result: {e}")))?;
                }
            }

            tx.commit()
                .map_err(|e| EngineError::Sink(format!("Failed to commit results: {e}")))?;

            Ok::<_, EngineError>(rows.len())
        })
        .await
        .map_err(|e| EngineError::Internal(format!("Result save task failed: {e}")))?
    }
}

impl ResultSink for SqliteResultSink {
    fn save<'a>(
        &'a self,
        rows: &'a [ResultRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Err(EngineError::EmptyInput);
            }
            let saved = self.upsert(rows.to_vec()).await?;
            info!("[RESULTS] Saved {} rows to {}", saved, self.db_path.display());
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Sink
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory sink with the same replace-on-duplicate policy as SQLite.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSink {
    rows: Arc<Mutex<Vec<ResultRow>>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored rows in insertion order.
    pub async fn rows(&self) -> Vec<ResultRow> {
        self.rows.lock().await.clone()
    }
}

impl ResultSink for MemoryResultSink {
    fn save<'a>(
        &'a self,
        rows: &'a [ResultRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Err(EngineError::EmptyInput);
            }
            let mut stored = self.rows.lock().await;
            for row in rows {
                match stored
                    .iter_mut()
                    .find(|r| r.source_id == row.source_id && r.prompt == row.prompt)
                {
                    Some(existing) => *existing = row.clone(),
                    None => stored.push(row.clone()),
                }
            }
            Ok(())
        })
    }
}
