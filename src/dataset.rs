//! Sources of the initial row table.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde_json::Value;
use tracing::info;

use crate::checkpoint::Row;
use crate::error::EngineError;

/// Supplies the rows that get split into chunks.
pub trait DatasetProvider {
    fn load(&self) -> Result<Vec<Row>, EngineError>;
}

/// Rows already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    rows: Vec<Row>,
}

impl InMemoryDataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl DatasetProvider for InMemoryDataset {
    fn load(&self) -> Result<Vec<Row>, EngineError> {
        Ok(self.rows.clone())
    }
}

impl From<Vec<Row>> for InMemoryDataset {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

/// A headered UTF-8 CSV file. Every value is loaded as a string.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    path: PathBuf,
}

impl CsvDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads on the blocking pool.
    pub async fn load_async(&self) -> Result<Vec<Row>, EngineError> {
        let dataset = self.clone();
        tokio::task::spawn_blocking(move || dataset.load())
            .await
            .map_err(|e| EngineError::Internal(format!("Task join error: {}", e)))?
    }
}

impl DatasetProvider for CsvDataset {
    fn load(&self) -> Result<Vec<Row>, EngineError> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(self.path.clone()),
            _ => EngineError::IoFailure(format!("Failed to open CSV file: {}", e)),
        })?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(BufReader::new(file));

        let headers = reader
            .headers()
            .map_err(|e| EngineError::IoFailure(format!("Failed to read CSV headers: {}", e)))?
            .clone();

        if headers.is_empty() || headers.iter().all(str::is_empty) {
            return Err(EngineError::EmptyInput);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| EngineError::IoFailure(format!("Failed to read CSV record: {}", e)))?;
            let row: Row = headers
                .iter()
                .zip(record.iter())
                .map(|(column, value)| (column.to_string(), Value::String(value.to_string())))
                .collect();
            rows.push(row);
        }

        info!(
            path = %self.path.display(),
            columns = headers.len(),
            rows = rows.len(),
            "[DATASET] Loaded CSV"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn csv_rows_keep_column_order_and_string_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.csv");
        fs::write(&path, "name,score\nalpha,3\n\"beta, jr\",\n").unwrap();

        let rows = CsvDataset::new(&path).load().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["name", "score"]);
        assert_eq!(rows[0]["score"], json!("3"));
        assert_eq!(rows[1]["name"], json!("beta, jr"));
        assert_eq!(rows[1]["score"], json!(""));
    }

    #[test]
    fn empty_file_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        fs::write(&path, "").unwrap();

        assert!(matches!(
            CsvDataset::new(&path).load(),
            Err(EngineError::EmptyInput)
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CsvDataset::new(dir.path().join("absent.csv")).load(),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn ragged_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a,b\n1,2,3\n").unwrap();

        assert!(matches!(
            CsvDataset::new(&path).load(),
            Err(EngineError::IoFailure(_))
        ));
    }

    #[tokio::test]
    async fn async_load_matches_blocking_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.csv");
        fs::write(&path, "q\nwhy\n").unwrap();

        let dataset = CsvDataset::new(&path);
        assert_eq!(dataset.load_async().await.unwrap(), dataset.load().unwrap());
    }

    #[test]
    fn in_memory_returns_owned_rows() {
        let mut row = Row::new();
        row.insert("k".into(), json!(1));
        let dataset = InMemoryDataset::from(vec![row.clone()]);
        assert_eq!(dataset.load().unwrap(), vec![row]);
    }
}
