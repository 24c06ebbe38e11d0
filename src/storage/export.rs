//! CSV export of results joined back to their original rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use super::results::ResultRow;
use crate::checkpoint::{Checkpoint, Row, SOURCE_ID_COLUMN};
use crate::error::EngineError;
use crate::streaming::AtomicCsvWriter;

const RESULT_COLUMNS: [&str; 6] = [
    "chunk_id",
    "prompt",
    "response",
    "used_tokens",
    "model_version",
    "timestamp",
];

/// Writes one CSV line per result row, with the original columns attached.
///
/// Every result row is exported. Original columns come from the checkpoint
/// at `checkpoint_path`, matched by `source_id`, and are blank when no match
/// exists. If the checkpoint file is missing, only result columns are written.
///
/// # Errors
///
/// - `EmptyInput` if `rows` is empty
/// - checkpoint load errors other than `NotFound`
/// - `IoFailure` if the CSV cannot be written
pub fn export_csv(
    rows: &[ResultRow],
    checkpoint_path: &Path,
    csv_path: &Path,
) -> Result<PathBuf, EngineError> {
    if rows.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    let checkpoint = match Checkpoint::load(checkpoint_path) {
        Ok(checkpoint) => Some(checkpoint),
        Err(EngineError::NotFound(_)) => {
            warn!(
                path = %checkpoint_path.display(),
                "[RESULTS] Checkpoint not found, exporting result columns only"
            );
            None
        }
        Err(e) => return Err(e),
    };

    let originals: Vec<&Row> = checkpoint
        .iter()
        .flat_map(|c| c.chunks.iter())
        .flat_map(|chunk| chunk.rows.iter())
        .collect();

    let mut original_columns: Vec<&str> = Vec::new();
    for row in &originals {
        for column in row.keys() {
            if column != SOURCE_ID_COLUMN && !original_columns.contains(&column.as_str()) {
                original_columns.push(column);
            }
        }
    }

    let by_source_id: HashMap<&str, &Row> = originals
        .iter()
        .filter_map(|row| {
            row.get(SOURCE_ID_COLUMN)
                .and_then(Value::as_str)
                .map(|id| (id, *row))
        })
        .collect();

    let mut writer = AtomicCsvWriter::new(csv_path)?;

    let header: Vec<&str> = std::iter::once(SOURCE_ID_COLUMN)
        .chain(original_columns.iter().copied())
        .chain(RESULT_COLUMNS)
        .collect();
    writer
        .writer_mut()
        .write_record(&header)
        .map_err(|e| EngineError::IoFailure(format!("Failed to write CSV header: {}", e)))?;

    let mut matched = 0usize;
    for result in rows {
        let original = by_source_id.get(result.source_id.as_str());
        if original.is_some() {
            matched += 1;
        }

        let mut record: Vec<String> = Vec::with_capacity(header.len());
        record.push(result.source_id.clone());
        for column in &original_columns {
            record.push(
                original
                    .and_then(|row| row.get(*column))
                    .map(csv_value)
                    .unwrap_or_default(),
            );
        }
        record.push(result.chunk_id.clone());
        record.push(result.prompt.clone());
        record.push(result.response.clone());
        record.push(result.used_tokens.to_string());
        record.push(result.model_version.clone());
        record.push(result.timestamp.to_string());

        writer
            .writer_mut()
            .write_record(&record)
            .map_err(|e| EngineError::IoFailure(format!("Failed to write CSV row: {}", e)))?;
    }

    let written = writer.finish()?;
    info!(
        "[RESULTS] Exported {} rows ({} joined to original data) to {}",
        rows.len(),
        matched,
        written.display()
    );
    Ok(written)
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
