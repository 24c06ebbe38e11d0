//! Renders a prompt plus one chunk into the text sent to a model.

use serde_json::Value;

use crate::checkpoint::{Chunk, Row};

/// Builds the model input for `chunk`.
///
/// Layout: the trimmed prompt, an empty block, then one block per row
/// (`Row {n}:` followed by `- {column}: {value}` lines), all blocks joined by
/// blank lines. Rows are numbered from 1 within the chunk; nulls render empty.
pub fn format_input(prompt: &str, chunk: &Chunk) -> String {
    let mut blocks: Vec<String> = Vec::with_capacity(chunk.rows.len() + 2);
    blocks.push(prompt.trim().to_string());
    blocks.push(String::new());

    for (idx, row) in chunk.rows.iter().enumerate() {
        blocks.push(format_row(idx + 1, row));
    }

    blocks.join("\n\n")
}

/// One `Row {n}:` block with a `- {column}: {value}` line per column.
pub(crate) fn format_row(n: usize, row: &Row) -> String {
    let mut lines = Vec::with_capacity(row.len() + 1);
    lines.push(format!("Row {}:", n));
    for (column, value) in row {
        lines.push(format!("- {}: {}", column, render_value(value)));
    }
    lines.join("\n")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
