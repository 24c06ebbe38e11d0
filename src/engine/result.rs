//! Typed outcome of one orchestrator step.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::checkpoint::{Chunk, SOURCE_ID_COLUMN};
use crate::error::{sanitize_message, EngineError, ErrorPresentation};
use crate::model::ModelFault;
use crate::storage::ResultRow;
use crate::streaming::current_timestamp;

/// What went wrong when the outcome is unexpected.
#[derive(Debug)]
pub enum UnexpectedCause {
    /// The model failed with a fault the classification table does not list.
    Model(ModelFault),
    /// The engine itself failed, for example while persisting the checkpoint.
    Engine(EngineError),
}

impl fmt::Display for UnexpectedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnexpectedCause::Model(fault) => write!(f, "{}", fault),
            UnexpectedCause::Engine(err) => write!(f, "{}", err),
        }
    }
}

/// Result of [`ChunkOrchestrator::process_next`](super::ChunkOrchestrator::process_next).
#[derive(Debug)]
pub enum ProcessResult {
    Success {
        response: String,
        chunk_id: Uuid,
        remaining_tokens: u64,
        used_tokens: u64,
        chunk: Chunk,
    },
    RetryableError {
        cause: ModelFault,
        attempts: u32,
    },
    FatalError {
        cause: ModelFault,
    },
    UnexpectedError {
        cause: UnexpectedCause,
    },
    NoMoreChunks,
    TokenBudgetExceeded {
        requested: u64,
        remaining: u64,
    },
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessResult::Success { .. })
    }

    /// Id of the chunk that was processed, for `Success` only.
    pub fn chunk_id(&self) -> Option<Uuid> {
        match self {
            ProcessResult::Success { chunk_id, .. } => Some(*chunk_id),
            _ => None,
        }
    }

    /// Builds one result row per input row of a successful chunk.
    ///
    /// When the response answers every row under its `Row {n}:` label, each
    /// row gets its own answer; otherwise every row carries the full response.
    /// Non-success outcomes produce no rows.
    pub fn result_rows(&self, prompt: &str, model_version: &str) -> Vec<ResultRow> {
        let ProcessResult::Success {
            response,
            chunk_id,
            used_tokens,
            chunk,
            ..
        } = self
        else {
            return Vec::new();
        };

        let per_row = split_row_responses(response, chunk.rows.len());
        let timestamp = current_timestamp();

        chunk
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| ResultRow {
                source_id: row
                    .get(SOURCE_ID_COLUMN)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                chunk_id: chunk_id.to_string(),
                prompt: prompt.to_string(),
                response: per_row
                    .as_ref()
                    .map(|answers| answers[i].clone())
                    .unwrap_or_else(|| response.clone()),
                used_tokens: *used_tokens,
                model_version: model_version.to_string(),
                timestamp,
            })
            .collect()
    }

    /// User-facing summary. Budget exhaustion reads as a stop condition.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            ProcessResult::Success {
                remaining_tokens, ..
            } => ErrorPresentation {
                title: "Chunk Processed".into(),
                message: format!("Chunk processed. {} tokens remaining.", remaining_tokens),
                action: None,
            },
            ProcessResult::RetryableError { attempts, .. } => ErrorPresentation {
                title: "Model Service Unavailable".into(),
                message: format!(
                    "Could not reach the model service after {} attempts. The chunk will be retried.",
                    attempts
                ),
                action: Some("Wait a moment, then continue the run".into()),
            },
            ProcessResult::FatalError { cause } => ErrorPresentation {
                title: "Model Request Rejected".into(),
                message: sanitize_message(
                    &format!("The model service rejected the request: {}", cause.message),
                    "The model service rejected the request.",
                ),
                action: Some("Check your API key, permissions and quota".into()),
            },
            ProcessResult::UnexpectedError { cause } => match cause {
                UnexpectedCause::Engine(err) => err.to_presentation(),
                UnexpectedCause::Model(_) => ErrorPresentation {
                    title: "Unexpected Error".into(),
                    message: "The model call failed in an unexpected way.".into(),
                    action: Some("Report this problem if it keeps happening".into()),
                },
            },
            ProcessResult::NoMoreChunks => ErrorPresentation {
                title: "All Chunks Processed".into(),
                message: "Every chunk in this checkpoint has been processed.".into(),
                action: Some("Export the results".into()),
            },
            ProcessResult::TokenBudgetExceeded {
                requested,
                remaining,
            } => ErrorPresentation {
                title: "Token Budget Reached".into(),
                message: format!(
                    "The next chunk needs {} tokens but only {} remain. The run has stopped.",
                    requested, remaining
                ),
                action: Some("Raise the token budget to continue".into()),
            },
        }
    }
}

/// Splits a response into one answer per row using the `Row {n}:` labels
/// that [`format_input`](crate::model::format_input) puts on each row.
///
/// Unlabelled lines continue the previous answer; text before the first
/// label is dropped. Returns `None` unless every row from 1 to `rows` is
/// answered exactly once.
fn split_row_responses(response: &str, rows: usize) -> Option<Vec<String>> {
    if rows == 0 {
        return None;
    }
    let mut answers: Vec<Option<String>> = vec![None; rows];
    let mut current: Option<usize> = None;

    for line in response.trim().lines() {
        match parse_row_label(line) {
            Some((n, answer)) => {
                let slot = answers.get_mut(n.checked_sub(1)?)?;
                if slot.is_some() {
                    return None;
                }
                *slot = Some(answer.trim().to_string());
                current = Some(n - 1);
            }
            None => {
                let text = line.trim();
                if let (Some(i), false) = (current, text.is_empty()) {
                    if let Some(answer) = answers[i].as_mut() {
                        if !answer.is_empty() {
                            answer.push('\n');
                        }
                        answer.push_str(text);
                    }
                }
            }
        }
    }

    answers.into_iter().collect()
}

/// Parses `Row {n}: answer`, returning `n` and the answer text.
fn parse_row_label(line: &str) -> Option<(usize, &str)> {
    let rest = line.trim_start().strip_prefix("Row ")?;
    let (number, answer) = rest.split_once(':')?;
    let n = number.trim().parse().ok()?;
    Some((n, answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Row;
    use crate::model::FaultCode;
    use serde_json::json;

    fn success(response: &str, rows: usize) -> ProcessResult {
        let rows: Vec<Row> = (0..rows)
            .map(|i| {
                let mut row = Row::new();
                row.insert("n".into(), json!(i));
                row.insert(SOURCE_ID_COLUMN.into(), json!(format!("src-{}", i)));
                row
            })
            .collect();
        let chunk = Chunk {
            chunk_id: Uuid::new_v4(),
            original_row_count: rows.len(),
            rows,
        };
        ProcessResult::Success {
            response: response.to_string(),
            chunk_id: chunk.chunk_id,
            remaining_tokens: 90,
            used_tokens: 10,
            chunk,
        }
    }

    #[test]
    fn rows_get_their_own_answers_when_lines_match() {
        let result = success("Row 1: positive\nRow 2: negative\n", 2);
        let rows = result.result_rows("Classify", "gemini-pro");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_id, "src-0");
        assert_eq!(rows[0].response, "positive");
        assert_eq!(rows[1].response, "negative");
        assert_eq!(rows[1].used_tokens, 10);
        assert_eq!(rows[1].prompt, "Classify");
        assert_eq!(rows[1].model_version, "gemini-pro");
        assert_eq!(rows[0].chunk_id, result.chunk_id().unwrap().to_string());
    }

    #[test]
    fn mismatched_lines_fall_back_to_full_response() {
        let result = success("one summary for everything", 2);
        let rows = result.result_rows("p", "m");
        assert!(rows.iter().all(|r| r.response == "one summary for everything"));
    }

    #[test]
    fn unlabelled_colon_lines_are_not_row_answers() {
        let result = success("Note: both rows look fine\nSummary: positive", 2);
        let rows = result.result_rows("p", "m");
        assert!(rows
            .iter()
            .all(|r| r.response == "Note: both rows look fine\nSummary: positive"));
    }

    #[test]
    fn labels_are_matched_by_row_number() {
        let result = success("Here you go.\nRow 2: negative\nRow 1: positive\nstill row one", 2);
        let rows = result.result_rows("p", "m");
        assert_eq!(rows[0].response, "positive\nstill row one");
        assert_eq!(rows[1].response, "negative");
    }

    #[test]
    fn missing_or_repeated_labels_fall_back() {
        for response in ["Row 1: a\nRow 1: b", "Row 1: a\nRow 3: c", "Row 1: a"] {
            let result = success(response, 2);
            let rows = result.result_rows("p", "m");
            assert!(rows.iter().all(|r| r.response == response), "{}", response);
        }
    }

    #[test]
    fn non_success_has_no_rows() {
        assert!(ProcessResult::NoMoreChunks.result_rows("p", "m").is_empty());
        assert_eq!(ProcessResult::NoMoreChunks.chunk_id(), None);
    }

    #[test]
    fn presentations_use_expected_wording() {
        let retry = ProcessResult::RetryableError {
            cause: ModelFault::new(FaultCode::Timeout, "slow"),
            attempts: 3,
        }
        .to_presentation();
        assert!(retry.message.contains("after 3 attempts"));

        let fatal = ProcessResult::FatalError {
            cause: ModelFault::new(FaultCode::Unauthenticated, "bad key"),
        }
        .to_presentation();
        assert!(fatal.action.unwrap().contains("API key"));

        let budget = ProcessResult::TokenBudgetExceeded {
            requested: 3,
            remaining: 1,
        }
        .to_presentation();
        assert!(budget.message.contains("stopped"));
        assert!(!budget.title.to_lowercase().contains("error"));
    }

    #[test]
    fn fatal_presentation_hides_secrets() {
        let fatal = ProcessResult::FatalError {
            cause: ModelFault::new(FaultCode::InvalidArgument, "key=AIzaSecret rejected"),
        }
        .to_presentation();
        assert!(!fatal.message.contains("AIzaSecret"));
    }

    #[test]
    fn engine_cause_uses_engine_presentation() {
        let result = ProcessResult::UnexpectedError {
            cause: UnexpectedCause::Engine(EngineError::IoFailure("disk full".into())),
        };
        assert_eq!(result.to_presentation().title, "File Error");
    }
}
