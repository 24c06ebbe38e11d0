//! Run loop: repeats `process_next_into` until a stop condition, handing
//! successful results to a sink.

use serde::Serialize;
use tracing::{info, warn};

use super::orchestrator::ChunkOrchestrator;
use super::result::ProcessResult;
use crate::control::RunState;
use crate::error::EngineError;
use crate::model::ModelFault;
use crate::storage::ResultSink;

/// Optional caps on a single run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Stop after this many successful chunks.
    pub max_chunks: Option<usize>,
}

impl RunLimits {
    pub fn max_chunks(mut self, n: usize) -> Self {
        self.max_chunks = Some(n);
        self
    }
}

/// Why the run loop returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every chunk is processed.
    Exhausted,
    ChunkLimit,
    /// The run control was stopped.
    Stopped,
    BudgetExceeded { requested: u64, remaining: u64 },
    Retryable { code: String, attempts: u32 },
    Fatal { code: String, message: String },
    Unexpected { message: String },
}

impl StopReason {
    /// True when the remaining chunks can be resumed without user action.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            StopReason::ChunkLimit | StopReason::Stopped | StopReason::Retryable { .. }
        )
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub succeeded: usize,
    pub tokens_used: u64,
    pub remaining_tokens: u64,
    pub remaining_chunks: usize,
    pub stop: StopReason,
}

fn fault_fields(fault: &ModelFault) -> (String, String) {
    (fault.code.to_string(), fault.message.clone())
}

/// Processes chunks until the checkpoint is exhausted, a limit is hit, the
/// run is stopped, or a non-success outcome occurs.
///
/// Pausing the orchestrator's control blocks the loop before the next chunk
/// is fetched; resuming continues it.
///
/// # Errors
///
/// Only sink failures are returned as errors. Rows reach the sink before
/// their chunk is committed, so the chunk whose rows failed to save stays
/// unprocessed and the next run delivers it again.
pub async fn run_chunks(
    orchestrator: &mut ChunkOrchestrator,
    sink: &dyn ResultSink,
    limits: RunLimits,
) -> Result<RunReport, EngineError> {
    let control = orchestrator.control();
    let mut succeeded = 0usize;
    let mut tokens_used = 0u64;

    info!(
        remaining_chunks = orchestrator.tracker().remaining_chunks(),
        max_chunks = ?limits.max_chunks,
        "[DRIVER] Run started"
    );

    let stop = loop {
        if limits.max_chunks.is_some_and(|max| succeeded >= max) {
            break StopReason::ChunkLimit;
        }

        if control.is_paused() {
            info!("[DRIVER] Paused, waiting for resume");
        }
        if control.wait_until_runnable().await == RunState::Stopped {
            break StopReason::Stopped;
        }

        let result = orchestrator.process_next_into(sink).await?;
        match &result {
            ProcessResult::Success { used_tokens, .. } => {
                succeeded += 1;
                tokens_used += used_tokens;
            }
            ProcessResult::NoMoreChunks => break StopReason::Exhausted,
            ProcessResult::TokenBudgetExceeded {
                requested,
                remaining,
            } => {
                break StopReason::BudgetExceeded {
                    requested: *requested,
                    remaining: *remaining,
                }
            }
            ProcessResult::RetryableError { cause, attempts } => {
                break StopReason::Retryable {
                    code: cause.code.to_string(),
                    attempts: *attempts,
                }
            }
            ProcessResult::FatalError { cause } => {
                let (code, message) = fault_fields(cause);
                break StopReason::Fatal { code, message };
            }
            ProcessResult::UnexpectedError { cause } => {
                break StopReason::Unexpected {
                    message: cause.to_string(),
                }
            }
        }
    };

    let report = RunReport {
        succeeded,
        tokens_used,
        remaining_tokens: orchestrator.ledger().remaining(),
        remaining_chunks: orchestrator.tracker().remaining_chunks(),
        stop,
    };

    match &report.stop {
        StopReason::Exhausted | StopReason::ChunkLimit | StopReason::Stopped => info!(
            succeeded = report.succeeded,
            tokens_used = report.tokens_used,
            remaining_chunks = report.remaining_chunks,
            stop = ?report.stop,
            "[DRIVER] Run finished"
        ),
        _ => warn!(
            succeeded = report.succeeded,
            remaining_chunks = report.remaining_chunks,
            stop = ?report.stop,
            "[DRIVER] Run halted"
        ),
    }

    Ok(report)
}
