//! Per-chunk orchestration: fetch, invoke, budget, commit.
//!
//! A chunk is marked processed only when its response was obtained and fits
//! the remaining token budget. Every other path leaves the chunk unprocessed
//! so a later call retries it.

use tracing::{debug, info, warn};

use super::ledger::TokenLedger;
use super::result::{ProcessResult, UnexpectedCause};
use crate::checkpoint::ChunkTracker;
use crate::config::EngineConfig;
use crate::control::RunControl;
use crate::error::EngineError;
use crate::model::{ClassificationTable, InvokeError, ModelInvoker, ResilientInvoker};
use crate::storage::ResultSink;

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects orchestrator parts; `build` rejects missing ones.
#[derive(Default)]
pub struct ChunkOrchestratorBuilder {
    prompt: Option<String>,
    invoker: Option<ResilientInvoker>,
    tracker: Option<ChunkTracker>,
    ledger: Option<TokenLedger>,
}

impl ChunkOrchestratorBuilder {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn invoker(mut self, invoker: ResilientInvoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn tracker(mut self, tracker: ChunkTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn ledger(mut self, ledger: TokenLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// # Errors
    ///
    /// `EmptyPrompt`, `NoInvoker`, `NoTracker` or `NoLedger`, checked in that order.
    pub fn build(self) -> Result<ChunkOrchestrator, EngineError> {
        let prompt = self
            .prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or(EngineError::EmptyPrompt)?;
        let invoker = self.invoker.ok_or(EngineError::NoInvoker)?;
        let tracker = self.tracker.ok_or(EngineError::NoTracker)?;
        let ledger = self.ledger.ok_or(EngineError::NoLedger)?;

        info!(
            total_chunks = tracker.total_chunks(),
            remaining_chunks = tracker.remaining_chunks(),
            remaining_tokens = ledger.remaining(),
            model = invoker.model_version(),
            "[ORCHESTRATOR] Ready"
        );

        Ok(ChunkOrchestrator {
            prompt,
            invoker,
            tracker,
            ledger,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one chunk at a time through the model.
pub struct ChunkOrchestrator {
    prompt: String,
    invoker: ResilientInvoker,
    tracker: ChunkTracker,
    ledger: TokenLedger,
}

impl ChunkOrchestrator {
    pub fn builder() -> ChunkOrchestratorBuilder {
        ChunkOrchestratorBuilder::default()
    }

    /// Loads the checkpoint named by `config` and wires retry, budget and
    /// cancellation from it.
    pub fn from_config(
        config: &EngineConfig,
        prompt: impl Into<String>,
        model: impl ModelInvoker + 'static,
        table: ClassificationTable,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let tracker = ChunkTracker::load(&config.checkpoint_path)?;
        let invoker = ResilientInvoker::new(model, table, config.retry.clone())
            .with_cancellation(tracker.control().cancellation_token());

        Self::builder()
            .prompt(prompt)
            .invoker(invoker)
            .tracker(tracker)
            .ledger(TokenLedger::new(config.token_budget))
            .build()
    }

    /// Processes the next unprocessed chunk, performing one full
    /// request, budget check and checkpoint write before returning.
    pub async fn process_next(&mut self) -> ProcessResult {
        match self.advance(None).await {
            Ok(result) => result,
            Err(e) => ProcessResult::UnexpectedError {
                cause: UnexpectedCause::Engine(e),
            },
        }
    }

    /// Like [`process_next`](Self::process_next), but hands the result rows
    /// to `sink` before the chunk is committed.
    ///
    /// # Errors
    ///
    /// Returns the sink's error when it rejects the rows. The chunk is then
    /// left unprocessed and the token debit is undone, so a later run
    /// delivers it again.
    pub async fn process_next_into(
        &mut self,
        sink: &dyn ResultSink,
    ) -> Result<ProcessResult, EngineError> {
        self.advance(Some(sink)).await
    }

    async fn advance(&mut self, sink: Option<&dyn ResultSink>) -> Result<ProcessResult, EngineError> {
        let Some(chunk) = self.tracker.next_unprocessed() else {
            info!("[ORCHESTRATOR] No more chunks");
            return Ok(ProcessResult::NoMoreChunks);
        };
        let chunk_id = chunk.chunk_id;
        debug!(chunk_id = %chunk_id, rows = chunk.rows.len(), "[ORCHESTRATOR] Invoking model");

        let response = match self.invoker.invoke(&self.prompt, &chunk).await {
            Ok(response) => response,
            Err(InvokeError::RetryableExhausted { attempts, last })
            | Err(InvokeError::Cancelled { attempts, last }) => {
                warn!(chunk_id = %chunk_id, attempts, code = %last.code, "[ORCHESTRATOR] Chunk left for retry");
                return Ok(ProcessResult::RetryableError {
                    cause: last,
                    attempts,
                });
            }
            Err(InvokeError::Fatal(cause)) => {
                warn!(chunk_id = %chunk_id, code = %cause.code, "[ORCHESTRATOR] Fatal model error");
                return Ok(ProcessResult::FatalError { cause });
            }
            Err(InvokeError::Unexpected(fault)) => {
                warn!(chunk_id = %chunk_id, code = %fault.code, "[ORCHESTRATOR] Unexpected model error");
                return Ok(ProcessResult::UnexpectedError {
                    cause: UnexpectedCause::Model(fault),
                });
            }
        };

        let used_tokens = response.tokens_used;
        let ledger_before = self.ledger;
        let remaining_tokens = match self.ledger.try_debit(used_tokens) {
            Ok(remaining) => remaining,
            Err(overdraft) => {
                warn!(
                    chunk_id = %chunk_id,
                    requested = overdraft.requested,
                    remaining = overdraft.remaining,
                    "[ORCHESTRATOR] Token budget exceeded, chunk not committed"
                );
                return Ok(ProcessResult::TokenBudgetExceeded {
                    requested: overdraft.requested,
                    remaining: overdraft.remaining,
                });
            }
        };

        let result = ProcessResult::Success {
            response: response.text,
            chunk_id,
            remaining_tokens,
            used_tokens,
            chunk,
        };

        if let Some(sink) = sink {
            let rows = result.result_rows(&self.prompt, self.invoker.model_version());
            if !rows.is_empty() {
                if let Err(e) = sink.save(&rows).await {
                    self.ledger = ledger_before;
                    warn!(chunk_id = %chunk_id, error = %e, "[ORCHESTRATOR] Sink rejected rows, chunk not committed");
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.tracker.commit(chunk_id) {
            self.ledger = ledger_before;
            warn!(chunk_id = %chunk_id, error = %e, "[ORCHESTRATOR] Commit failed");
            return Ok(ProcessResult::UnexpectedError {
                cause: UnexpectedCause::Engine(e),
            });
        }

        info!(
            chunk_id = %chunk_id,
            used_tokens,
            remaining_tokens,
            remaining_chunks = self.tracker.remaining_chunks(),
            "[ORCHESTRATOR] Chunk processed"
        );

        Ok(result)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model_version(&self) -> &str {
        self.invoker.model_version()
    }

    pub fn tracker(&self) -> &ChunkTracker {
        &self.tracker
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// The tracker's pause/resume/stop handle.
    pub fn control(&self) -> RunControl {
        self.tracker.control()
    }
}
