//! The model capability the engine depends on, and the retrying wrapper
//! around it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::fault::{ClassificationTable, FaultClass, ModelFault};
use crate::checkpoint::Chunk;
use crate::config::RetryPolicy;

// ─────────────────────────────────────────────────────────────────────────────
// Model Capability
// ─────────────────────────────────────────────────────────────────────────────

/// Text and token usage returned by one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub tokens_used: u64,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// One backend that can answer a prompt about a chunk.
///
/// Implementations report every failure as a [`ModelFault`]; classification
/// is left to the [`ClassificationTable`] the caller supplies.
pub trait ModelInvoker: Send + Sync {
    fn invoke<'a>(
        &'a self,
        prompt: &'a str,
        chunk: &'a Chunk,
    ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelFault>> + Send + 'a>>;

    /// Model identifier recorded with each result row.
    fn model_version(&self) -> &str {
        "unknown"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invoke Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a resilient invocation produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("Model call still failing after {attempts} attempts: {last}")]
    RetryableExhausted { attempts: u32, last: ModelFault },

    #[error("Model call failed: {0}")]
    Fatal(ModelFault),

    #[error("Unexpected model failure: {0}")]
    Unexpected(ModelFault),

    #[error("Model call cancelled during backoff after {attempts} attempts: {last}")]
    Cancelled { attempts: u32, last: ModelFault },
}

// ─────────────────────────────────────────────────────────────────────────────
// Resilient Invoker
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a [`ModelInvoker`] with classification and bounded backoff retry.
pub struct ResilientInvoker {
    inner: Box<dyn ModelInvoker>,
    table: ClassificationTable,
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl ResilientInvoker {
    pub fn new(
        inner: impl ModelInvoker + 'static,
        table: ClassificationTable,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Box::new(inner),
            table,
            policy,
            cancel: None,
        }
    }

    /// Lets backoff sleeps end early when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    /// Calls the model, retrying retryable faults up to `max_attempts` total calls.
    ///
    /// Fatal and unclassified faults return after the attempt that raised
    /// them, without consuming further attempts.
    pub async fn invoke(&self, prompt: &str, chunk: &Chunk) -> Result<ModelResponse, InvokeError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            let fault = match self.inner.invoke(prompt, chunk).await {
                Ok(response) => {
                    if attempt > 1 {
                        info!(
                            chunk_id = %chunk.chunk_id,
                            attempt,
                            "[INVOKER] Model call succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(fault) => fault,
            };

            match self.table.classify(&fault.code) {
                FaultClass::Fatal => {
                    warn!(chunk_id = %chunk.chunk_id, code = %fault.code, "[INVOKER] Fatal fault, not retrying");
                    return Err(InvokeError::Fatal(fault));
                }
                FaultClass::Unexpected => {
                    warn!(chunk_id = %chunk.chunk_id, code = %fault.code, "[INVOKER] Unclassified fault");
                    return Err(InvokeError::Unexpected(fault));
                }
                FaultClass::Retryable if attempt >= max_attempts => {
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        code = %fault.code,
                        attempts = attempt,
                        "[INVOKER] Retries exhausted"
                    );
                    return Err(InvokeError::RetryableExhausted {
                        attempts: attempt,
                        last: fault,
                    });
                }
                FaultClass::Retryable => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        code = %fault.code,
                        "[INVOKER] Attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    if !self.sleep(delay).await {
                        info!(chunk_id = %chunk.chunk_id, "[INVOKER] Backoff cancelled");
                        return Err(InvokeError::Cancelled {
                            attempts: attempt,
                            last: fault,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Sleeps for `delay`; returns false if cancelled first.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FaultCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    // ─────────────────────────────────────────────────────────────────────────
    // Fake Model
    // ─────────────────────────────────────────────────────────────────────────

    /// Fails with `fault` for the first `failures` calls, then answers.
    struct ScriptedModel {
        calls: Arc<AtomicUsize>,
        failures: usize,
        fault: ModelFault,
    }

    impl ScriptedModel {
        fn new(failures: usize, code: FaultCode) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let model = Self {
                calls: calls.clone(),
                failures,
                fault: ModelFault::new(code, "scripted failure"),
            };
            (model, calls)
        }
    }

    impl ModelInvoker for ScriptedModel {
        fn invoke<'a>(
            &'a self,
            _prompt: &'a str,
            _chunk: &'a Chunk,
        ) -> Pin<Box<dyn Future<Output = Result<ModelResponse, ModelFault>> + Send + 'a>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    Err(self.fault.clone())
                } else {
                    Ok(ModelResponse::new("ok", 7))
                }
            })
        }

        fn model_version(&self) -> &str {
            "scripted-1"
        }
    }

    fn empty_chunk() -> Chunk {
        Chunk {
            chunk_id: Uuid::new_v4(),
            rows: Vec::new(),
            original_row_count: 0,
        }
    }

    fn resilient(model: ScriptedModel, policy: RetryPolicy) -> ResilientInvoker {
        ResilientInvoker::new(model, ClassificationTable::gemini(), policy)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retry Policy
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn retryable_faults_below_limit_eventually_succeed() {
        for failures in 0..3usize {
            let (model, calls) = ScriptedModel::new(failures, FaultCode::ServiceUnavailable);
            let invoker = resilient(model, RetryPolicy::immediate(3));

            let response = invoker.invoke("p", &empty_chunk()).await.unwrap();

            assert_eq!(response, ModelResponse::new("ok", 7));
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
    }

    #[tokio::test]
    async fn persistent_retryable_fault_stops_at_max_attempts() {
        let (model, calls) = ScriptedModel::new(usize::MAX, FaultCode::Timeout);
        let invoker = resilient(model, RetryPolicy::immediate(4));

        let err = invoker.invoke("p", &empty_chunk()).await.unwrap_err();

        match err {
            InvokeError::RetryableExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.code, FaultCode::Timeout);
            }
            other => panic!("Expected RetryableExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_fault_fails_on_first_call_unchanged() {
        let (model, calls) = ScriptedModel::new(usize::MAX, FaultCode::Unauthenticated);
        let expected = model.fault.clone();
        let invoker = resilient(model, RetryPolicy::immediate(5));

        let err = invoker.invoke("p", &empty_chunk()).await.unwrap_err();

        assert_eq!(err, InvokeError::Fatal(expected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unclassified_fault_fails_on_first_call() {
        let (model, calls) = ScriptedModel::new(usize::MAX, FaultCode::Other("http_418".into()));
        let invoker = resilient(model, RetryPolicy::immediate(5));

        let err = invoker.invoke("p", &empty_chunk()).await.unwrap_err();

        assert!(matches!(err, InvokeError::Unexpected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn swapped_table_changes_retry_decision() {
        // RateLimited is unexpected for Gemini but retryable for OpenAI
        let (model, calls) = ScriptedModel::new(1, FaultCode::RateLimited);
        let invoker = ResilientInvoker::new(model, ClassificationTable::openai(), RetryPolicy::immediate(3));

        assert!(invoker.invoke("p", &empty_chunk()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Backoff Timing
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let (model, _calls) = ScriptedModel::new(2, FaultCode::Aborted);
        let invoker = resilient(model, RetryPolicy::default());

        let start = tokio::time::Instant::now();
        invoker.invoke("p", &empty_chunk()).await.unwrap();

        // 2s after attempt 1, 4s after attempt 2
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let (model, calls) = ScriptedModel::new(usize::MAX, FaultCode::Connection);
        let token = CancellationToken::new();
        let invoker = resilient(model, RetryPolicy::default().max_delay(Duration::from_secs(600)))
            .with_cancellation(token.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        };
        let chunk = empty_chunk();
        let (result, ()) = tokio::join!(invoker.invoke("p", &chunk), canceller);

        match result {
            Err(InvokeError::Cancelled { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert_eq!(last.code, FaultCode::Connection);
            }
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exposes_model_version() {
        let (model, _) = ScriptedModel::new(0, FaultCode::Timeout);
        assert_eq!(resilient(model, RetryPolicy::default()).model_version(), "scripted-1");
    }
}
