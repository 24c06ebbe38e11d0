//! Token-aware chunk sizing.
//!
//! Estimates how many rows fit in one request from the prompt, a sample row
//! and a sample single-row response, against a conservative per-model token
//! limit.

use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

use crate::checkpoint::Row;
use crate::error::EngineError;
use crate::model::format_row;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Conservative prompt limits by model family, matched as substrings of the
/// lowercased model name. The longest matching family wins.
pub const SAFE_PROMPT_LIMITS: &[(&str, usize)] = &[
    ("gemini-1.5", 100_000),
    ("gemini-2.0", 50_000),
    ("gemini-2.5", 100_000),
    ("learnlm-2.0", 50_000),
    ("gemma-3", 4_000),
    ("gpt-4", 6_000),
    ("gpt-4-32k", 24_000),
    ("gpt-4o", 100_000),
    ("gpt-3.5", 3_000),
    ("gpt-3.5-16k", 12_000),
    ("gpt-3.5-turbo-16k", 12_000),
    ("gpt-3.5-32k", 24_000),
    ("gpt-3.5-turbo-32k", 24_000),
];

/// Limit for models not listed in [`SAFE_PROMPT_LIMITS`].
pub const DEFAULT_SAFE_LIMIT: usize = 32_000;

/// Share of the safe limit a chunk may use by default.
pub const DEFAULT_USAGE_RATIO: f64 = 0.8;

/// Upper bound on suggested rows per chunk.
pub const MAX_SUGGESTED_ROWS: usize = 100;

/// Suggested when the per-row cost cannot be measured.
pub const FALLBACK_ROWS: usize = 10;

/// Safe prompt limit for `model`.
pub fn safe_token_limit(model: &str) -> usize {
    let model = model.to_lowercase();
    SAFE_PROMPT_LIMITS
        .iter()
        .filter(|(family, _)| model.contains(family))
        .max_by_key(|(family, _)| family.len())
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_SAFE_LIMIT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Counting
// ─────────────────────────────────────────────────────────────────────────────

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// BPE counter from `tiktoken-rs`.
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    /// Uses the model's own encoding when known, `cl100k_base` otherwise.
    pub fn for_model(model: &str) -> Result<Self, EngineError> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => tiktoken_rs::cl100k_base().map_err(|e| {
                EngineError::Internal(format!("Failed to load token encoding: {}", e))
            })?,
        };
        Ok(Self { bpe })
    }
}

impl std::fmt::Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenCounter").finish_non_exhaustive()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk Sizer
// ─────────────────────────────────────────────────────────────────────────────

/// Estimates chunk sizes and token costs for one model.
pub struct ChunkSizer {
    counter: Box<dyn TokenCounter>,
    model_limit: usize,
    usage_ratio: f64,
}

impl ChunkSizer {
    /// BPE counting with the model's safe limit.
    pub fn for_model(model: &str) -> Result<Self, EngineError> {
        Ok(Self::with_counter(
            BpeTokenCounter::for_model(model)?,
            safe_token_limit(model),
        ))
    }

    pub fn with_counter(counter: impl TokenCounter + 'static, model_limit: usize) -> Self {
        Self {
            counter: Box::new(counter),
            model_limit,
            usage_ratio: DEFAULT_USAGE_RATIO,
        }
    }

    /// Clamped to `0.0..=1.0`.
    pub fn usage_ratio(mut self, ratio: f64) -> Self {
        self.usage_ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self
    }

    pub fn model_limit(&self) -> usize {
        self.model_limit
    }

    /// Rows per chunk that keep prompt plus rows plus answers within the
    /// usable share of the limit. Always between 1 and [`MAX_SUGGESTED_ROWS`].
    pub fn suggest_rows(&self, prompt: &str, sample_row: &Row, example_response: &str) -> usize {
        let usable = (self.model_limit as f64 * self.usage_ratio) as usize;
        let prompt_tokens = self.counter.count(prompt.trim());
        let per_row = self.row_tokens(sample_row, example_response);

        if per_row == 0 {
            warn!("[SPLITTER] Could not measure row cost, using {} rows", FALLBACK_ROWS);
            return FALLBACK_ROWS;
        }

        let rows = (usable.saturating_sub(prompt_tokens) / per_row).clamp(1, MAX_SUGGESTED_ROWS);
        debug!(usable, prompt_tokens, per_row, rows, "[SPLITTER] Suggested chunk size");
        rows
    }

    /// Estimated tokens for one chunk of `rows` rows.
    pub fn chunk_tokens(
        &self,
        prompt: &str,
        sample_row: &Row,
        example_response: &str,
        rows: usize,
    ) -> usize {
        self.counter.count(prompt.trim()) + self.row_tokens(sample_row, example_response) * rows
    }

    /// How many chunks of `rows_per_chunk` rows fit in `token_quota`.
    pub fn max_chunks(
        &self,
        prompt: &str,
        sample_row: &Row,
        example_response: &str,
        rows_per_chunk: usize,
        token_quota: u64,
    ) -> u64 {
        match self.chunk_tokens(prompt, sample_row, example_response, rows_per_chunk) {
            0 => 0,
            per_chunk => token_quota / per_chunk as u64,
        }
    }

    fn row_tokens(&self, sample_row: &Row, example_response: &str) -> usize {
        self.counter.count(&format_row(1, sample_row)) + self.counter.count(example_response)
    }
}

/// One-shot form of [`ChunkSizer::suggest_rows`].
pub fn suggest_chunk_size(
    counter: impl TokenCounter + 'static,
    prompt: &str,
    sample_row: &Row,
    example_response: &str,
    model_limit: usize,
    usage_ratio: f64,
) -> usize {
    ChunkSizer::with_counter(counter, model_limit)
        .usage_ratio(usage_ratio)
        .suggest_rows(prompt, sample_row, example_response)
}
