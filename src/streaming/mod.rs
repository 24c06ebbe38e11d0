//! Streaming utilities for writing chunked datasets.
//!
//! This module sizes and splits in-memory tables into fixed-size, source-id
//! stamped chunks and provides atomic file writing with automatic cleanup on failure.

mod atomic_writer;
mod sizing;
mod splitter;

pub use atomic_writer::{write_json_atomic, AtomicCsvWriter, AtomicFileWriter};
pub use sizing::{
    safe_token_limit, suggest_chunk_size, BpeTokenCounter, ChunkSizer, TokenCounter,
    DEFAULT_SAFE_LIMIT, DEFAULT_USAGE_RATIO, FALLBACK_ROWS, MAX_SUGGESTED_ROWS, SAFE_PROMPT_LIMITS,
};
pub(crate) use splitter::current_timestamp;
pub use splitter::{split, ChunkSize, ChunkSplitter};
