//! Chunked, checkpointed processing of tabular data through a generative model.
//!
//! A table is split into fixed-size chunks and written to a versioned
//! checkpoint. A [`ChunkOrchestrator`] then feeds one chunk at a time through
//! a [`ResilientInvoker`], charges a [`TokenLedger`], and marks the chunk done
//! in the checkpoint only after the response fits the budget. Runs can be
//! paused, stopped, or killed and resumed later from the same file.

pub mod checkpoint;
pub mod config;
pub mod control;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod streaming;

pub use checkpoint::{find_resumable, inspect, Checkpoint, CheckpointInfo, Chunk, ChunkTracker, Row};
pub use config::{EngineConfig, ModelSettings, RetryPolicy};
pub use control::{RunControl, RunState};
pub use dataset::{CsvDataset, DatasetProvider, InMemoryDataset};
pub use engine::{
    run_chunks, ChunkOrchestrator, ProcessResult, RunLimits, RunReport, StopReason, TokenLedger,
};
pub use error::{EngineError, ErrorPresentation};
pub use model::{
    ClassificationTable, FaultCode, GeminiInvoker, ModelFault, ModelInvoker, ModelResponse,
    ResilientInvoker,
};
pub use storage::{export_csv, MemoryResultSink, ResultRow, ResultSink, SqliteResultSink};
pub use streaming::{suggest_chunk_size, ChunkSize, ChunkSizer, ChunkSplitter, TokenCounter};
