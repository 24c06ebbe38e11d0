//! Chunk processing engine: token accounting, the per-chunk orchestrator
//! and the run loop built on top of it.

mod driver;
mod ledger;
mod orchestrator;
mod result;

pub use driver::{run_chunks, RunLimits, RunReport, StopReason};
pub use ledger::{Overdraft, TokenLedger};
pub use orchestrator::{ChunkOrchestrator, ChunkOrchestratorBuilder};
pub use result::{ProcessResult, UnexpectedCause};
