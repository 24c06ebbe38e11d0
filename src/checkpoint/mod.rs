//! Durable chunk checkpoints: the file format, the tracker that owns a file
//! during a run, and read-only inspection helpers.

mod format;
mod inspector;
mod tracker;

pub use format::{Checkpoint, CheckpointSummary, Chunk, Row, CHECKPOINT_VERSION, SOURCE_ID_COLUMN};
pub use inspector::{find_resumable, inspect, CheckpointInfo};
pub use tracker::ChunkTracker;
