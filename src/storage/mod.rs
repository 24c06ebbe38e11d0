//! Storage for model results: the sink trait, SQLite and in-memory sinks,
//! and CSV export.

mod export;
mod results;

pub use export::export_csv;
pub use results::{MemoryResultSink, ResultRow, ResultSink, SqliteResultSink};
