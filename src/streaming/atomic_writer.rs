//! Atomic file writers with automatic cleanup on failure.
//!
//! Writes go to a temporary file in the same directory as the destination,
//! which then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is removed, so a reader only ever
//! sees the old complete file or the new complete file.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::EngineError;

/// An atomic file writer that never leaves a partial artifact behind.
pub struct AtomicFileWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates a new atomic writer targeting the specified path.
    ///
    /// Missing parent directories are created. The temporary file lives next
    /// to `final_path` so the final rename stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::IoFailure` if the parent directory cannot be
    /// determined or created, or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if final_path.file_name().is_some() => {
                if p.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    p
                }
            }
            _ => {
                return Err(EngineError::IoFailure(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        std::fs::create_dir_all(parent_dir).map_err(|e| {
            EngineError::IoFailure(format!(
                "Failed to create directory {}: {}",
                parent_dir.display(),
                e
            ))
        })?;

        let temp_file = NamedTempFile::new_in(parent_dir).map_err(|e| {
            EngineError::IoFailure(format!("Failed to create temporary file: {}", e))
        })?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    /// Returns a mutable reference to the buffered temporary file.
    pub fn writer_mut(&mut self) -> &mut BufWriter<NamedTempFile> {
        &mut self.writer
    }

    /// Returns the destination path.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes, syncs and atomically persists the file to the final path.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::IoFailure` if flushing, syncing or persisting
    /// fails. On error the temporary file is cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, EngineError> {
        let named_temp = self.writer.into_inner().map_err(|e| {
            EngineError::IoFailure(format!("Failed to flush buffer: {}", e.error()))
        })?;

        named_temp
            .as_file()
            .sync_all()
            .map_err(|e| EngineError::IoFailure(format!("Failed to sync temporary file: {}", e)))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            EngineError::IoFailure(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

/// Serializes `value` as pretty-printed JSON and atomically replaces `path`.
///
/// If serialization fails halfway, the destination is left untouched.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<PathBuf, EngineError> {
    let mut writer = AtomicFileWriter::new(path)?;

    serde_json::to_writer_pretty(writer.writer_mut(), value)
        .map_err(|e| EngineError::IoFailure(format!("Failed to serialize JSON: {}", e)))?;

    writer
        .writer_mut()
        .write_all(b"\n")
        .map_err(|e| EngineError::IoFailure(format!("Failed to write JSON: {}", e)))?;

    writer.finish()
}

/// An atomic CSV writer built on [`AtomicFileWriter`].
pub struct AtomicCsvWriter {
    writer: Writer<AtomicFileWriter>,
}

impl AtomicCsvWriter {
    /// Creates a new atomic CSV writer targeting the specified path.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let inner = AtomicFileWriter::new(final_path)?;
        Ok(Self {
            writer: Writer::from_writer(inner),
        })
    }

    /// Returns a mutable reference to the underlying CSV writer.
    pub fn writer_mut(&mut self) -> &mut Writer<AtomicFileWriter> {
        &mut self.writer
    }

    /// Flushes the CSV writer and atomically persists the file.
    pub fn finish(self) -> Result<PathBuf, EngineError> {
        let inner = self.writer.into_inner().map_err(|e| {
            EngineError::IoFailure(format!("Failed to flush CSV writer: {}", e.error()))
        })?;
        inner.finish()
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
