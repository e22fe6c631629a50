//! JSON-lines dump of built events.

use crate::Result;
use dtpr_core::Event;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes one `Event::to_dict` object per line.
pub struct EventWriter<W: Write = File> {
    writer: BufWriter<W>,
    written: usize,
}

impl EventWriter<File> {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> EventWriter<W> {
    /// Wraps any writer.
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
            written: 0,
        }
    }

    /// Appends one event.
    ///
    /// # Errors
    /// Returns an error if the underlying writer fails.
    pub fn write_event(&mut self, event: &Event) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &event.to_dict()).map_err(std::io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Number of events written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if the underlying writer fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the wrapped writer.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn into_inner(self) -> Result<W> {
        Ok(self
            .writer
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?)
    }
}
