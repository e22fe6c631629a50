//! Memory-mapped JSON-lines partitions.
//!

use crate::{Error, Result};
use dtpr_core::{Record, RecordSource};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One record per line, read on demand from a memory-mapped file.
///
/// Opening a partition only indexes line boundaries; record `i` is parsed
/// when it is requested, without touching the records before it.
#[derive(Clone)]
pub struct JsonlPartition {
    mmap: Arc<Mmap>,
    path: PathBuf,
    /// Byte range and 1-based line number of every non-blank line.
    lines: Vec<(Range<usize>, usize)>,
}

impl JsonlPartition {
    /// Maps a partition file and indexes its records.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        let lines = index_lines(&mmap);
        log::debug!(
            "indexed {} records in {}",
            lines.len(),
            path.as_ref().display()
        );
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
            lines,
        })
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes of record `index`, without the line terminator.
    #[must_use]
    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        self.lines
            .get(index)
            .map(|(range, _)| &self.mmap[range.clone()])
    }

    /// Parses record `index`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for an index past the end and
    /// [`Error::Json`] for a line that is not a record object.
    pub fn read(&self, index: usize) -> Result<Record> {
        let (range, line) = self.lines.get(index).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "record {index} out of range for {} records in {}",
                self.lines.len(),
                self.path.display()
            ))
        })?;
        serde_json::from_slice(&self.mmap[range.clone()]).map_err(|source| Error::Json {
            path: self.path.clone(),
            line: *line,
            source,
        })
    }
}

impl RecordSource for JsonlPartition {
    fn len(&self) -> usize {
        self.lines.len()
    }

    fn record(&self, index: usize) -> dtpr_core::Result<Record> {
        Ok(self.read(index)?)
    }
}

fn index_lines(data: &[u8]) -> Vec<(Range<usize>, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (n, chunk) in data.split(|&b| b == b'\n').enumerate() {
        let end = start + chunk.len();
        let trimmed = chunk.strip_suffix(b"\r").unwrap_or(chunk);
        if !trimmed.iter().all(u8::is_ascii_whitespace) {
            lines.push((start..start + trimmed.len(), n + 1));
        }
        start = end + 1;
    }
    lines
}

impl std::fmt::Debug for JsonlPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlPartition")
            .field("path", &self.path)
            .field("records", &self.lines.len())
            .finish()
    }
}
