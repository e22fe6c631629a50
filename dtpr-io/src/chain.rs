//! Several partitions read as one logical record source.

use std::path::Path;

use dtpr_core::{Record, RecordSource};

use crate::reader::JsonlPartition;
use crate::{Error, Result};

/// Ordered concatenation of partitions.
///
/// Global record `i` maps to the partition whose cumulative range covers it;
/// lookups are a binary search over partition end offsets.
#[derive(Debug, Default, Clone)]
pub struct RecordChain {
    partitions: Vec<JsonlPartition>,
    ends: Vec<usize>,
}

impl RecordChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` and appends it.
    ///
    /// # Errors
    /// Returns an error if the partition cannot be opened.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let partition = JsonlPartition::open(&path)?;
        log::info!(
            "Added partition {} ({} records)",
            path.as_ref().display(),
            partition.len()
        );
        Ok(self.push(partition))
    }

    /// Appends an already opened partition and returns its record count.
    pub fn push(&mut self, partition: JsonlPartition) -> usize {
        let count = partition.len();
        let end = self.ends.last().copied().unwrap_or(0) + count;
        self.partitions.push(partition);
        self.ends.push(end);
        count
    }

    /// The chained partitions, in order.
    #[must_use]
    pub fn partitions(&self) -> &[JsonlPartition] {
        &self.partitions
    }

    /// Partition number and local index of global record `index`.
    #[must_use]
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        let partition = self.ends.partition_point(|&end| end <= index);
        let end = *self.ends.get(partition)?;
        let start = end - self.partitions[partition].len();
        Some((partition, index - start))
    }
}

impl RecordSource for RecordChain {
    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn record(&self, index: usize) -> dtpr_core::Result<Record> {
        let (partition, local) = self.locate(index).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "record {index} out of range for {} chained records",
                self.len()
            ))
        })?;
        self.partitions[partition].record(local)
    }
}
