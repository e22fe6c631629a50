//! Partition discovery.
//!
//! Walks an input path recursively, keeps files with the partition
//! extension and orders them with a numeric-aware sort so `file_2`
//! precedes `file_10`.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Result;

/// Default partition file extension.
pub const DEFAULT_EXTENSION: &str = "jsonl";

/// Scanner for partition files under an input path.
#[derive(Debug, Clone)]
pub struct PartitionScanner {
    extension: String,
    max_files: Option<usize>,
}

impl Default for PartitionScanner {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            max_files: None,
        }
    }
}

impl PartitionScanner {
    /// Creates a scanner for `.jsonl` partitions without a file cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition extension, without the leading dot.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Caps the number of partitions returned.
    #[must_use]
    pub fn with_max_files(mut self, max_files: Option<usize>) -> Self {
        self.max_files = max_files;
        self
    }

    /// The partition cap, if any.
    #[must_use]
    pub fn max_files(&self) -> Option<usize> {
        self.max_files
    }

    /// Lists the partitions under `path`.
    ///
    /// A path naming a file is returned as is, whatever its extension.
    ///
    /// # Errors
    /// Returns an error if `path` or one of its subdirectories cannot be read.
    pub fn scan<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        if fs::metadata(path)?.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut files = Vec::new();
        self.walk(path, &mut files)?;
        files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
        if let Some(max) = self.max_files {
            files.truncate(max);
        }
        Ok(files)
    }

    fn walk(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, files)?;
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
            {
                files.push(path);
            }
        }
        Ok(())
    }
}

/// Compares two strings treating runs of ASCII digits as numbers.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks(a);
    let mut right = Chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let order = match (is_number(x), is_number(y)) {
                    (true, true) => {
                        let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    _ => x.cmp(y),
                };
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
    }
}

fn is_number(chunk: &str) -> bool {
    chunk.as_bytes().first().is_some_and(u8::is_ascii_digit)
}

/// Alternating runs of digits and non-digits.
struct Chunks<'a>(&'a str);

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.0.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(self.0.len());
        let (chunk, rest) = self.0.split_at(end);
        self.0 = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["file_10", "file_2", "file_1", "file_02", "file", "a_3"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec!["a_3", "file", "file_1", "file_02", "file_2", "file_10"]
        );
    }

    #[test]
    fn test_scan_recursive_filtered_and_capped() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("run_2");
        fs::create_dir(&nested).unwrap();
        for name in ["part_10.jsonl", "part_2.jsonl", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::write(nested.join("part_1.jsonl"), "").unwrap();

        let files = PartitionScanner::new().scan(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("part_2.jsonl"),
                PathBuf::from("part_10.jsonl"),
                PathBuf::from("run_2/part_1.jsonl"),
            ]
        );

        let capped = PartitionScanner::new()
            .with_max_files(Some(1))
            .scan(dir.path())
            .unwrap();
        assert_eq!(capped, vec![dir.path().join("part_2.jsonl")]);
    }

    #[test]
    fn test_single_file_used_directly() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("events.txt");
        fs::write(&file, "").unwrap();
        assert_eq!(PartitionScanner::new().scan(&file).unwrap(), vec![file]);
    }

    #[test]
    fn test_missing_path() {
        let dir = TempDir::new().unwrap();
        assert!(PartitionScanner::new()
            .scan(dir.path().join("absent"))
            .is_err());
    }
}
