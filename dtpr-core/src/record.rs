//! Record sources.
//!
//! A record is one detector readout: a set of named columns. Columns are
//! either event-level scalars, per-particle vectors, or per-particle vectors
//! of vectors.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::value::{Scalar, Value};

/// One named column of a record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Scalar(Scalar),
    Vector(Vec<Scalar>),
    Nested(Vec<Vec<Scalar>>),
}

impl Column {
    /// Number of particles described by this column. Scalars count as one
    /// value, so callers that need a multiplicity read scalars explicitly.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(_) => 1,
            Column::Vector(v) => v.len(),
            Column::Nested(v) => v.len(),
        }
    }

    /// Returns true if this is an empty vector column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The per-particle value at `index`.
    ///
    /// Scalars are returned as they are, vectors are indexed and nested
    /// vectors yield the whole inner sequence.
    ///
    /// # Errors
    /// Returns [`Error::ColumnIndex`] when `index` is beyond the column.
    pub fn value_at(&self, name: &str, index: usize) -> Result<Value> {
        let out_of_range = |len| Error::ColumnIndex {
            column: name.to_string(),
            index,
            len,
        };
        match self {
            Column::Scalar(s) => Ok(Value::Scalar(s.clone())),
            Column::Vector(v) => v
                .get(index)
                .cloned()
                .map(Value::Scalar)
                .ok_or_else(|| out_of_range(v.len())),
            Column::Nested(v) => v
                .get(index)
                .cloned()
                .map(Value::List)
                .ok_or_else(|| out_of_range(v.len())),
        }
    }
}

/// One detector readout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Record {
    columns: HashMap<String, Column>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Adds a scalar column, builder style.
    #[must_use]
    pub fn with_scalar(self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.with(name, Column::Scalar(value.into()))
    }

    /// Adds a vector column, builder style.
    #[must_use]
    pub fn with_vector<T: Into<Scalar>>(
        self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        self.with(
            name,
            Column::Vector(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Inserts or replaces a column.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) {
        self.columns.insert(name.into(), column);
    }

    /// Looks up a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Iterates over column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the record has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A random-access source of records.
///
/// Record `i` must always be the same record no matter how many accesses
/// happened before; implementations hold no cursor.
pub trait RecordSource: Send + Sync {
    /// Number of records.
    fn len(&self) -> usize;

    /// Reads record `index`.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read or decoded.
    fn record(&self, index: usize) -> Result<Record>;

    /// Returns true if the source has no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward iteration over every record in order.
    fn records(&self) -> Records<'_, Self>
    where
        Self: Sized,
    {
        Records {
            source: self,
            next: 0,
        }
    }
}

impl dyn RecordSource {
    /// Forward iteration over a type-erased source.
    pub fn iter(&self) -> Records<'_, dyn RecordSource> {
        Records {
            source: self,
            next: 0,
        }
    }
}

/// Forward iterator over a [`RecordSource`].
pub struct Records<'a, S: ?Sized> {
    source: &'a S,
    next: usize,
}

impl<S: RecordSource + ?Sized> Iterator for Records<'_, S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.len() {
            return None;
        }
        let record = self.source.record(self.next);
        self.next += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// In-memory record source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    /// Creates a source from records.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Appends a record.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }
}

impl FromIterator<Record> for MemorySource {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl RecordSource for MemorySource {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn record(&self, index: usize) -> Result<Record> {
        self.records.get(index).cloned().ok_or_else(|| {
            Error::Source(format!(
                "record {index} out of range for {} records",
                self.records.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_at() {
        let scalar = Column::Scalar(Scalar::Int(7));
        assert_eq!(scalar.value_at("n", 3).unwrap(), Value::from(7));

        let vector = Column::Vector(vec![Scalar::Float(0.5), Scalar::Float(1.5)]);
        assert_eq!(vector.value_at("pt", 1).unwrap(), Value::from(1.5));
        assert!(matches!(
            vector.value_at("pt", 2),
            Err(Error::ColumnIndex { len: 2, .. })
        ));

        let nested = Column::Nested(vec![vec![Scalar::Int(1), Scalar::Int(2)], vec![]]);
        assert_eq!(
            nested.value_at("profile", 0).unwrap(),
            Value::List(vec![Scalar::Int(1), Scalar::Int(2)])
        );
        assert_eq!(nested.value_at("profile", 1).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_record_deserialize() {
        let record: Record = serde_json::from_str(
            r#"{"event_eventNumber": 12, "gen_pt": [10.5, 20.0], "profile": [[1, 2], [3]], "tag": "mc"}"#,
        )
        .unwrap();
        assert_eq!(record.len(), 4);
        assert!(matches!(
            record.column("event_eventNumber"),
            Some(Column::Scalar(Scalar::Int(12)))
        ));
        assert!(matches!(record.column("gen_pt"), Some(Column::Vector(v)) if v.len() == 2));
        assert!(matches!(record.column("profile"), Some(Column::Nested(v)) if v.len() == 2));
    }

    #[test]
    fn test_memory_source_iteration() {
        let source: MemorySource = (0..3)
            .map(|i| Record::new().with_scalar("i", i64::from(i)))
            .collect();
        let seen: Vec<_> = source
            .records()
            .map(|r| r.unwrap().column("i").cloned())
            .collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], Some(Column::Scalar(Scalar::Int(2))));
        assert!(source.record(3).is_err());
    }
}
