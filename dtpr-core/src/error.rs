//! Error types for dtpr-core.

use thiserror::Error;

/// Result type alias for dtpr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for dtpr operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or ambiguous configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A dotted identifier that is not present in the registry.
    #[error("unresolved {kind} '{path}'")]
    UnresolvedPath { kind: &'static str, path: String },

    /// Expression that failed to parse or validate.
    #[error("invalid expression '{expr}': {message}")]
    Expression { expr: String, message: String },

    /// Expression that failed while being evaluated.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Column absent from a record.
    #[error("column '{column}' not found in record {record}")]
    MissingColumn { column: String, record: usize },

    /// Per-particle index beyond the length of a vector column.
    #[error("index {index} out of range for column '{column}' of length {len}")]
    ColumnIndex {
        column: String,
        index: usize,
        len: usize,
    },

    /// Value that cannot be converted to the requested type.
    #[error("cannot convert attribute '{attribute}' value {value} to {target}")]
    Coercion {
        attribute: String,
        target: &'static str,
        value: String,
    },

    /// Attribute absent from a particle.
    #[error("{particle} has no attribute '{attribute}'")]
    MissingAttribute { particle: String, attribute: String },

    /// Attribute present but holding an unexpected kind of value.
    #[error("attribute '{attribute}' of {particle} is not {expected}")]
    AttributeType {
        particle: String,
        attribute: String,
        expected: &'static str,
    },

    /// Particle collection required by an algorithm is absent.
    #[error("event has no '{0}' particles")]
    MissingCollection(String),

    /// Reference that does not point at an existing particle.
    #[error("dangling reference to {collection}[{position}]")]
    DanglingRef { collection: String, position: usize },

    /// Unknown attribute used as a filter constraint.
    #[error("invalid keys to filter '{key}'. Valid keys are: {}", .valid.join(", "))]
    InvalidFilterKey { key: String, valid: Vec<String> },

    /// Event index outside of the list.
    #[error("event index {index} out of range for {len} events")]
    EventIndex { index: isize, len: usize },

    /// Slice step of zero.
    #[error("slice step cannot be zero")]
    ZeroStep,

    /// Failure inside the record source.
    #[error("record source error: {0}")]
    Source(String),

    /// Failure inside a named pipeline stage.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps an error with the name of the pipeline stage that raised it.
    #[must_use]
    pub fn in_stage(self, stage: &str) -> Self {
        Error::Stage {
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns true for errors that are detected before any record is read.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::UnresolvedPath { .. } | Error::Expression { .. }
        )
    }
}
