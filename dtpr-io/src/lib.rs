//! dtpr-io: Memory-mapped partitions and run-config loading for dtpr.
//!
//! This crate reads JSON-lines ntuple partitions through memmap2, chains
//! them into one record source, loads layered YAML run configurations and
//! bundles both into an [`NTuple`].
//!

pub mod config;
mod chain;
mod error;
mod ntuple;
mod reader;
pub mod scanner;
mod writer;

pub use chain::RecordChain;
pub use config::{load_document, load_run_config};
pub use error::{Error, Result};
pub use ntuple::{NTuple, NTupleBuilder};
pub use reader::JsonlPartition;
pub use scanner::{natural_cmp, PartitionScanner, DEFAULT_EXTENSION};
pub use writer::EventWriter;
