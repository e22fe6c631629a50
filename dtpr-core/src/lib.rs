//! dtpr-core: Event model and schema-driven particle construction.
//!
//! This crate provides the attribute value types, particles, events, the
//! expression language used by run configurations, the callable registry,
//! and the lazy event list that ties a record source to a pipeline.
//!

pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod event_list;
pub mod expr;
pub mod particle;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod value;

pub use builder::{default_particle_name, EventSchema, ParticleBuilder};
pub use config::{
    parse_kwargs, Amount, AttributeConfig, AttributeSpec, Kwargs, OrderedTable, ParticleTypeConfig,
    RunConfig, SorterConfig, StageConfig,
};
pub use error::{Error, Result};
pub use event::{Assignment, Event};
pub use event_list::{EventList, EventSlice, DEFAULT_CHUNK_SIZE};
pub use expr::{Expression, Scope};
pub use particle::{Particle, IDENTITY_FIELDS};
pub use pipeline::{Pipeline, Preprocessor, Selector};
pub use record::{Column, MemorySource, Record, RecordSource};
pub use registry::{AttributeFn, FinalizeFn, ParticleClass, Registry};
pub use value::{Coercion, ParticleRef, Scalar, Value};
