//! Partitions, schema and pipeline bundled into one event list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dtpr_algorithms::builtin_registry;
use dtpr_core::{
    Event, EventList, EventSchema, Pipeline, Preprocessor, RecordSource, Registry, RunConfig,
    Selector,
};

use crate::chain::RecordChain;
use crate::scanner::PartitionScanner;
use crate::Result;

/// An opened ntuple: every partition found under the inputs, read through
/// the configured schema and pipeline.
#[derive(Debug)]
pub struct NTuple {
    files: Vec<PathBuf>,
    chain: Arc<RecordChain>,
    events: EventList,
}

impl NTuple {
    /// Starts building an ntuple for `config`.
    #[must_use]
    pub fn builder(config: RunConfig) -> NTupleBuilder {
        NTupleBuilder::new(config)
    }

    /// Opens every partition under `input` with the built-in registry.
    ///
    /// # Errors
    /// See [`NTupleBuilder::build`].
    pub fn open<P: AsRef<Path>>(input: P, config: RunConfig) -> Result<Self> {
        Self::builder(config).input(input).build()
    }

    /// The lazy event list.
    #[must_use]
    pub fn events(&self) -> &EventList {
        &self.events
    }

    /// Partition files, in reading order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The chained record source.
    #[must_use]
    pub fn chain(&self) -> &RecordChain {
        &self.chain
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Folds every event in parallel over chunks of `chunk_size` indices.
    ///
    /// `combine` must be associative; per-chunk results are merged in index
    /// order.
    ///
    /// # Errors
    /// Propagates the first event build or pipeline error.
    pub fn par_fold<T, I, F, C>(&self, chunk_size: usize, init: I, fold: F, combine: C) -> Result<T>
    where
        T: Send,
        I: Fn() -> T + Sync + Send,
        F: Fn(T, Option<Event>) -> T + Sync + Send,
        C: Fn(T, T) -> T,
    {
        Ok(self.events.par_fold(chunk_size, init, fold, combine)?)
    }
}

/// Builder for [`NTuple`].
///
/// Explicit stages run before the ones listed in the configuration, in the
/// order they were added.
pub struct NTupleBuilder {
    config: RunConfig,
    inputs: Vec<PathBuf>,
    scanner: PartitionScanner,
    registry: Registry,
    preprocessors: Vec<Preprocessor>,
    selectors: Vec<Selector>,
    max_events: Option<usize>,
}

impl NTupleBuilder {
    /// Creates a builder with the built-in registry and no inputs.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            inputs: Vec::new(),
            scanner: PartitionScanner::new(),
            registry: builtin_registry().clone(),
            preprocessors: Vec::new(),
            selectors: Vec::new(),
            max_events: None,
        }
    }

    /// Adds an input file or directory.
    #[must_use]
    pub fn input<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets the partition extension.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.scanner = self.scanner.with_extension(extension);
        self
    }

    /// Caps the number of partitions read, over all inputs.
    #[must_use]
    pub fn max_files(mut self, max_files: Option<usize>) -> Self {
        self.scanner = self.scanner.with_max_files(max_files);
        self
    }

    /// Caps the number of events.
    #[must_use]
    pub fn max_events(mut self, max_events: Option<usize>) -> Self {
        self.max_events = max_events;
        self
    }

    /// Adds entries on top of the built-in registry; `registry` wins on
    /// conflicts.
    #[must_use]
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.registry.extend(registry);
        self
    }

    /// Adds a preprocessor.
    #[must_use]
    pub fn preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    /// Adds a selector.
    #[must_use]
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    /// Resolves the configuration and opens every partition.
    ///
    /// The schema and every configured stage are resolved before any file
    /// is touched.
    ///
    /// # Errors
    /// Returns a core configuration error for an invalid schema or an
    /// unresolved stage, or an I/O error while scanning or mapping inputs.
    pub fn build(self) -> Result<NTuple> {
        let schema = EventSchema::compile(&self.config, &self.registry)?;

        let mut pipeline = Pipeline::new();
        for preprocessor in self.preprocessors {
            pipeline.add_preprocessor(preprocessor);
        }
        for (name, stage) in self.config.preprocessors.iter() {
            pipeline.add_preprocessor(self.registry.preprocessor(name, &stage.src, &stage.kwargs)?);
        }
        for selector in self.selectors {
            pipeline.add_selector(selector);
        }
        for (name, stage) in self.config.selectors.iter() {
            pipeline.add_selector(self.registry.selector(name, &stage.src, &stage.kwargs)?);
        }

        let mut files = Vec::new();
        for input in &self.inputs {
            files.extend(self.scanner.scan(input)?);
        }
        if let Some(max) = self.scanner.max_files() {
            files.truncate(max);
        }
        if files.is_empty() {
            log::warn!("no partitions found in {:?}", self.inputs);
        }

        let mut chain = RecordChain::new();
        for file in &files {
            chain.add(file)?;
        }
        log::info!(
            "Opened {} records from {} partitions",
            chain.len(),
            files.len()
        );

        let chain = Arc::new(chain);
        let events = EventList::new(chain.clone(), Arc::new(schema), Arc::new(pipeline))
            .with_max_events(self.max_events);
        Ok(NTuple {
            files,
            chain,
            events,
        })
    }
}
