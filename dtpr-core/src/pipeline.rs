//! Event pipeline: ordered preprocessors, then AND-combined selectors.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::event::Event;

/// Predicate deciding whether an event is kept.
pub type SelectorFn = Arc<dyn Fn(&Event) -> Result<bool> + Send + Sync>;

/// In-place event transformation.
pub type PreprocessorFn = Arc<dyn Fn(&mut Event) -> Result<()> + Send + Sync>;

/// A named selector with its arguments already bound.
#[derive(Clone)]
pub struct Selector {
    name: String,
    func: SelectorFn,
}

impl Selector {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Event) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub(crate) fn from_arc(name: impl Into<String>, func: SelectorFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the selector.
    ///
    /// # Errors
    /// Propagates the selector's failure, tagged with its name.
    pub fn accepts(&self, event: &Event) -> Result<bool> {
        (self.func)(event).map_err(|e| e.in_stage(&self.name))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector").field("name", &self.name).finish()
    }
}

/// A named preprocessor with its arguments already bound.
#[derive(Clone)]
pub struct Preprocessor {
    name: String,
    func: PreprocessorFn,
}

impl Preprocessor {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut Event) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub(crate) fn from_arc(name: impl Into<String>, func: PreprocessorFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the preprocessor.
    ///
    /// # Errors
    /// Propagates the preprocessor's failure, tagged with its name.
    pub fn run(&self, event: &mut Event) -> Result<()> {
        (self.func)(event).map_err(|e| e.in_stage(&self.name))
    }
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("name", &self.name)
            .finish()
    }
}

/// Preprocessors followed by selectors.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    preprocessors: Vec<Preprocessor>,
    selectors: Vec<Selector>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a preprocessor, builder style.
    #[must_use]
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessors.push(preprocessor);
        self
    }

    /// Appends a selector, builder style.
    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn add_preprocessor(&mut self, preprocessor: Preprocessor) {
        self.preprocessors.push(preprocessor);
    }

    pub fn add_selector(&mut self, selector: Selector) {
        self.selectors.push(selector);
    }

    #[must_use]
    pub fn preprocessors(&self) -> &[Preprocessor] {
        &self.preprocessors
    }

    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Runs every preprocessor in order, then the selectors.
    ///
    /// Returns `None` when a selector rejects the event. Selectors only run
    /// once preprocessing completed; the first rejection short-circuits.
    ///
    /// # Errors
    /// Propagates the first stage failure.
    pub fn process(&self, mut event: Event) -> Result<Option<Event>> {
        for preprocessor in &self.preprocessors {
            preprocessor.run(&mut event)?;
        }
        for selector in &self.selectors {
            if !selector.accepts(&event)? {
                log::debug!(
                    "event {} rejected by selector '{}'",
                    event.number,
                    selector.name()
                );
                return Ok(None);
            }
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::particle::Particle;

    fn event_with_muons(n: usize) -> Event {
        let mut event = Event::new(0);
        event.set(
            "genmuons",
            (0..n).map(|i| Particle::new(i, "Genmuon")).collect::<Vec<_>>(),
        );
        event
    }

    fn min_muons(n: usize) -> Selector {
        Selector::new("min_muons", move |ev: &Event| {
            Ok(ev.require("genmuons")?.len() >= n)
        })
    }

    #[test]
    fn test_selectors_are_and_combined() {
        let pipeline = Pipeline::new()
            .with_selector(min_muons(1))
            .with_selector(min_muons(2));
        assert!(pipeline.process(event_with_muons(2)).unwrap().is_some());
        assert!(pipeline.process(event_with_muons(1)).unwrap().is_none());
    }

    #[test]
    fn test_preprocessors_run_before_selectors() {
        let pipeline = Pipeline::new()
            .with_selector(Selector::new("tagged", |ev: &Event| {
                Ok(ev.field("tag").is_some())
            }))
            .with_preprocessor(Preprocessor::new("tag", |ev: &mut Event| {
                ev.set("tag", true);
                Ok(())
            }));
        let event = pipeline.process(Event::new(3)).unwrap().unwrap();
        assert_eq!(event.field("tag"), Some(&true.into()));
    }

    #[test]
    fn test_stage_errors_name_the_stage() {
        let pipeline = Pipeline::new().with_selector(min_muons(1));
        let err = pipeline.process(Event::new(0)).unwrap_err();
        assert!(matches!(&err, Error::Stage { stage, .. } if stage == "min_muons"));
    }
}
