//! Lazy, indexable sequence of events over a record source.
//!
//! Nothing is cached: every access re-reads the record, rebuilds the event
//! from the schema and runs the pipeline. Index `i` always maps to record
//! `i` of the source.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;

use crate::builder::EventSchema;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::pipeline::Pipeline;
use crate::record::RecordSource;

/// Default number of events per parallel work unit.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Fixed-length sequence of `Event`-or-`None`.
///
/// `None` marks an event that was built but rejected by a selector.
#[derive(Clone)]
pub struct EventList {
    source: Arc<dyn RecordSource>,
    schema: Arc<EventSchema>,
    pipeline: Arc<Pipeline>,
    max_events: Option<usize>,
}

impl EventList {
    pub fn new(
        source: Arc<dyn RecordSource>,
        schema: Arc<EventSchema>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            source,
            schema,
            pipeline,
            max_events: None,
        }
    }

    /// Caps the logical length; iteration ends after `max` events.
    #[must_use]
    pub fn with_max_events(mut self, max: Option<usize>) -> Self {
        self.max_events = max;
        self
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        let len = self.source.len();
        self.max_events.map_or(len, |max| len.min(max))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn build(&self, index: usize) -> Result<Option<Event>> {
        let record = self.source.record(index)?;
        let event = self.schema.build_event(&record, index)?;
        self.pipeline.process(event)
    }

    /// Event at `index`; negative indices count from the end.
    ///
    /// # Errors
    /// Returns [`Error::EventIndex`] when out of range, or any build or
    /// pipeline error.
    pub fn get(&self, index: isize) -> Result<Option<Event>> {
        let len = self.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            usize::try_from(index).ok().filter(|&i| i < len)
        };
        match resolved {
            Some(i) => self.build(i),
            None => Err(Error::EventIndex { index, len }),
        }
    }

    /// Lazy slice with Python semantics: optional bounds, negative indices
    /// and negative steps.
    ///
    /// # Errors
    /// Returns [`Error::ZeroStep`] if `step` is zero.
    pub fn slice(
        &self,
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    ) -> Result<EventSlice<'_>> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(Error::ZeroStep);
        }
        let len = isize::try_from(self.len()).unwrap_or(isize::MAX);
        let adjust = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(b) if b < 0 => {
                let b = b + len;
                if b < 0 {
                    if step < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    b
                }
            }
            Some(b) if b >= len => {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            }
            Some(b) => b,
        };
        let (start, stop) = if step > 0 {
            (adjust(start, 0), adjust(stop, len))
        } else {
            (adjust(start, len - 1), adjust(stop, -1))
        };
        let remaining = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && stop < start {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok(EventSlice {
            list: self,
            next: start,
            step,
            remaining: usize::try_from(remaining).unwrap_or(0),
        })
    }

    /// Iterates over every event in source order.
    #[must_use]
    pub fn iter(&self) -> EventSlice<'_> {
        EventSlice {
            list: self,
            next: 0,
            step: 1,
            remaining: self.len(),
        }
    }

    /// First accepted event with the given event number (linear scan).
    ///
    /// # Errors
    /// Propagates build and pipeline errors encountered while scanning.
    pub fn find_by_number(&self, number: i64) -> Result<Option<Event>> {
        for event in self.iter() {
            if let Some(event) = event? {
                if event.number == number {
                    return Ok(Some(event));
                }
            }
        }
        Ok(None)
    }

    /// Folds over every event in parallel.
    ///
    /// The index range is split into disjoint chunks; each rayon worker
    /// rebuilds its own events from the shared read-only source, folds them
    /// into a fresh accumulator from `init`, and the per-chunk results are
    /// merged in index order with `combine`.
    ///
    /// # Errors
    /// Propagates the first build or pipeline error.
    pub fn par_fold<T, I, F, C>(&self, chunk_size: usize, init: I, fold: F, combine: C) -> Result<T>
    where
        T: Send,
        I: Fn() -> T + Sync + Send,
        F: Fn(T, Option<Event>) -> T + Sync + Send,
        C: Fn(T, T) -> T,
    {
        let chunks = chunk_ranges(self.len(), chunk_size.max(1));
        let partials = chunks
            .par_iter()
            .map(|range| {
                range
                    .clone()
                    .try_fold(init(), |acc, i| -> Result<T> {
                        Ok(fold(acc, self.build(i)?))
                    })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(partials.into_iter().fold(init(), combine))
    }
}

fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

impl fmt::Debug for EventList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventList")
            .field("len", &self.len())
            .field("max_events", &self.max_events)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a EventList {
    type Item = Result<Option<Event>>;
    type IntoIter = EventSlice<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single-pass, forward-only iterator over a slice of an [`EventList`].
///
/// Events are built on demand. To iterate again, request a new slice.
pub struct EventSlice<'a> {
    list: &'a EventList,
    next: isize,
    step: isize,
    remaining: usize,
}

impl Iterator for EventSlice<'_> {
    type Item = Result<Option<Event>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = usize::try_from(self.next).ok()?;
        self.remaining -= 1;
        self.next += self.step;
        Some(self.list.build(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EventSlice<'_> {}
