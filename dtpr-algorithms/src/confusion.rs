//! Per-chamber confusion classification of found showers against truth.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;

use dtpr_core::{Event, Particle, Result};

use crate::geometry::Chamber;
use crate::matching::{MATCHED_SEGMENTS, MATCHED_TPS};

/// Which chambers are classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    /// Shower chambers plus, per generator muon and station, the chamber of
    /// the last matched segment when it carries a matched trigger primitive.
    #[default]
    Traversed,
    /// Chambers holding a found or a true shower.
    Showers,
    /// Every chamber with raw hits.
    Hits,
}

/// Confusion classes; the discriminant is the histogram bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Class {
    /// Found and true.
    TruePositive = 0,
    /// Found, not true.
    FalsePositive = 1,
    /// Neither found nor true.
    TrueNegative = 2,
    /// True, not found.
    FalseNegative = 3,
}

impl Class {
    /// All classes in bin order.
    pub const ALL: [Class; 4] = [
        Class::TruePositive,
        Class::FalsePositive,
        Class::TrueNegative,
        Class::FalseNegative,
    ];

    /// Classifies one chamber.
    #[must_use]
    pub fn of(found: bool, truth: bool) -> Self {
        match (found, truth) {
            (true, true) => Class::TruePositive,
            (true, false) => Class::FalsePositive,
            (false, false) => Class::TrueNegative,
            (false, true) => Class::FalseNegative,
        }
    }

    /// Histogram bin.
    #[must_use]
    pub fn code(self) -> usize {
        self as usize
    }

    /// True when the finder agrees with truth (the efficiency numerator).
    #[must_use]
    pub fn agrees(self) -> bool {
        matches!(self, Class::TruePositive | Class::TrueNegative)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Class::TruePositive => "TP",
            Class::FalsePositive => "FP",
            Class::TrueNegative => "TN",
            Class::FalseNegative => "FN",
        })
    }
}

/// Classification parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfusionConfig {
    /// Algorithm-found shower collection.
    pub found: String,
    /// Ground-truth shower collection.
    pub truth: String,
    /// Generator muon collection, read in [`LocationMode::Traversed`].
    pub genmuons: String,
    /// Raw hit collection, read in [`LocationMode::Hits`].
    pub hits: String,
    /// Location set to classify.
    pub mode: LocationMode,
    /// Restrict to one station.
    pub station: Option<i64>,
}

impl Default for ConfusionConfig {
    fn default() -> Self {
        Self {
            found: "fwshowers".into(),
            truth: "realshowers".into(),
            genmuons: "genmuons".into(),
            hits: "digis".into(),
            mode: LocationMode::Traversed,
            station: None,
        }
    }
}

impl ConfusionConfig {
    fn in_station(&self, chamber: &Chamber) -> bool {
        self.station.is_none_or(|st| st == chamber.st)
    }

    fn chambers<'a>(&self, particles: impl IntoIterator<Item = &'a Particle>) -> Result<BTreeSet<Chamber>> {
        let mut out = BTreeSet::new();
        for p in particles {
            let chamber = Chamber::of(p)?;
            if self.in_station(&chamber) {
                out.insert(chamber);
            }
        }
        Ok(out)
    }
}

/// Chambers to classify for `event`.
///
/// # Errors
/// Returns a missing-collection error for the collections the mode reads,
/// or a missing-attribute error for particles without a location.
pub fn interesting_locations(event: &Event, config: &ConfusionConfig) -> Result<BTreeSet<Chamber>> {
    if config.mode == LocationMode::Hits {
        return config.chambers(event.require(&config.hits)?);
    }
    let mut locations = config.chambers(event.require(&config.found)?)?;
    locations.extend(config.chambers(event.require(&config.truth)?)?);
    if config.mode == LocationMode::Traversed {
        for genmuon in event.require(&config.genmuons)? {
            for segment in best_matches(event, genmuon, config)? {
                if !segment.refs(MATCHED_TPS)?.is_empty() {
                    locations.insert(Chamber::of(segment)?);
                }
            }
        }
    }
    Ok(locations)
}

/// The last matched segment of `genmuon` in each station, or only in
/// `config.station` when set.
fn best_matches<'a>(event: &'a Event, genmuon: &Particle, config: &ConfusionConfig) -> Result<Vec<&'a Particle>> {
    let mut best = BTreeMap::new();
    for segment in event.resolve_refs(genmuon, MATCHED_SEGMENTS)? {
        let st = segment.get_i64("st")?;
        if config.station.is_none_or(|wanted| wanted == st) {
            best.insert(st, segment);
        }
    }
    Ok(best.into_values().collect())
}

/// Classifies every interesting chamber of `event`, in chamber order.
///
/// # Errors
/// See [`interesting_locations`].
pub fn classify(event: &Event, config: &ConfusionConfig) -> Result<Vec<(Chamber, Class)>> {
    let locations = interesting_locations(event, config)?;
    let found = config.chambers(event.require(&config.found)?)?;
    let truth = config.chambers(event.require(&config.truth)?)?;
    Ok(locations
        .into_iter()
        .map(|c| (c, Class::of(found.contains(&c), truth.contains(&c))))
        .collect())
}

/// Per-wheel confusion counts.
///
/// Merging is associative and commutative, so partial matrices from
/// parallel workers can be combined in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: BTreeMap<i64, [u64; 4]>,
}

impl ConfusionMatrix {
    /// Creates an empty matrix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one classified chamber.
    pub fn add(&mut self, wheel: i64, class: Class) {
        self.counts.entry(wheel).or_default()[class.code()] += 1;
    }

    /// Counts every classification of an event.
    pub fn extend(&mut self, classified: &[(Chamber, Class)]) {
        for (chamber, class) in classified {
            self.add(chamber.wh, *class);
        }
    }

    /// Adds every count of `other`.
    #[must_use]
    pub fn merge(mut self, other: ConfusionMatrix) -> Self {
        for (wheel, counts) in other.counts {
            let slot = self.counts.entry(wheel).or_default();
            for (a, b) in slot.iter_mut().zip(counts) {
                *a += b;
            }
        }
        self
    }

    /// Count of `class` in `wheel`.
    #[must_use]
    pub fn count(&self, wheel: i64, class: Class) -> u64 {
        self.counts.get(&wheel).map_or(0, |c| c[class.code()])
    }

    /// Count of `class` over all wheels.
    #[must_use]
    pub fn total(&self, class: Class) -> u64 {
        self.counts.values().map(|c| c[class.code()]).sum()
    }

    /// Wheels with at least one count, ascending.
    pub fn wheels(&self) -> impl Iterator<Item = i64> + '_ {
        self.counts.keys().copied()
    }

    /// Fraction of chambers where the finder agrees with truth.
    ///
    /// `None` for a wheel without classified chambers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn efficiency(&self, wheel: i64) -> Option<f64> {
        let counts = self.counts.get(&wheel)?;
        let total: u64 = counts.iter().sum();
        let agree: u64 = Class::ALL
            .iter()
            .filter(|c| c.agrees())
            .map(|c| counts[c.code()])
            .sum();
        (total > 0).then(|| agree as f64 / total as f64)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>6} {:>8} {:>8} {:>8} {:>8}", "wheel", "TP", "FP", "TN", "FN")?;
        for (wheel, c) in &self.counts {
            writeln!(f, "{wheel:>6} {:>8} {:>8} {:>8} {:>8}", c[0], c[1], c[2], c[3])?;
        }
        Ok(())
    }
}
