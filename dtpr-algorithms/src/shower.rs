//! Shower tagging of generator muons.
//!
//! Two independent heuristics, selected by [`ShowerMethod`]:
//!
//! - **Duplicate location**: two or more matched segments sit in the same
//!   chamber.
//! - **Hit origin**: some chamber traversed by the matched segments holds at
//!   least `threshold` simulated hits produced by electrons.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use dtpr_core::{Event, Particle, ParticleRef, Result, Value};

use crate::geometry::Chamber;
use crate::matching::{dangling, MATCHED_GENMUONS, MATCHED_SEGMENTS, MATCHED_TPS};

/// Boolean attribute written on every generator muon.
pub const SHOWERED: &str = "showered";

/// Shower heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowerMethod {
    /// Two matched segments in one chamber.
    #[default]
    DuplicateLocation,
    /// Electron hits in a traversed chamber.
    HitOrigin,
}

/// Shower tagging parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShowerConfig {
    /// Generator muon collection.
    pub genmuons: String,
    /// Simulated hit collection, read by [`ShowerMethod::HitOrigin`].
    pub hits: String,
    /// Heuristic to apply.
    pub method: ShowerMethod,
    /// Minimum electron hits in one chamber.
    pub threshold: usize,
    /// `|particle_type|` of hits counted as shower products.
    pub particle_code: i64,
}

impl Default for ShowerConfig {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            hits: "simhits".into(),
            method: ShowerMethod::DuplicateLocation,
            threshold: 8,
            particle_code: 11,
        }
    }
}

/// Chambers of the segments matched to `genmuon`, in match order.
///
/// # Errors
/// Returns an error if a reference dangles or a segment lacks its location.
pub fn matched_chambers(event: &Event, genmuon: &Particle) -> Result<Vec<Chamber>> {
    event
        .resolve_refs(genmuon, MATCHED_SEGMENTS)?
        .into_iter()
        .map(Chamber::of)
        .collect()
}

/// True if any chamber occurs more than once.
#[must_use]
pub fn has_duplicate_location(chambers: &[Chamber]) -> bool {
    let mut seen = BTreeSet::new();
    chambers.iter().any(|c| !seen.insert(*c))
}

/// Number of shower-product hits per chamber.
///
/// # Errors
/// Returns an error if a hit lacks its location or `particle_type`.
pub fn shower_hit_counts(hits: &[Particle], particle_code: i64) -> Result<HashMap<Chamber, usize>> {
    let mut counts = HashMap::new();
    for hit in hits {
        if hit.get_i64("particle_type")?.abs() == particle_code {
            *counts.entry(Chamber::of(hit)?).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Writes `showered` on every generator muon; returns how many showered.
///
/// All flags are computed before any is written.
///
/// # Errors
/// Returns a missing-collection error for the generator muons (or the hits,
/// with [`ShowerMethod::HitOrigin`]), or a missing-attribute error.
pub fn tag_showers(event: &mut Event, config: &ShowerConfig) -> Result<usize> {
    let genmuons = event.require(&config.genmuons)?;
    let counts = match config.method {
        ShowerMethod::DuplicateLocation => HashMap::new(),
        ShowerMethod::HitOrigin => shower_hit_counts(event.require(&config.hits)?, config.particle_code)?,
    };

    let mut flags = Vec::with_capacity(genmuons.len());
    for genmuon in genmuons {
        let chambers = matched_chambers(event, genmuon)?;
        let showered = match config.method {
            ShowerMethod::DuplicateLocation => has_duplicate_location(&chambers),
            ShowerMethod::HitOrigin => chambers
                .iter()
                .any(|c| counts.get(c).copied().unwrap_or(0) >= config.threshold),
        };
        flags.push(showered);
    }

    let collection = event
        .collection_mut(&config.genmuons)
        .ok_or_else(|| dtpr_core::Error::MissingCollection(config.genmuons.clone()))?;
    for (genmuon, showered) in collection.iter_mut().zip(&flags) {
        genmuon.set(SHOWERED, *showered);
    }
    Ok(flags.iter().filter(|&&f| f).count())
}

/// Parameters of [`drop_showered_tps`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropShoweredConfig {
    /// Generator muon collection.
    pub genmuons: String,
    /// Collection of algorithm-found showers.
    pub found: String,
    /// Keep TP matches in chambers that hold a found shower.
    pub keep_found_chambers: bool,
}

impl Default for DropShoweredConfig {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            found: "fwshowers".into(),
            keep_found_chambers: false,
        }
    }
}

/// Unmatches trigger primitives from the segments of showered muons.
///
/// The segment loses its `matched_tps` and each TP loses the segment from its
/// `matched_segments`. Muons matched to the segment then keep only the TPs
/// still reachable through their other segments. Returns the number of
/// segments cleared.
///
/// # Errors
/// Returns an error if the generator muons are missing (or the found showers,
/// with `keep_found_chambers`), or a reference dangles.
pub fn drop_showered_tps(event: &mut Event, config: &DropShoweredConfig) -> Result<usize> {
    let genmuons = event.require(&config.genmuons)?;
    let protected: BTreeSet<Chamber> = if config.keep_found_chambers {
        event
            .require(&config.found)?
            .iter()
            .map(Chamber::of)
            .collect::<Result<_>>()?
    } else {
        BTreeSet::new()
    };

    let mut segments: BTreeSet<ParticleRef> = BTreeSet::new();
    for genmuon in genmuons {
        if !genmuon.attr(SHOWERED).is_some_and(Value::truthy) {
            continue;
        }
        for seg_ref in genmuon.refs(MATCHED_SEGMENTS)? {
            let segment = event.particle(seg_ref).ok_or_else(|| dangling(seg_ref))?;
            if protected.is_empty() || !protected.contains(&Chamber::of(segment)?) {
                segments.insert(seg_ref.clone());
            }
        }
    }

    let mut cleared = 0;
    let mut owners: BTreeSet<ParticleRef> = BTreeSet::new();
    for seg_ref in &segments {
        let segment = event.particle(seg_ref).ok_or_else(|| dangling(seg_ref))?;
        let tps = segment.refs(MATCHED_TPS)?.to_vec();
        if tps.is_empty() {
            continue;
        }
        owners.extend(segment.refs(MATCHED_GENMUONS)?.iter().cloned());
        for tp in &tps {
            let tp = event.particle_mut(tp).ok_or_else(|| dangling(tp))?;
            retain_refs(tp, MATCHED_SEGMENTS, |r| r != seg_ref)?;
        }
        let segment = event.particle_mut(seg_ref).ok_or_else(|| dangling(seg_ref))?;
        segment.set(MATCHED_TPS, Value::RefList(Vec::new()));
        cleared += 1;
    }

    // A muon keeps the TPs still reachable through its remaining segments.
    for owner_ref in &owners {
        let owner = event.particle(owner_ref).ok_or_else(|| dangling(owner_ref))?;
        let mut reachable = BTreeSet::new();
        for segment in event.resolve_refs(owner, MATCHED_SEGMENTS)? {
            reachable.extend(segment.refs(MATCHED_TPS)?.iter().cloned());
        }
        let owner = event.particle_mut(owner_ref).ok_or_else(|| dangling(owner_ref))?;
        retain_refs(owner, MATCHED_TPS, |r| reachable.contains(r))?;
    }
    Ok(cleared)
}

fn retain_refs(particle: &mut Particle, key: &str, keep: impl Fn(&ParticleRef) -> bool) -> Result<()> {
    let kept: Vec<ParticleRef> = particle.refs(key)?.iter().filter(|r| keep(r)).cloned().collect();
    particle.set(key, Value::RefList(kept));
    Ok(())
}
