//! Generator muon ↔ segment ↔ trigger-primitive matching.
//!
//! Matching runs in two phases. [`find_matches`] reads the event and returns
//! every matched pair; [`apply_matches`] writes the bidirectional references.
//! A missing attribute fails the first phase, so no partial matching is ever
//! written to the event.

use std::collections::BTreeSet;

use serde::Deserialize;

use dtpr_core::{Error, Event, Particle, ParticleRef, Result, Value};

use crate::geometry::{angular_difference, normalize_sector, tp_global_phi, TP_PHI_RESOLUTION};

/// Segments matched to a generator muon, or TPs matched to a segment.
pub const MATCHED_SEGMENTS: &str = "matched_segments";
/// Generator muons matched to a segment.
pub const MATCHED_GENMUONS: &str = "matched_genmuons";
/// Trigger primitives matched to a segment or a generator muon.
pub const MATCHED_TPS: &str = "matched_tps";

/// Matching windows and collection names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    /// Generator muon collection.
    pub genmuons: String,
    /// Offline segment collection.
    pub segments: String,
    /// Trigger primitive collection.
    pub tps: String,
    /// Maximum generator ↔ segment azimuthal difference (rad).
    pub max_dphi: f64,
    /// Maximum generator ↔ segment pseudorapidity difference.
    pub max_deta: f64,
    /// Minimum number of phi-layer hits in a segment.
    pub min_hits_phi: i64,
    /// Minimum number of z-layer hits in a segment.
    pub min_hits_z: i64,
    /// Station without z-layers, exempt from `min_hits_z`.
    pub waived_station: Option<i64>,
    /// Maximum segment ↔ TP azimuthal difference (rad).
    pub tp_max_dphi: f64,
    /// Required (recentered) TP bunch crossing.
    pub tp_bx: i64,
    /// TP phi code per radian.
    pub phi_resolution: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            segments: "segments".into(),
            tps: "tps".into(),
            max_dphi: 0.1,
            max_deta: 0.3,
            min_hits_phi: 4,
            min_hits_z: 4,
            waived_station: Some(4),
            tp_max_dphi: 0.1,
            tp_bx: 0,
            phi_resolution: TP_PHI_RESOLUTION,
        }
    }
}

/// Checks a generator muon against a segment.
///
/// # Errors
/// Returns a missing-attribute error if `phi`, `eta`, `st` or the hit
/// counts are absent.
pub fn segment_matches(genmuon: &Particle, segment: &Particle, config: &MatchingConfig) -> Result<bool> {
    let dphi = angular_difference(genmuon.get_f64("phi")?, segment.get_f64("phi")?);
    let deta = (genmuon.get_f64("eta")? - segment.get_f64("eta")?).abs();
    let waived = config.waived_station == Some(segment.get_i64("st")?);
    Ok(dphi < config.max_dphi
        && deta < config.max_deta
        && segment.get_i64("nHits_phi")? >= config.min_hits_phi
        && (waived || segment.get_i64("nHits_z")? >= config.min_hits_z))
}

/// Checks a segment against a trigger primitive in the same chamber.
///
/// # Errors
/// Returns a missing-attribute error if a location field, `phi` or `BX` is
/// absent.
pub fn tp_matches(segment: &Particle, tp: &Particle, config: &MatchingConfig) -> Result<bool> {
    let tp_sc = tp.get_i64("sc")?;
    let same_chamber = tp.get_i64("wh")? == segment.get_i64("wh")?
        && tp_sc == normalize_sector(segment.get_i64("sc")?)
        && tp.get_i64("st")? == segment.get_i64("st")?;
    if !same_chamber {
        return Ok(false);
    }
    let tp_phi = tp_global_phi(tp.get_f64("phi")?, tp_sc, config.phi_resolution);
    let dphi = angular_difference(segment.get_f64("phi")?, tp_phi);
    Ok(dphi < config.tp_max_dphi && tp.get_i64("BX")? == config.tp_bx)
}

/// Largest generator ↔ segment azimuthal difference over `segments`.
///
/// `None` without segments.
///
/// # Errors
/// Returns a missing-attribute error if `phi` is absent.
pub fn max_dphi(genmuon: &Particle, segments: &[&Particle]) -> Result<Option<f64>> {
    let phi = genmuon.get_f64("phi")?;
    max_of(segments.iter().map(|seg| Ok(angular_difference(phi, seg.get_f64("phi")?))))
}

/// Largest generator ↔ segment pseudorapidity difference over `segments`.
///
/// `None` without segments.
///
/// # Errors
/// Returns a missing-attribute error if `eta` is absent.
pub fn max_deta(genmuon: &Particle, segments: &[&Particle]) -> Result<Option<f64>> {
    let eta = genmuon.get_f64("eta")?;
    max_of(segments.iter().map(|seg| Ok((eta - seg.get_f64("eta")?).abs())))
}

/// Azimuthal differences between segments of different stations, one per
/// ordered pair.
///
/// # Errors
/// Returns a missing-attribute error if `st` or `phi` is absent.
pub fn segment_dphis(segments: &[&Particle]) -> Result<Vec<f64>> {
    let mut dphis = Vec::new();
    for a in segments {
        for b in segments {
            if a.get_i64("st")? != b.get_i64("st")? {
                dphis.push(angular_difference(a.get_f64("phi")?, b.get_f64("phi")?));
            }
        }
    }
    Ok(dphis)
}

/// Largest of [`segment_dphis`], `None` when no two segments sit in
/// different stations.
///
/// # Errors
/// See [`segment_dphis`].
pub fn max_segment_dphi(segments: &[&Particle]) -> Result<Option<f64>> {
    max_of(segment_dphis(segments)?.into_iter().map(Ok))
}

/// For each ordered pair of segments in different stations of the same
/// sector, both with trigger primitives, the largest azimuthal difference
/// between their TPs' local phi.
///
/// `segments` pairs each segment with its matched TPs; TP phi codes are
/// divided by `resolution`.
///
/// # Errors
/// Returns a missing-attribute error if `st`, `sc` or a `phi` is absent.
pub fn tp_dphis(segments: &[(&Particle, Vec<&Particle>)], resolution: f64) -> Result<Vec<f64>> {
    let mut dphis = Vec::new();
    for (a, a_tps) in segments {
        for (b, b_tps) in segments {
            if a.get_i64("st")? == b.get_i64("st")? || a.get_i64("sc")? != b.get_i64("sc")? {
                continue;
            }
            let mut pair = Vec::with_capacity(a_tps.len() * b_tps.len());
            for ta in a_tps {
                for tb in b_tps {
                    pair.push(angular_difference(
                        ta.get_f64("phi")? / resolution,
                        tb.get_f64("phi")? / resolution,
                    ));
                }
            }
            if let Some(max) = max_of(pair.into_iter().map(Ok))? {
                dphis.push(max);
            }
        }
    }
    Ok(dphis)
}

/// Largest of [`tp_dphis`].
///
/// # Errors
/// See [`tp_dphis`].
pub fn max_tp_dphi(segments: &[(&Particle, Vec<&Particle>)], resolution: f64) -> Result<Option<f64>> {
    max_of(tp_dphis(segments, resolution)?.into_iter().map(Ok))
}

fn max_of(values: impl IntoIterator<Item = Result<f64>>) -> Result<Option<f64>> {
    let mut max: Option<f64> = None;
    for value in values {
        let value = value?;
        max = Some(max.map_or(value, |m| m.max(value)));
    }
    Ok(max)
}

/// How tightly a generator muon's matches line up, the quantities the
/// matching windows are tuned against.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchQuality {
    /// See [`max_dphi`].
    pub max_dphi: Option<f64>,
    /// See [`max_deta`].
    pub max_deta: Option<f64>,
    /// See [`max_segment_dphi`].
    pub max_segment_dphi: Option<f64>,
    /// See [`max_tp_dphi`].
    pub max_tp_dphi: Option<f64>,
}

impl MatchQuality {
    /// Attribute names and values, as written by the `match_quality`
    /// preprocessor.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("max_dphi", self.max_dphi),
            ("max_deta", self.max_deta),
            ("max_segment_dphi", self.max_segment_dphi),
            ("max_tp_dphi", self.max_tp_dphi),
        ]
    }
}

/// Match quality of `genmuon` from its already written references.
///
/// # Errors
/// Returns an error if a reference list is absent or dangles, or a
/// missing-attribute error from the metrics.
pub fn match_quality(event: &Event, genmuon: &Particle, resolution: f64) -> Result<MatchQuality> {
    let segments = event.resolve_refs(genmuon, MATCHED_SEGMENTS)?;
    let with_tps = segments
        .iter()
        .map(|&seg| Ok((seg, event.resolve_refs(seg, MATCHED_TPS)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(MatchQuality {
        max_dphi: max_dphi(genmuon, &segments)?,
        max_deta: max_deta(genmuon, &segments)?,
        max_segment_dphi: max_segment_dphi(&segments)?,
        max_tp_dphi: max_tp_dphi(&with_tps, resolution)?,
    })
}

/// Matched pairs of one event, as positions within their collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matches {
    /// `(genmuon, segment)` pairs.
    pub genmuon_segments: Vec<(usize, usize)>,
    /// `(segment, tp)` pairs, for generator-matched segments only.
    pub segment_tps: Vec<(usize, usize)>,
}

impl Matches {
    /// True when nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genmuon_segments.is_empty() && self.segment_tps.is_empty()
    }
}

/// Computes every match without touching the event.
///
/// # Errors
/// Returns [`Error::MissingCollection`] if a configured collection is absent,
/// or a missing-attribute error from the matching predicates.
pub fn find_matches(event: &Event, config: &MatchingConfig) -> Result<Matches> {
    let genmuons = event.require(&config.genmuons)?;
    let segments = event.require(&config.segments)?;
    let tps = event.require(&config.tps)?;

    let mut matches = Matches::default();
    for (g, genmuon) in genmuons.iter().enumerate() {
        for (s, segment) in segments.iter().enumerate() {
            if segment_matches(genmuon, segment, config)? {
                matches.genmuon_segments.push((g, s));
            }
        }
    }

    let matched: BTreeSet<usize> = matches.genmuon_segments.iter().map(|&(_, s)| s).collect();
    for s in matched {
        for (t, tp) in tps.iter().enumerate() {
            if tp_matches(&segments[s], tp, config)? {
                matches.segment_tps.push((s, t));
            }
        }
    }
    Ok(matches)
}

/// Writes matched pairs as de-duplicated, bidirectional references.
///
/// Every particle of the three collections ends up carrying its reference
/// lists, empty when unmatched.
///
/// # Errors
/// Returns an error if a collection is absent, a position dangles or a
/// reference attribute holds non-reference data.
pub fn apply_matches(event: &mut Event, config: &MatchingConfig, matches: &Matches) -> Result<()> {
    ensure_ref_lists(event, &config.genmuons, &[MATCHED_SEGMENTS, MATCHED_TPS])?;
    ensure_ref_lists(event, &config.segments, &[MATCHED_GENMUONS, MATCHED_TPS])?;
    ensure_ref_lists(event, &config.tps, &[MATCHED_SEGMENTS])?;

    let gm = |i| ParticleRef::new(config.genmuons.as_str(), i);
    let seg = |i| ParticleRef::new(config.segments.as_str(), i);
    let tp = |i| ParticleRef::new(config.tps.as_str(), i);

    for &(g, s) in &matches.genmuon_segments {
        event.link(&gm(g), MATCHED_SEGMENTS, &seg(s), MATCHED_GENMUONS)?;
    }
    for &(s, t) in &matches.segment_tps {
        event.link(&seg(s), MATCHED_TPS, &tp(t), MATCHED_SEGMENTS)?;
        for &(g, _) in matches.genmuon_segments.iter().filter(|&&(_, gs)| gs == s) {
            event
                .particle_mut(&gm(g))
                .ok_or_else(|| dangling(&gm(g)))?
                .push_ref(MATCHED_TPS, tp(t))?;
        }
    }
    Ok(())
}

/// Finds and writes all matches of an event.
///
/// Running it again on the same event adds no duplicate references.
///
/// # Errors
/// See [`find_matches`] and [`apply_matches`].
pub fn match_genmuons(event: &mut Event, config: &MatchingConfig) -> Result<Matches> {
    let matches = find_matches(event, config)?;
    apply_matches(event, config, &matches)?;
    log::trace!(
        "event {}: {} genmuon-segment and {} segment-tp matches",
        event.number,
        matches.genmuon_segments.len(),
        matches.segment_tps.len()
    );
    Ok(matches)
}

fn ensure_ref_lists(event: &mut Event, collection: &str, keys: &[&str]) -> Result<()> {
    let particles = event
        .collection_mut(collection)
        .ok_or_else(|| Error::MissingCollection(collection.to_string()))?;
    for p in particles.iter_mut() {
        for key in keys {
            if !p.has(key) {
                p.set(key, Value::RefList(Vec::new()));
            }
        }
    }
    Ok(())
}

pub(crate) fn dangling(r: &ParticleRef) -> Error {
    Error::DanglingRef {
        collection: r.collection.clone(),
        position: r.position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn genmuon(phi: f64, eta: f64) -> Particle {
        Particle::new(0, "GenMuon").with("phi", phi).with("eta", eta)
    }

    fn segment(phi: f64, eta: f64, hits_phi: i64, hits_z: i64, st: i64) -> Particle {
        Particle::new(0, "Segment")
            .with("wh", 1)
            .with("sc", 1)
            .with("st", st)
            .with("phi", phi)
            .with("eta", eta)
            .with("nHits_phi", hits_phi)
            .with("nHits_z", hits_z)
    }

    fn tp(phi_code: f64, sc: i64, bx: i64) -> Particle {
        Particle::new(0, "Ph2TP")
            .with("wh", 1)
            .with("sc", sc)
            .with("st", 2)
            .with("phi", phi_code)
            .with("BX", bx)
    }

    #[test]
    fn test_segment_window() {
        let config = MatchingConfig::default();
        let gm = genmuon(0.05, 0.10);
        assert!(segment_matches(&gm, &segment(0.06, 0.12, 5, 5, 2), &config).unwrap());
        assert!(!segment_matches(&gm, &segment(0.06, 0.12, 5, 2, 2), &config).unwrap());
        assert!(segment_matches(&gm, &segment(0.06, 0.12, 5, 2, 4), &config).unwrap());
        assert!(!segment_matches(&gm, &segment(0.06, 0.12, 3, 5, 2), &config).unwrap());
        assert!(!segment_matches(&gm, &segment(0.2, 0.12, 5, 5, 2), &config).unwrap());
        assert!(!segment_matches(&gm, &segment(0.06, 0.5, 5, 5, 2), &config).unwrap());
    }

    #[test]
    fn test_missing_attribute_is_an_error() {
        let config = MatchingConfig::default();
        let gm = Particle::new(0, "GenMuon").with("phi", 0.1);
        assert!(matches!(
            segment_matches(&gm, &segment(0.1, 0.1, 5, 5, 1), &config),
            Err(Error::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_tp_window_and_sector_alias() {
        let config = MatchingConfig::default();
        // 0.06 rad local phi in sector 1
        let seg = segment(0.06, 0.0, 5, 5, 2);
        assert!(tp_matches(&seg, &tp(0.06 * TP_PHI_RESOLUTION, 1, 0), &config).unwrap());
        assert!(!tp_matches(&seg, &tp(0.06 * TP_PHI_RESOLUTION, 1, 1), &config).unwrap());
        assert!(!tp_matches(&seg, &tp(0.5 * TP_PHI_RESOLUTION, 1, 0), &config).unwrap());

        let seg13 = segment(0.0, 0.0, 5, 5, 2).with("sc", 13).with("phi", std::f64::consts::FRAC_PI_2);
        assert!(tp_matches(&seg13, &tp(0.0, 4, 0), &config).unwrap());
        assert!(!tp_matches(&seg13, &tp(0.0, 13, 0), &config).unwrap());
    }

    #[test]
    fn test_genmuon_segment_spread() {
        let gm = genmuon(0.05, 0.10);
        let near = segment(0.06, 0.12, 5, 5, 1);
        let far = segment(0.25, -0.2, 5, 5, 2);
        assert_relative_eq!(max_dphi(&gm, &[&near, &far]).unwrap().unwrap(), 0.2, epsilon = 1e-9);
        assert_relative_eq!(max_deta(&gm, &[&near, &far]).unwrap().unwrap(), 0.3, epsilon = 1e-9);
        assert_eq!(max_dphi(&gm, &[]).unwrap(), None);
        assert_eq!(max_deta(&gm, &[]).unwrap(), None);
        assert!(max_dphi(&Particle::new(0, "GenMuon"), &[&near]).is_err());
    }

    #[test]
    fn test_segment_dphis_skip_same_station() {
        let a = segment(0.1, 0.0, 5, 5, 1);
        let b = segment(0.3, 0.0, 5, 5, 2);
        let c = segment(0.6, 0.0, 5, 5, 2);
        let dphis = segment_dphis(&[&a, &b, &c]).unwrap();
        assert_eq!(dphis.len(), 4);
        assert_relative_eq!(max_segment_dphi(&[&a, &b, &c]).unwrap().unwrap(), 0.5, epsilon = 1e-9);
        assert_eq!(max_segment_dphi(&[&b, &c]).unwrap(), None);
        assert_eq!(max_segment_dphi(&[]).unwrap(), None);
    }

    #[test]
    fn test_tp_dphis_same_sector_only() {
        let r = TP_PHI_RESOLUTION;
        let a = segment(0.1, 0.0, 5, 5, 1);
        let b = segment(0.3, 0.0, 5, 5, 2);
        let c = segment(0.6, 0.0, 5, 5, 3).with("sc", 2);
        let (ta1, ta2, tb, tc) = (tp(0.1 * r, 1, 0), tp(0.2 * r, 1, 0), tp(0.3 * r, 1, 0), tp(0.9 * r, 2, 0));
        let pairs = vec![(&a, vec![&ta1, &ta2]), (&b, vec![&tb]), (&c, vec![&tc])];
        let dphis = tp_dphis(&pairs, r).unwrap();
        assert_eq!(dphis.len(), 2);
        for dphi in dphis {
            assert_relative_eq!(dphi, 0.2, epsilon = 1e-9);
        }

        let without_tps = vec![(&a, vec![&ta1]), (&b, Vec::new())];
        assert_eq!(max_tp_dphi(&without_tps, r).unwrap(), None);
        assert_eq!(max_tp_dphi(&[], r).unwrap(), None);
    }

    fn event() -> Event {
        let mut ev = Event::new(0);
        ev.set("genmuons", vec![genmuon(0.05, 0.10), genmuon(2.0, -1.0)]);
        ev.set(
            "segments",
            vec![
                segment(0.06, 0.12, 5, 5, 2),
                segment(0.04, 0.08, 6, 6, 2),
                segment(2.5, -1.0, 6, 6, 2),
            ],
        );
        ev.set(
            "tps",
            vec![tp(0.06 * TP_PHI_RESOLUTION, 1, 0), tp(0.06 * TP_PHI_RESOLUTION, 1, -3)],
        );
        ev
    }

    #[test]
    fn test_match_event() {
        let mut ev = event();
        let matches = match_genmuons(&mut ev, &MatchingConfig::default()).unwrap();
        assert_eq!(matches.genmuon_segments, vec![(0, 0), (0, 1)]);
        assert_eq!(matches.segment_tps, vec![(0, 0), (1, 0)]);

        let gms = ev.collection("genmuons").unwrap();
        assert_eq!(gms[0].refs(MATCHED_SEGMENTS).unwrap().len(), 2);
        assert_eq!(gms[0].refs(MATCHED_TPS).unwrap(), &[ParticleRef::new("tps", 0)]);
        assert!(gms[1].refs(MATCHED_SEGMENTS).unwrap().is_empty());
        assert!(gms[1].has(MATCHED_TPS));

        let tps = ev.collection("tps").unwrap();
        assert_eq!(tps[0].refs(MATCHED_SEGMENTS).unwrap().len(), 2);
        assert!(tps[1].refs(MATCHED_SEGMENTS).unwrap().is_empty());
    }

    #[test]
    fn test_match_quality_from_refs() {
        let mut ev = event();
        match_genmuons(&mut ev, &MatchingConfig::default()).unwrap();
        let gms = ev.collection("genmuons").unwrap();

        let quality = match_quality(&ev, &gms[0], TP_PHI_RESOLUTION).unwrap();
        assert_relative_eq!(quality.max_dphi.unwrap(), 0.01, epsilon = 1e-9);
        assert_relative_eq!(quality.max_deta.unwrap(), 0.02, epsilon = 1e-9);
        // both matched segments sit in station 2
        assert_eq!(quality.max_segment_dphi, None);
        assert_eq!(quality.max_tp_dphi, None);

        let unmatched = match_quality(&ev, &gms[1], TP_PHI_RESOLUTION).unwrap();
        assert_eq!(unmatched, MatchQuality::default());
    }

    #[test]
    fn test_missing_collection() {
        let mut ev = event();
        ev.set("tps", Vec::<Particle>::new());
        assert!(match_genmuons(&mut ev, &MatchingConfig::default()).is_ok());

        let mut ev = Event::new(0);
        ev.set("genmuons", vec![genmuon(0.0, 0.0)]);
        assert!(matches!(
            match_genmuons(&mut ev, &MatchingConfig::default()),
            Err(Error::MissingCollection(name)) if name == "segments"
        ));
    }

    #[test]
    fn test_nothing_written_on_failure() {
        let mut ev = event();
        ev.collection_mut("segments")
            .unwrap()
            .push(Particle::new(3, "Segment").with("phi", 0.05));
        assert!(match_genmuons(&mut ev, &MatchingConfig::default()).is_err());
        assert!(ev
            .collection("genmuons")
            .unwrap()
            .iter()
            .all(|gm| !gm.has(MATCHED_SEGMENTS)));
    }

    #[test]
    fn test_config_from_kwargs() {
        let kwargs = serde_json::json!({"max_dphi": 0.2, "waived_station": null});
        let config: MatchingConfig = serde_json::from_value(kwargs).unwrap();
        assert!((config.max_dphi - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.waived_station, None);
        assert_eq!(config.min_hits_z, 4);
        assert!(serde_json::from_value::<MatchingConfig>(serde_json::json!({"dphi": 1})).is_err());
    }
}
