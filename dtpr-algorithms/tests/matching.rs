use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use dtpr_algorithms::{
    angular_difference, builtin_registry, delta_phi, match_genmuons, segment_matches,
    MatchingConfig, MATCHED_GENMUONS, MATCHED_SEGMENTS, MATCHED_TPS, SHOWERED,
};
use dtpr_core::{
    Event, EventList, EventSchema, MemorySource, Particle, ParticleRef, Pipeline, Record,
    RunConfig,
};
use proptest::prelude::*;
use serde_json::json;

fn segment(phi: f64, eta: f64, hits_phi: i64, hits_z: i64, st: i64) -> Particle {
    Particle::new(0, "Segment")
        .with("wh", 1)
        .with("sc", 3)
        .with("st", st)
        .with("phi", phi)
        .with("eta", eta)
        .with("nHits_phi", hits_phi)
        .with("nHits_z", hits_z)
}

#[test]
fn test_reference_scenario() {
    let config = MatchingConfig {
        max_dphi: 0.1,
        max_deta: 0.3,
        ..MatchingConfig::default()
    };
    let gm = Particle::new(0, "GenMuon").with("phi", 0.05).with("eta", 0.10);
    assert!(segment_matches(&gm, &segment(0.06, 0.12, 5, 5, 2), &config).unwrap());
    assert!(!segment_matches(&gm, &segment(0.06, 0.12, 5, 2, 2), &config).unwrap());
}

fn config() -> RunConfig {
    RunConfig::from_value(json!({
        "event_number_column": "event_eventNumber",
        "particle_types": {
            "genmuons": {
                "class": "dtpr.particles.GenMuon",
                "amount": "gen_pt",
                "attributes": {
                    "pt": {"branch": "gen_pt"},
                    "eta": {"branch": "gen_eta"},
                    "phi": {"branch": "gen_phi"},
                },
                "sorter": {"by": "p.pt", "reverse": true},
            },
            "segments": {
                "class": "dtpr.particles.Segment",
                "amount": "seg_wheel",
                "attributes": {
                    "wh": {"branch": "seg_wheel"},
                    "sc": {"branch": "seg_sector"},
                    "st": {"branch": "seg_station"},
                    "phi": {"branch": "seg_posGlb_phi"},
                    "eta": {"branch": "seg_posGlb_eta"},
                    "nHits_phi": {"branch": "seg_phi_nHits"},
                    "nHits_z": {"branch": "seg_z_nHits"},
                },
            },
            "tps": {
                "class": "dtpr.particles.Ph2TP",
                "amount": "ph2TpgPhiEmuAm_BX",
                "attributes": {
                    "wh": {"branch": "ph2TpgPhiEmuAm_wheel"},
                    "sc": {"branch": "ph2TpgPhiEmuAm_sector"},
                    "st": {"branch": "ph2TpgPhiEmuAm_station"},
                    "phi": {"branch": "ph2TpgPhiEmuAm_phi"},
                    "BX": {"branch": "ph2TpgPhiEmuAm_BX"},
                },
            },
        },
        "preprocessors": {
            "matching": {"src": "dtpr.preprocessors.genmuon_matches"},
            "showers": {"src": "dtpr.preprocessors.genmuon_showers"},
        },
        "selectors": {
            "baseline": {"src": "dtpr.selectors.baseline"},
        },
    }))
    .unwrap()
}

fn record(number: i64, seg_stations: &[i64]) -> Record {
    let n = seg_stations.len();
    Record::new()
        .with_scalar("event_eventNumber", number)
        .with_vector("gen_pt", [25.0, 40.0])
        .with_vector("gen_eta", [0.1, -1.0])
        .with_vector("gen_phi", [0.05, 2.0])
        .with_vector("seg_wheel", vec![1i64; n])
        .with_vector("seg_sector", vec![3i64; n])
        .with_vector("seg_station", seg_stations.to_vec())
        .with_vector("seg_posGlb_phi", vec![0.06; n])
        .with_vector("seg_posGlb_eta", vec![0.12; n])
        .with_vector("seg_phi_nHits", vec![6i64; n])
        .with_vector("seg_z_nHits", vec![6i64; n])
        .with_vector("ph2TpgPhiEmuAm_wheel", [1i64])
        .with_vector("ph2TpgPhiEmuAm_sector", [3i64])
        .with_vector("ph2TpgPhiEmuAm_station", [2i64])
        // 0.06 rad global phi in sector 3
        .with_vector("ph2TpgPhiEmuAm_phi", [(0.06 - PI / 3.0) * 131_072.0])
        .with_vector("ph2TpgPhiEmuAm_BX", [20i64])
}

fn event_list(records: Vec<Record>) -> EventList {
    let config = config();
    let registry = builtin_registry();
    let schema = EventSchema::compile(&config, registry).unwrap();
    let mut pipeline = Pipeline::new();
    for (name, stage) in config.preprocessors.iter() {
        pipeline.add_preprocessor(
            registry
                .preprocessor(name, &stage.src, &stage.kwargs)
                .unwrap(),
        );
    }
    for (name, stage) in config.selectors.iter() {
        pipeline.add_selector(registry.selector(name, &stage.src, &stage.kwargs).unwrap());
    }
    let source: MemorySource = records.into_iter().collect();
    EventList::new(Arc::new(source), Arc::new(schema), Arc::new(pipeline))
}

#[test]
fn test_configured_pipeline_matches_and_tags_showers() {
    let events = event_list(vec![
        record(10, &[2, 2, 3]),
        record(11, &[1, 2, 3]),
        record(12, &[]),
    ]);

    let showered = events.get(0).unwrap().unwrap();
    // Sorted by descending pt: the matching muon is second.
    let gms = showered.collection("genmuons").unwrap();
    assert!(!gms[0].get_bool(SHOWERED).unwrap());
    assert!(gms[1].get_bool(SHOWERED).unwrap());
    assert_eq!(gms[1].refs(MATCHED_SEGMENTS).unwrap().len(), 3);
    assert_eq!(gms[1].refs(MATCHED_TPS).unwrap(), &[ParticleRef::new("tps", 0)]);
    let tp = &showered.collection("tps").unwrap()[0];
    assert_eq!(tp.get_i64("BX").unwrap(), 0);
    assert_eq!(tp.refs(MATCHED_SEGMENTS).unwrap().len(), 2);

    let clean = events.get(1).unwrap().unwrap();
    assert_eq!(clean.number, 11);
    assert!(!clean.collection("genmuons").unwrap()[1].get_bool(SHOWERED).unwrap());

    assert!(events.get(2).unwrap().is_none());
    assert_eq!(events.iter().filter(|e| matches!(e, Ok(Some(_)))).count(), 2);
}

fn random_event(
    genmuons: Vec<(f64, f64)>,
    segments: Vec<(f64, f64, i64, i64, i64)>,
) -> Event {
    let mut event = Event::new(0);
    event.set(
        "genmuons",
        genmuons
            .into_iter()
            .enumerate()
            .map(|(i, (phi, eta))| Particle::new(i, "GenMuon").with("phi", phi).with("eta", eta))
            .collect::<Vec<_>>(),
    );
    event.set(
        "segments",
        segments
            .into_iter()
            .enumerate()
            .map(|(i, (phi, eta, hp, hz, st))| {
                Particle::new(i, "Segment")
                    .with("wh", 0)
                    .with("sc", 1)
                    .with("st", st)
                    .with("phi", phi)
                    .with("eta", eta)
                    .with("nHits_phi", hp)
                    .with("nHits_z", hz)
            })
            .collect::<Vec<_>>(),
    );
    event.set("tps", Vec::<Particle>::new());
    event
}

proptest! {
    #[test]
    fn test_angular_difference_ignores_full_turns(x in -10.0f64..10.0) {
        prop_assert!(angular_difference(x, x + TAU).abs() < 1e-7);
        prop_assert!((angular_difference(0.0, PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn test_delta_phi_stays_in_half_open_range(a in -20.0f64..20.0, b in -20.0f64..20.0) {
        let d = delta_phi(a, b);
        prop_assert!(d > -PI && d <= PI);
        prop_assert!((d.abs() - angular_difference(a, b)).abs() < 1e-6);
    }

    #[test]
    fn test_matching_is_symmetric_and_idempotent(
        genmuons in prop::collection::vec((-3.0f64..3.0, -1.2f64..1.2), 0..4),
        segments in prop::collection::vec(
            (-3.0f64..3.0, -1.2f64..1.2, 2i64..8, 2i64..8, 1i64..5),
            0..8,
        ),
    ) {
        let mut event = random_event(genmuons, segments);
        let config = MatchingConfig { max_dphi: 0.8, max_deta: 0.8, ..MatchingConfig::default() };
        match_genmuons(&mut event, &config).unwrap();
        let once = event.clone();
        match_genmuons(&mut event, &config).unwrap();

        for (g, gm) in event.collection("genmuons").unwrap().iter().enumerate() {
            let refs = gm.refs(MATCHED_SEGMENTS).unwrap();
            let mut unique = refs.to_vec();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), refs.len());
            prop_assert_eq!(refs, once.collection("genmuons").unwrap()[g].refs(MATCHED_SEGMENTS).unwrap());
            for seg in event.resolve_refs(gm, MATCHED_SEGMENTS).unwrap() {
                prop_assert!(seg.refs(MATCHED_GENMUONS).unwrap().contains(&ParticleRef::new("genmuons", g)));
            }
        }
        for (s, seg) in event.collection("segments").unwrap().iter().enumerate() {
            for gm in event.resolve_refs(seg, MATCHED_GENMUONS).unwrap() {
                prop_assert!(gm.refs(MATCHED_SEGMENTS).unwrap().contains(&ParticleRef::new("segments", s)));
            }
        }
    }
}
