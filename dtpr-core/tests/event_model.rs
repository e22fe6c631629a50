//! End-to-end checks of the event model: schema compilation, lazy access
//! and particle identity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dtpr_core::{
    Error, EventList, EventSchema, MemorySource, Particle, Pipeline, Record, Registry, RunConfig,
    Scalar, Selector, Value,
};
use proptest::prelude::*;
use serde_json::json;

fn source(n: usize) -> MemorySource {
    (0..n)
        .map(|i| {
            let i = i64::try_from(i).unwrap();
            Record::new()
                .with_scalar("event_eventNumber", 1000 + i)
                .with_vector("seg_wheel", (0..i % 4).map(|k| k - 1))
                .with_vector("seg_station", (0..i % 4).map(|k| k + 1))
                .with_vector("digi_time", [100.0 + i as f64, 612.0])
        })
        .collect()
}

fn schema() -> EventSchema {
    let config = RunConfig::from_value(json!({
        "event_number_column": "event_eventNumber",
        "particle_types": {
            "segments": {
                "amount": "seg_wheel",
                "attributes": {
                    "wh": {"branch": "seg_wheel"},
                    "st": {"branch": "seg_station"},
                    "side": {"expr": "'+z' if wh > 0 else '-z'"},
                },
            },
            "digis": {
                "amount": 2,
                "attributes": {
                    "time": {"branch": "digi_time"},
                    "BX": {"expr": "time // 25", "type": "int"},
                },
                "sorter": {"by": "p.BX"},
            },
        },
    }))
    .unwrap();
    EventSchema::compile(&config, &Registry::new()).unwrap()
}

fn event_list(n: usize, pipeline: Pipeline) -> EventList {
    EventList::new(Arc::new(source(n)), Arc::new(schema()), Arc::new(pipeline))
}

fn numbers(events: impl Iterator<Item = dtpr_core::Result<Option<dtpr_core::Event>>>) -> Vec<Option<i64>> {
    events
        .map(|e| e.unwrap().map(|event| event.number))
        .collect()
}

#[test]
fn test_get_agrees_with_iteration() {
    let events = event_list(9, Pipeline::new());
    let iterated = numbers(events.iter());
    let indexed: Vec<Option<i64>> = (0..9)
        .map(|i| events.get(i).unwrap().map(|e| e.number))
        .collect();
    assert_eq!(iterated, indexed);
    assert_eq!(
        events.get(-1).unwrap().map(|e| e.number),
        *iterated.last().unwrap()
    );
}

#[test]
fn test_to_dict_lists_every_particle() {
    let events = event_list(4, Pipeline::new());
    let event = events.get(3).unwrap().unwrap();
    let dict = event.to_dict();
    assert_eq!(dict["number"], 1003);
    assert_eq!(
        dict["segments"].as_array().unwrap().len(),
        event.collection("segments").unwrap().len()
    );
    assert_eq!(dict["segments"][0]["name"], "Segment");
    assert_eq!(dict["digis"][1]["BX"], 24);
}

#[test]
fn test_rejected_events_keep_their_slot() {
    let pipeline = Pipeline::new().with_selector(Selector::new("has_segments", |ev: &dtpr_core::Event| {
        Ok(!ev.require("segments")?.is_empty())
    }));
    let events = event_list(8, pipeline);
    assert_eq!(events.len(), 8);
    let kept: Vec<bool> = numbers(events.iter()).iter().map(Option::is_some).collect();
    assert_eq!(kept, vec![false, true, true, true, false, true, true, true]);
}

#[test]
fn test_filter_particles_by_attribute() {
    let events = event_list(4, Pipeline::new());
    let event = events.get(3).unwrap().unwrap();
    let south = event
        .filter_particles("segments", &[("side", Value::from("-z"))])
        .unwrap();
    assert_eq!(south.len(), 2);
    assert!(matches!(
        event.filter_particles("segments", &[("sc", Value::from(1))]),
        Err(Error::InvalidFilterKey { .. })
    ));
    assert!(event.filter_particles("showers", &[]).unwrap().is_empty());
}

#[test]
fn test_unknown_particle_class_fails_before_reading() {
    let config = RunConfig::from_value(json!({
        "particle_types": {"tps": {"amount": 1, "class": "dtpr.particles.Nope"}},
    }))
    .unwrap();
    let err = EventSchema::compile(&config, &Registry::new()).unwrap_err();
    assert!(err.is_config());
}

fn hash_of(p: &Particle) -> u64 {
    let mut h = DefaultHasher::new();
    p.hash(&mut h);
    h.finish()
}

fn scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        any::<bool>().prop_map(Scalar::Bool),
        (-1000i64..1000).prop_map(Scalar::Int),
        (-1.0e3f64..1.0e3).prop_map(Scalar::Float),
        "[a-z]{0,6}".prop_map(Scalar::Str),
    ]
}

fn attributes() -> impl Strategy<Value = Vec<(String, Scalar)>> {
    prop::collection::btree_map("[a-z]{1,5}", scalar(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn test_identity_never_affects_equality_or_hash(
        attrs in attributes(),
        (i, j) in (0usize..100, 0usize..100),
        names in ("[A-Z][a-z]{0,5}", "[A-Z][a-z]{0,5}"),
    ) {
        let mut a = Particle::new(i, names.0);
        for (k, v) in &attrs {
            a.set(k, v.clone());
        }
        let mut b = Particle::new(j, names.1);
        for (k, v) in attrs.iter().rev() {
            b.set(k, v.clone());
        }
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_slices_agree_with_iteration(
        n in 0usize..12,
        start in proptest::option::of(-15isize..15),
        stop in proptest::option::of(-15isize..15),
        step in prop_oneof![-4isize..0, 1isize..5],
    ) {
        let events = event_list(n, Pipeline::new());
        let all = numbers(events.iter());
        let sliced = numbers(events.slice(start, stop, Some(step)).unwrap());

        // Reference slice computed by walking indices.
        let len = isize::try_from(n).unwrap();
        let clamp = |b: isize, lo: isize, hi: isize| b.max(lo).min(hi);
        let resolve = |b: isize| if b < 0 { b + len } else { b };
        let expected: Vec<Option<i64>> = if step > 0 {
            let s = start.map_or(0, |b| clamp(resolve(b), 0, len));
            let e = stop.map_or(len, |b| clamp(resolve(b), 0, len));
            (s..e.max(s)).step_by(step.unsigned_abs()).map(|i| all[i.unsigned_abs()]).collect()
        } else {
            let s = start.map_or(len - 1, |b| clamp(resolve(b), -1, len - 1));
            let e = stop.map_or(-1, |b| clamp(resolve(b), -1, len - 1));
            let mut out = Vec::new();
            let mut i = s;
            while i > e {
                out.push(all[i.unsigned_abs()]);
                i += step;
            }
            out
        };
        prop_assert_eq!(&sliced, &expected);
        // Reissuing the slice yields the same sequence.
        prop_assert_eq!(numbers(events.slice(start, stop, Some(step)).unwrap()), expected);
    }
}
