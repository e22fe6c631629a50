//! Built-in particle classes, attribute functions, selectors and
//! preprocessors, registered under their dotted `dtpr.*` identifiers.

use std::sync::OnceLock;

use serde::Deserialize;

use dtpr_core::{parse_kwargs, Event, Particle, ParticleClass, Registry, Result, Value};

use crate::geometry::{delta_r, normalize_sector, tp_global_phi, TP_PHI_RESOLUTION};
use crate::matching::{
    match_genmuons, match_quality, MatchingConfig, MATCHED_GENMUONS, MATCHED_SEGMENTS, MATCHED_TPS,
};
use crate::shower::{drop_showered_tps, tag_showers, DropShoweredConfig, ShowerConfig, SHOWERED};

/// Offset subtracted from the raw TP bunch crossing so the nominal one is 0.
pub const TP_BX_OFFSET: i64 = 20;
/// Length of one bunch crossing in nanoseconds.
pub const BX_LENGTH_NS: f64 = 25.0;

/// The registry of built-in stages, built on first use.
pub fn builtin_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::new();
        register_builtins(&mut registry);
        registry
    })
}

/// Registers every built-in entry into `registry`.
pub fn register_builtins(registry: &mut Registry) {
    register_classes(registry);
    register_functions(registry);
    register_selectors(registry);
    register_preprocessors(registry);
}

fn empty_refs() -> Value {
    Value::RefList(Vec::new())
}

fn register_classes(registry: &mut Registry) {
    registry
        .register_class(
            "dtpr.particles.GenMuon",
            ParticleClass::new("GenMuon")
                .with_default(MATCHED_SEGMENTS, empty_refs())
                .with_default(MATCHED_TPS, empty_refs())
                .with_default(SHOWERED, false),
        )
        .register_class(
            "dtpr.particles.Segment",
            ParticleClass::new("Segment")
                .with_default(MATCHED_GENMUONS, empty_refs())
                .with_default(MATCHED_TPS, empty_refs()),
        )
        .register_class(
            "dtpr.particles.Ph2TP",
            ParticleClass::new("Ph2TP")
                .with_default(MATCHED_SEGMENTS, empty_refs())
                .with_finalize(recenter_bx),
        )
        .register_class(
            "dtpr.particles.Digi",
            ParticleClass::new("Digi").with_finalize(bx_from_time),
        )
        .register_class("dtpr.particles.SimHit", ParticleClass::new("SimHit"))
        .register_class("dtpr.particles.Shower", ParticleClass::new("Shower"));
}

fn recenter_bx(tp: &mut Particle) -> Result<()> {
    if tp.has("BX") {
        let bx = tp.get_i64("BX")?;
        tp.set("BX", bx - TP_BX_OFFSET);
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn bx_from_time(digi: &mut Particle) -> Result<()> {
    if digi.has("time") {
        let time = digi.get_f64("time")?;
        digi.set("BX", (time / BX_LENGTH_NS).floor() as i64);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GlobalPhiArgs {
    phi: String,
    sector: String,
    resolution: f64,
}

impl Default for GlobalPhiArgs {
    fn default() -> Self {
        Self {
            phi: "phi".into(),
            sector: "sc".into(),
            resolution: TP_PHI_RESOLUTION,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SectorArgs {
    sector: String,
}

impl Default for SectorArgs {
    fn default() -> Self {
        Self { sector: "sc".into() }
    }
}

fn register_functions(registry: &mut Registry) {
    registry
        .register_attribute("dtpr.functions.tp_global_phi", |kwargs| {
            let args: GlobalPhiArgs = parse_kwargs(kwargs)?;
            Ok(move |p: &Particle| -> Result<Value> {
                let phi = tp_global_phi(p.get_f64(&args.phi)?, p.get_i64(&args.sector)?, args.resolution);
                Ok(Value::from(phi))
            })
        })
        .register_attribute("dtpr.functions.normalized_sector", |kwargs| {
            let args: SectorArgs = parse_kwargs(kwargs)?;
            Ok(move |p: &Particle| -> Result<Value> {
                Ok(Value::from(normalize_sector(p.get_i64(&args.sector)?)))
            })
        });
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MinGenMuonArgs {
    genmuons: String,
    count: usize,
}

impl Default for MinGenMuonArgs {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            count: 2,
        }
    }
}

fn register_selectors(registry: &mut Registry) {
    registry
        // At least one generator muon with a matched segment.
        .register_selector("dtpr.selectors.baseline", |kwargs| {
            #[derive(Deserialize)]
            #[serde(deny_unknown_fields)]
            struct Args {
                #[serde(default = "genmuons")]
                genmuons: String,
            }
            let Args { genmuons } = parse_kwargs(kwargs)?;
            Ok(move |event: &Event| -> Result<bool> {
                for genmuon in event.collection(&genmuons).unwrap_or_default() {
                    if !genmuon.refs(MATCHED_SEGMENTS)?.is_empty() {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
        })
        .register_selector("dtpr.selectors.min_genmuons", |kwargs| {
            let args: MinGenMuonArgs = parse_kwargs(kwargs)?;
            Ok(move |event: &Event| -> Result<bool> {
                Ok(event.collection(&args.genmuons).map_or(0, <[_]>::len) >= args.count)
            })
        });
}

fn genmuons() -> String {
    "genmuons".into()
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DeltaRArgs {
    genmuons: String,
    field: String,
    dummy_value: f64,
}

impl Default for DeltaRArgs {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            field: "dR".into(),
            dummy_value: -999.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MatchQualityArgs {
    genmuons: String,
    resolution: f64,
    dummy_value: f64,
}

impl Default for MatchQualityArgs {
    fn default() -> Self {
        Self {
            genmuons: "genmuons".into(),
            resolution: TP_PHI_RESOLUTION,
            dummy_value: -99.0,
        }
    }
}

fn annotate_match_quality(event: &mut Event, args: &MatchQualityArgs) -> Result<()> {
    let qualities = event
        .require(&args.genmuons)?
        .iter()
        .map(|gm| match_quality(event, gm, args.resolution))
        .collect::<Result<Vec<_>>>()?;
    if let Some(genmuons) = event.collection_mut(&args.genmuons) {
        for (gm, quality) in genmuons.iter_mut().zip(qualities) {
            for (key, value) in quality.fields() {
                gm.set(key, value.unwrap_or(args.dummy_value));
            }
        }
    }
    Ok(())
}

fn register_preprocessors(registry: &mut Registry) {
    registry
        .register_preprocessor("dtpr.preprocessors.genmuon_matches", |kwargs| {
            let config: MatchingConfig = parse_kwargs(kwargs)?;
            Ok(move |event: &mut Event| -> Result<()> {
                match_genmuons(event, &config).map(drop)
            })
        })
        // Runs after genmuon_matches; unmatched metrics get the dummy value.
        .register_preprocessor("dtpr.preprocessors.match_quality", |kwargs| {
            let args: MatchQualityArgs = parse_kwargs(kwargs)?;
            Ok(move |event: &mut Event| -> Result<()> { annotate_match_quality(event, &args) })
        })
        .register_preprocessor("dtpr.preprocessors.genmuon_showers", |kwargs| {
            let config: ShowerConfig = parse_kwargs(kwargs)?;
            Ok(move |event: &mut Event| -> Result<()> { tag_showers(event, &config).map(drop) })
        })
        // dR between the two generator muons, or a dummy value unless
        // there are exactly two.
        .register_preprocessor("dtpr.preprocessors.delta_r", |kwargs| {
            let args: DeltaRArgs = parse_kwargs(kwargs)?;
            Ok(move |event: &mut Event| -> Result<()> {
                let dr = match event.collection(&args.genmuons) {
                    Some([a, b]) => delta_r(
                        a.get_f64("eta")?,
                        a.get_f64("phi")?,
                        b.get_f64("eta")?,
                        b.get_f64("phi")?,
                    ),
                    _ => args.dummy_value,
                };
                event.set(&args.field, dr);
                Ok(())
            })
        })
        .register_preprocessor("dtpr.preprocessors.drop_showered_tps", |kwargs| {
            let config: DropShoweredConfig = parse_kwargs(kwargs)?;
            Ok(move |event: &mut Event| -> Result<()> {
                drop_showered_tps(event, &config).map(drop)
            })
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtpr_core::{Kwargs, Record};
    use serde_json::json;

    fn kwargs(value: serde_json::Value) -> Kwargs {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Kwargs::new(),
        }
    }

    #[test]
    fn test_classes() {
        let registry = builtin_registry();
        let tp_class = registry.class("dtpr.particles.Ph2TP").unwrap();
        let mut tp = Particle::new(0, "Ph2TP").with("BX", 20);
        (tp_class.finalize.unwrap())(&mut tp).unwrap();
        assert_eq!(tp.get_i64("BX").unwrap(), 0);

        let digi_class = registry.class("dtpr.particles.Digi").unwrap();
        let mut digi = Particle::new(0, "Digi").with("time", 612.5);
        (digi_class.finalize.unwrap())(&mut digi).unwrap();
        assert_eq!(digi.get_i64("BX").unwrap(), 24);

        let gm = registry.class("dtpr.particles.GenMuon").unwrap();
        assert!(gm.defaults.iter().any(|(k, v)| k == SHOWERED && *v == Value::from(false)));
        assert!(registry.class("dtpr.particles.Muon").is_err());
    }

    #[test]
    fn test_functions() {
        let registry = builtin_registry();
        let gphi = registry
            .attribute("dtpr.functions.tp_global_phi", &Kwargs::new())
            .unwrap();
        let tp = Particle::new(0, "Ph2TP").with("phi", 0.0).with("sc", 4);
        let value = gphi(&tp).unwrap();
        assert!((value.as_scalar().unwrap().as_f64().unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        let sector = registry
            .attribute("dtpr.functions.normalized_sector", &kwargs(json!({"sector": "sector"})))
            .unwrap();
        assert_eq!(sector(&Particle::new(0, "Segment").with("sector", 14)).unwrap(), Value::from(10));

        assert!(registry
            .attribute("dtpr.functions.tp_global_phi", &kwargs(json!({"scale": 2})))
            .err()
            .unwrap()
            .is_config());
    }

    #[test]
    fn test_selectors() {
        let registry = builtin_registry();
        let mut event = Event::new(0);
        event.set(
            "genmuons",
            vec![Particle::new(0, "GenMuon"), Particle::new(1, "GenMuon")],
        );

        let min = registry
            .selector("two", "dtpr.selectors.min_genmuons", &Kwargs::new())
            .unwrap();
        assert!(min.accepts(&event).unwrap());
        let three = registry
            .selector("three", "dtpr.selectors.min_genmuons", &kwargs(json!({"count": 3})))
            .unwrap();
        assert!(!three.accepts(&event).unwrap());

        let baseline = registry
            .selector("baseline", "dtpr.selectors.baseline", &Kwargs::new())
            .unwrap();
        assert!(!baseline.accepts(&event).unwrap());
        event.collection_mut("genmuons").unwrap()[1]
            .push_ref(MATCHED_SEGMENTS, dtpr_core::ParticleRef::new("segments", 0))
            .unwrap();
        assert!(baseline.accepts(&event).unwrap());
        assert!(!baseline.accepts(&Event::new(1)).unwrap());
    }

    #[test]
    fn test_delta_r_preprocessor() {
        let registry = builtin_registry();
        let dr = registry
            .preprocessor("dr", "dtpr.preprocessors.delta_r", &Kwargs::new())
            .unwrap();

        let mut event = Event::new(0);
        event.set(
            "genmuons",
            vec![
                Particle::new(0, "GenMuon").with("eta", 0.0).with("phi", 0.0),
                Particle::new(1, "GenMuon").with("eta", 0.3).with("phi", 0.4),
            ],
        );
        dr.run(&mut event).unwrap();
        let value = event.field("dR").unwrap().as_scalar().unwrap().as_f64().unwrap();
        assert!((value - 0.5).abs() < 1e-12);

        let mut single = Event::new(1);
        single.set("genmuons", Particle::new(0, "GenMuon"));
        dr.run(&mut single).unwrap();
        assert_eq!(single.field("dR"), Some(&Value::from(-999.0)));
    }

    #[test]
    fn test_match_quality_preprocessor() {
        let registry = builtin_registry();
        let matching = registry
            .preprocessor("matching", "dtpr.preprocessors.genmuon_matches", &Kwargs::new())
            .unwrap();
        let quality = registry
            .preprocessor("quality", "dtpr.preprocessors.match_quality", &Kwargs::new())
            .unwrap();

        let mut event = Event::new(0);
        event.set(
            "genmuons",
            vec![
                Particle::new(0, "GenMuon").with("phi", 0.05).with("eta", 0.1),
                Particle::new(1, "GenMuon").with("phi", 2.0).with("eta", -1.0),
            ],
        );
        event.set(
            "segments",
            vec![
                Particle::new(0, "Segment")
                    .with("wh", 1)
                    .with("sc", 1)
                    .with("st", 1)
                    .with("phi", 0.07)
                    .with("eta", 0.1)
                    .with("nHits_phi", 6)
                    .with("nHits_z", 6),
                Particle::new(1, "Segment")
                    .with("wh", 1)
                    .with("sc", 1)
                    .with("st", 2)
                    .with("phi", 0.02)
                    .with("eta", 0.15)
                    .with("nHits_phi", 6)
                    .with("nHits_z", 6),
            ],
        );
        event.set("tps", Vec::<Particle>::new());
        matching.run(&mut event).unwrap();
        quality.run(&mut event).unwrap();

        let gms = event.collection("genmuons").unwrap();
        let get = |i: usize, key: &str| gms[i].get_f64(key).unwrap();
        assert!((get(0, "max_dphi") - 0.03).abs() < 1e-9);
        assert!((get(0, "max_deta") - 0.05).abs() < 1e-9);
        assert!((get(0, "max_segment_dphi") - 0.05).abs() < 1e-9);
        assert_eq!(get(0, "max_tp_dphi"), -99.0);
        assert_eq!(get(1, "max_dphi"), -99.0);

        let mut bare = Event::new(1);
        assert!(quality.run(&mut bare).is_err());
    }

    #[test]
    fn test_unknown_stage() {
        let err = builtin_registry()
            .preprocessor("x", "dtpr.preprocessors.nope", &Kwargs::new())
            .unwrap_err();
        assert!(err.is_config());
        let err = builtin_registry()
            .preprocessor("x", "dtpr.preprocessors.genmuon_matches", &kwargs(json!({"bogus": 1})))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_registry_drives_builder() {
        let config = dtpr_core::RunConfig::from_value(json!({
            "particle_types": {
                "tps": {
                    "class": "dtpr.particles.Ph2TP",
                    "amount": "tp_bx",
                    "attributes": {
                        "BX": {"branch": "tp_bx"},
                        "sc": {"branch": "tp_sc"},
                        "phi": {"branch": "tp_phi"},
                        "gphi": {"src": "dtpr.functions.tp_global_phi"},
                    },
                },
            },
        }))
        .unwrap();
        let schema = dtpr_core::EventSchema::compile(&config, builtin_registry()).unwrap();
        let record = Record::new()
            .with_vector("tp_bx", [20i64, 23])
            .with_vector("tp_sc", [1i64, 1])
            .with_vector("tp_phi", [0.0, 0.0]);
        let event = schema.build_event(&record, 0).unwrap();
        let tps = event.collection("tps").unwrap();
        assert_eq!(tps[0].name, "Ph2TP");
        assert_eq!(tps[0].get_i64("BX").unwrap(), 0);
        assert_eq!(tps[1].get_i64("BX").unwrap(), 3);
        assert!(tps[1].refs(MATCHED_SEGMENTS).unwrap().is_empty());
    }
}
