use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use dtpr_algorithms::{classify, Class, ConfusionConfig, ConfusionMatrix, MATCHED_SEGMENTS};
use dtpr_io::{load_run_config, EventWriter, NTuple};
use serde_json::{json, Value};
use tempfile::TempDir;

const TYPES: &str = "\
genmuons:
  class: dtpr.particles.GenMuon
  amount: gen_pt
  attributes:
    pt: {branch: gen_pt}
    eta: {branch: gen_eta}
    phi: {branch: gen_phi}
  sorter: {by: p.pt, reverse: true}
segments:
  class: dtpr.particles.Segment
  amount: seg_wheel
  attributes:
    wh: {branch: seg_wheel}
    sc: {branch: seg_sector}
    st: {branch: seg_station}
    phi: {branch: seg_posGlb_phi}
    eta: {branch: seg_posGlb_eta}
    nHits_phi: {branch: seg_phi_nHits}
    nHits_z: {branch: seg_z_nHits}
tps:
  class: dtpr.particles.Ph2TP
  amount: tp_BX
  attributes:
    wh: {branch: tp_wheel}
    sc: {branch: tp_sector}
    st: {branch: tp_station}
    phi: {branch: tp_phi}
    BX: {branch: tp_BX}
";

const RUN: &str = "\
event_number_column: event_eventNumber
particle_types:
  <<: !include types.yaml
  fwshowers: &shower
    class: dtpr.particles.Shower
    amount: fw_wh
    attributes:
      wh: {branch: fw_wh}
      sc: {branch: fw_sc}
      st: {branch: fw_st}
  realshowers:
    <<: *shower
    amount: real_wh
    attributes:
      wh: {branch: real_wh}
      sc: {branch: real_sc}
      st: {branch: real_st}
preprocessors:
  matching: {src: dtpr.preprocessors.genmuon_matches}
selectors:
  baseline: {src: dtpr.selectors.baseline}
";

fn record(number: i64, stations: &[i64], true_shower: bool) -> Value {
    let n = stations.len();
    let real: &[i64] = if true_shower { &[1] } else { &[] };
    let real_st: &[i64] = if true_shower { &[2] } else { &[] };
    let real_sc: &[i64] = if true_shower { &[3] } else { &[] };
    json!({
        "event_eventNumber": number,
        "gen_pt": [25.0, 40.0],
        "gen_eta": [0.1, -1.0],
        "gen_phi": [0.05, 2.0],
        "seg_wheel": vec![1; n],
        "seg_sector": vec![3; n],
        "seg_station": stations,
        "seg_posGlb_phi": vec![0.06; n],
        "seg_posGlb_eta": vec![0.12; n],
        "seg_phi_nHits": vec![6; n],
        "seg_z_nHits": vec![6; n],
        "tp_wheel": [1],
        "tp_sector": [3],
        "tp_station": [2],
        "tp_phi": [(0.06 - PI / 3.0) * 131_072.0],
        "tp_BX": [20],
        "fw_wh": [1],
        "fw_sc": [3],
        "fw_st": [2],
        "real_wh": real,
        "real_sc": real_sc,
        "real_st": real_st,
    })
}

fn write_lines(path: &Path, records: &[Value]) {
    let lines: Vec<String> = records.iter().map(Value::to_string).collect();
    fs::write(path, lines.join("\n\n") + "\n").unwrap();
}

fn dataset() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("types.yaml"), TYPES).unwrap();
    fs::write(dir.path().join("run.yaml"), RUN).unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    write_lines(
        &data.join("ntuple_10.jsonl"),
        &[record(12, &[], false)],
    );
    write_lines(
        &data.join("ntuple_2.jsonl"),
        &[record(10, &[2, 2, 3], true), record(11, &[1, 2, 3], false)],
    );
    dir
}

#[test]
fn test_layered_config_drives_ntuple() {
    let dir = dataset();
    let config = load_run_config(dir.path().join("run.yaml")).unwrap();
    assert_eq!(
        config.particle_types.keys().collect::<Vec<_>>(),
        vec!["genmuons", "segments", "tps", "fwshowers", "realshowers"]
    );

    let ntuple = NTuple::open(dir.path().join("data"), config).unwrap();
    assert_eq!(ntuple.len(), 3);

    let numbers: Vec<_> = ntuple
        .events()
        .iter()
        .map(|ev| ev.unwrap().map(|e| e.number))
        .collect();
    assert_eq!(numbers, vec![Some(10), Some(11), None]);

    let last = ntuple.events().get(-1).unwrap();
    assert!(last.is_none());
    let first = ntuple.events().find_by_number(10).unwrap().unwrap();
    let gm = &first.collection("genmuons").unwrap()[1];
    assert_eq!(gm.refs(MATCHED_SEGMENTS).unwrap().len(), 3);
    assert_eq!(first.collection("realshowers").unwrap().len(), 1);
}

#[test]
fn test_confusion_matrix_over_partitions() {
    let dir = dataset();
    let config = load_run_config(dir.path().join("run.yaml")).unwrap();
    let ntuple = NTuple::open(dir.path().join("data"), config).unwrap();

    let classification = ConfusionConfig::default();
    let matrix = ntuple
        .par_fold(
            1,
            ConfusionMatrix::new,
            |mut matrix, event| {
                if let Some(event) = event {
                    matrix.extend(&classify(&event, &classification).unwrap());
                }
                matrix
            },
            ConfusionMatrix::merge,
        )
        .unwrap();

    assert_eq!(matrix.count(1, Class::TruePositive), 1);
    assert_eq!(matrix.count(1, Class::FalsePositive), 1);
    assert_eq!(matrix.total(Class::FalseNegative), 0);
    assert_relative_eq!(matrix.efficiency(1).unwrap(), 0.5);
}

#[test]
fn test_dump_accepted_events() {
    let dir = dataset();
    let config = load_run_config(dir.path().join("run.yaml")).unwrap();
    let ntuple = NTuple::builder(config)
        .input(dir.path().join("data"))
        .max_files(Some(1))
        .build()
        .unwrap();
    assert_eq!(ntuple.files(), &[dir.path().join("data/ntuple_2.jsonl")]);

    let out = dir.path().join("dump.jsonl");
    let mut writer = EventWriter::create(&out).unwrap();
    for event in ntuple.events().slice(None, None, Some(-1)).unwrap() {
        if let Some(event) = event.unwrap() {
            writer.write_event(&event).unwrap();
        }
    }
    writer.flush().unwrap();
    assert_eq!(writer.written(), 2);

    let dumped: Vec<Value> = fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(dumped[0]["number"], json!(11));
    assert_eq!(dumped[1]["number"], json!(10));
    assert_eq!(dumped[1]["tps"][0]["BX"], json!(0));
}
