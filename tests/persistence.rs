//! Integration tests: error counts and round snapshots survive a trip
//! through disk, and a second round can be seeded from the first.

use std::collections::BTreeMap;

use riskmart::betting::GeneralAdaptiveBetting;
use riskmart::config::AuditConfig;
use riskmart::error::AuditError;
use riskmart::error_counts::ClcaErrorCounts;
use riskmart::persist::{self, RoundSnapshot};
use riskmart::population::Population;
use riskmart::simulate::{run_simulated_audit, SimulationSpec};
use riskmart::taus::TauCategory;

fn seven_category_counts() -> ClcaErrorCounts {
    let counts: BTreeMap<TauCategory, usize> = [
        (TauCategory::WinLos, 1),
        (TauCategory::WinOth, 4),
        (TauCategory::OthLos, 7),
        (TauCategory::LosOth, 2),
        (TauCategory::LosWin, 1),
    ]
    .into_iter()
    .collect();
    ClcaErrorCounts::new(counts, 1234, 1.0 / (2.0 - 0.017), 1.3)
}

#[test]
fn test_error_counts_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counts.json");
    let counts = seven_category_counts();

    persist::write_json(&path, &counts).unwrap();
    let back: ClcaErrorCounts = persist::read_json(&path).unwrap();

    assert_eq!(back, counts);
    assert_eq!(back.rates(), counts.rates());
    assert_eq!(back.bassort_values(), counts.bassort_values());
    for lambda in [0.0, 0.3, 1.1, 1.7] {
        assert_eq!(back.expected_log_growth(lambda, 0.5), counts.expected_log_growth(lambda, 0.5));
    }
}

#[test]
fn test_round_snapshot_seeds_next_round() {
    let dir = tempfile::tempdir().unwrap();
    let config = AuditConfig::default();
    let spec = SimulationSpec {
        contest_id: 3,
        votes: vec![560, 440],
        undervotes: 10,
        phantoms: 2,
        fuzz_pct: 0.01,
        max_samples: 60,
    };
    let result = run_simulated_audit(&spec, &config, 77).unwrap();
    let snapshot = RoundSnapshot::new(spec.contest_id, 1, result);

    let path = persist::write_snapshot(dir.path(), &snapshot).unwrap();
    assert!(path.ends_with("contest-3-round-1.json"));
    assert!(persist::manifest_path(&path).exists());

    let back = persist::read_snapshot(&path).unwrap();
    assert_eq!(back, snapshot);
    assert_eq!(back.error_counts, back.result.tracker.error_counts());

    let noerror = back.error_counts.noerror();
    let population = Population::new(1012, 2, 1.0, noerror);
    let betting = GeneralAdaptiveBetting::new(&population, back.error_counts.clone(), None, &config);
    assert_eq!(betting.estimator().prior(), &snapshot.error_counts);

    let starting = betting.estimator().starting_rates();
    for (cat, rate) in &starting {
        let floor = if *cat == TauCategory::WinOth { 2.0 / 1012.0 } else { 0.0 };
        assert!((rate - snapshot.error_counts.rate(*cat).max(floor)).abs() < 1e-15, "{:?}", cat);
    }
}

#[test]
fn test_edited_snapshot_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = AuditConfig::default();
    let spec = SimulationSpec {
        contest_id: 4,
        votes: vec![700, 300],
        undervotes: 0,
        phantoms: 0,
        fuzz_pct: 0.0,
        max_samples: 100,
    };
    let result = run_simulated_audit(&spec, &config, 5).unwrap();
    let path = persist::write_snapshot(dir.path(), &RoundSnapshot::new(4, 1, result)).unwrap();

    let body = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, body.replacen("\"round\": 1", "\"round\": 2", 1)).unwrap();

    match persist::read_snapshot(&path) {
        Err(AuditError::SnapshotMismatch { expected, actual, .. }) => assert_ne!(expected, actual),
        other => panic!("expected SnapshotMismatch, got {:?}", other.map(|s| s.round)),
    }
}
