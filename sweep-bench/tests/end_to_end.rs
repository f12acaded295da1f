// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Full runs of the sweep against the flat engine on generated data.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use sweep_bench::dataset::{self, TruthSet};
use sweep_bench::{run_benchmark, ExitStatus, FlatEngine, Metric, RunReport, SearchConfig};

const BASE_POINTS: usize = 500;
const QUERIES: usize = 100;
const DIM: usize = 8;
const TRUTH_DEPTH: usize = 20;

fn random_vectors(rng: &mut ChaCha8Rng, rows: usize) -> Vec<f32> {
    (0..rows * DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn exact_neighbors(base: &[f32], query: &[f32]) -> (Vec<u32>, Vec<f32>) {
    let mut scored: Vec<(f32, u32)> = base
        .chunks(DIM)
        .enumerate()
        .map(|(id, p)| {
            let d: f32 = p.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum();
            (d, id as u32)
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.truncate(TRUTH_DEPTH);
    (
        scored.iter().map(|s| s.1).collect(),
        scored.iter().map(|s| s.0).collect(),
    )
}

/// Writes `idx_base.bin`, `queries.bin` and `truth.bin` into a fresh
/// directory and returns a config over them.
fn fixture(k: usize, search_depths: Vec<u32>) -> (TempDir, SearchConfig) {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let base = random_vectors(&mut rng, BASE_POINTS);
    let queries = random_vectors(&mut rng, QUERIES);

    let mut ids = Vec::with_capacity(QUERIES * TRUTH_DEPTH);
    let mut dists = Vec::with_capacity(QUERIES * TRUTH_DEPTH);
    for q in queries.chunks(DIM) {
        let (i, d) = exact_neighbors(&base, q);
        ids.extend(i);
        dists.extend(d);
    }

    dataset::save_bin(&dir.path().join("idx_base.bin"), &base, BASE_POINTS, DIM).unwrap();
    dataset::save_bin(&dir.path().join("queries.bin"), &queries, QUERIES, DIM).unwrap();
    let truth = TruthSet {
        ids,
        dists: Some(dists),
        num_queries: QUERIES,
        dim: TRUTH_DEPTH,
    };
    dataset::save_truthset(&dir.path().join("truth.bin"), &truth).unwrap();

    let mut config = SearchConfig::new(
        dir.path().join("idx"),
        dir.path().join("queries.bin"),
        dir.path().join("res"),
        k,
        search_depths,
    );
    config.gt_file = Some(dir.path().join("truth.bin"));
    config.num_threads = 2;
    config.iostat.enabled = false;
    (dir, config)
}

fn csv_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

#[test]
fn test_sweep_writes_report_and_result_files() {
    let (dir, config) = fixture(10, vec![10, 20]);
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let outcome = run_benchmark(&config, &mut engine).unwrap();
    assert_eq!(outcome.exit_status(), ExitStatus::Success);
    assert_eq!(outcome.sweep.results.len(), 2);
    assert!(outcome.telemetry.is_none());

    // Exact search finds every true neighbor
    let best = outcome.sweep.best_recall.unwrap();
    assert!((best - 1.0).abs() < 1e-9);

    let mut reader = csv::Reader::from_path(&config.report_csv).unwrap();
    let header = reader.headers().unwrap().clone();
    assert_eq!(header.len(), 15);
    assert_eq!(&header[0], "searchDepth");
    assert_eq!(&header[14], "recallAt10");
    let rows = csv_rows(&config.report_csv);
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "10");
    assert_eq!(&rows[1][0], "20");

    for l in [10u32, 20] {
        let (idx_path, dists_path) = config.result_paths(l);
        let ids = dataset::load_bin::<u32>(&idx_path).unwrap();
        assert_eq!((ids.rows, ids.cols), (QUERIES, 10));
        let dists = dataset::load_bin::<f32>(&dists_path).unwrap();
        assert_eq!((dists.rows, dists.cols), (QUERIES, 10));
    }
    assert!(dir.path().join("res_10_idx.bin").exists());
}

#[test]
fn test_unreachable_recall_floor_fails_after_full_sweep() {
    let (_dir, mut config) = fixture(10, vec![10, 20]);
    config.fail_if_recall_below = 1.01;
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let outcome = run_benchmark(&config, &mut engine).unwrap();
    assert!(!outcome.sweep.passed);
    assert_eq!(outcome.exit_status(), ExitStatus::QualityGateFailed);
    assert_eq!(outcome.exit_status().code(), 3);
    // Every configuration still reported
    assert_eq!(csv_rows(&config.report_csv).len(), 2);
}

#[test]
fn test_search_depth_below_k_is_skipped() {
    let (_dir, config) = fixture(10, vec![5, 20]);
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let outcome = run_benchmark(&config, &mut engine).unwrap();
    assert_eq!(outcome.sweep.results.len(), 1);
    assert_eq!(outcome.sweep.results[0].search_depth, 20);

    let rows = csv_rows(&config.report_csv);
    assert_eq!(rows.len(), 1);
    assert!(!config.result_paths(5).0.exists());
}

#[test]
fn test_missing_truth_disables_recall() {
    let (_dir, mut config) = fixture(10, vec![10]);
    config.gt_file = Some("null".into());
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let outcome = run_benchmark(&config, &mut engine).unwrap();
    assert_eq!(outcome.sweep.best_recall, None);
    assert_eq!(outcome.exit_status(), ExitStatus::Success);

    let mut reader = csv::Reader::from_path(&config.report_csv).unwrap();
    assert_eq!(reader.headers().unwrap().len(), 14);
}

#[test]
fn test_invalid_config_is_rejected_before_running() {
    let (_dir, config) = fixture(0, vec![10]);
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let err = run_benchmark(&config, &mut engine).unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::ConfigError);
    assert!(!config.report_csv.exists());
}

#[test]
fn test_filter_count_mismatch_fails_before_index_load() {
    let (dir, mut config) = fixture(10, vec![10]);
    let filters = dir.path().join("filters.txt");
    fs::write(&filters, "a\nb\n").unwrap();
    config.query_filters_file = Some(filters);
    // Loading the index would fail with a runtime error
    fs::remove_file(dir.path().join("idx_base.bin")).unwrap();
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let err = run_benchmark(&config, &mut engine).unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::ConfigError);
    assert!(!config.report_csv.exists());
}

#[test]
fn test_missing_query_file_is_runtime_error() {
    let (dir, mut config) = fixture(10, vec![10]);
    config.query_file = dir.path().join("absent.bin");
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let err = run_benchmark(&config, &mut engine).unwrap_err();
    assert_eq!(err.exit_status(), ExitStatus::RuntimeError);
}

#[test]
fn test_run_with_telemetry_enabled() {
    let (_dir, mut config) = fixture(10, vec![10, 20]);
    config.iostat.enabled = true;
    config.iostat.interval_ms = 20;
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    // Telemetry depends on the host; the sweep must succeed either way
    let outcome = run_benchmark(&config, &mut engine).unwrap();
    assert_eq!(outcome.exit_status(), ExitStatus::Success);
    if let Some(summary) = outcome.telemetry {
        assert!(!summary.devices.is_empty());
        let text = fs::read_to_string(config.iostat_csv_path()).unwrap();
        assert!(text.starts_with("timestampUs,deviceName,"));
    }
}

#[test]
fn test_json_report_round_trips_as_baseline() {
    let (dir, mut config) = fixture(10, vec![10, 20]);
    let report_path = dir.path().join("report.json");
    config.report_json = Some(report_path.clone());
    let mut engine = FlatEngine::new(config.data_type, Metric::L2);

    let first = run_benchmark(&config, &mut engine).unwrap();
    let report = RunReport::load(&report_path).unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.best_recall, first.sweep.best_recall);
    assert_eq!(report.artifacts.result_files.len(), 4);

    config.report_json = None;
    config.baseline = Some(report_path);
    let second = run_benchmark(&config, &mut engine).unwrap();
    // Floor gate plus throughput, latency and recall per matched depth
    assert_eq!(second.gates.results.len(), 1 + 2 * 4);
}
