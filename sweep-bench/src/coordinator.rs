// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Runs one benchmark: telemetry sampler in the background, sweep on the
//! calling thread, then reporting and gate evaluation.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::BenchClock;
use crate::dataset::{self, TruthSet};
use crate::engine::SearchEngine;
use crate::error::{BenchResult, ExitStatus};
use crate::harness::config::SearchConfig;
use crate::harness::environment::EnvironmentInfo;
use crate::harness::gates::{ConfigSnapshot, GateEvaluation, RegressionGates};
use crate::harness::reporter::{self, ArtifactPaths, ReportSink, RunReport};
use crate::iostat::{
    clock_ticks_per_sec, discover_devices, IoSampler, ProcDiskStats, SamplerHandle, SamplerSummary,
};
use crate::orchestrator::{self, Orchestrator, SweepOutcome, SweepResult};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub sweep: SweepOutcome,
    pub gates: GateEvaluation,
    /// `None` when telemetry was disabled or unavailable
    pub telemetry: Option<SamplerSummary>,
    pub report_json: Option<PathBuf>,
}

impl RunOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        if self.sweep.passed && self.gates.overall_pass {
            ExitStatus::Success
        } else {
            ExitStatus::QualityGateFailed
        }
    }
}

struct RunningSampler {
    handle: SamplerHandle<ProcDiskStats, fs::File>,
    devices: Vec<String>,
    csv_path: PathBuf,
}

/// Start the I/O sampler, or log why telemetry is unavailable.
fn start_sampler(config: &SearchConfig, hz: u64, clock: BenchClock) -> Option<RunningSampler> {
    let mut source = ProcDiskStats::new(hz);
    let discovered = match discover_devices(&mut source) {
        Ok(devices) => devices,
        Err(e) => {
            warn!("iostat disabled: {}", e);
            return None;
        }
    };

    let sampler = IoSampler::new(source, &discovered, &config.iostat.devices, hz, clock);
    if sampler.devices().is_empty() {
        warn!("iostat disabled: no block devices to track");
        return None;
    }
    let devices = sampler.devices().to_vec();

    let csv_path = config.iostat_csv_path();
    if let Some(parent) = csv_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("iostat disabled: cannot create {}: {}", parent.display(), e);
            return None;
        }
    }
    let sink = match csv::Writer::from_path(&csv_path) {
        Ok(sink) => sink,
        Err(e) => {
            warn!("iostat disabled: cannot create {}: {}", csv_path.display(), e);
            return None;
        }
    };

    match sampler.spawn(sink, Duration::from_millis(config.iostat.interval_ms)) {
        Ok(handle) => Some(RunningSampler {
            handle,
            devices,
            csv_path,
        }),
        Err(e) => {
            warn!("iostat disabled: failed to start sampler: {}", e);
            None
        }
    }
}

/// Load the truth set, disabling recall if it is missing or unreadable.
fn load_truth(config: &SearchConfig) -> Option<TruthSet> {
    let path = config.ground_truth_path()?;
    if !path.exists() {
        warn!("ground truth {} not found; recall disabled", path.display());
        return None;
    }
    match dataset::load_truthset(path) {
        Ok(truth) => Some(truth),
        Err(e) => {
            warn!("failed to load ground truth: {}; recall disabled", e);
            None
        }
    }
}

fn execute<E: SearchEngine + ?Sized>(
    config: &SearchConfig,
    engine: &mut E,
    clock: BenchClock,
) -> BenchResult<SweepOutcome> {
    let batch = dataset::load_as_f32(&config.query_file, config.data_type)?;
    let truth = load_truth(config);
    let filters = config.query_filters()?;
    orchestrator::check_filter_count(filters.as_ref(), batch.rows)?;

    engine.load(config.num_threads, &config.index_prefix)?;
    info!(
        "loaded {} index {} ({} queries of dimension {})",
        engine.name(),
        config.index_prefix.display(),
        batch.rows,
        batch.cols
    );

    let mut report = ReportSink::create(&config.report_csv, true)?;
    let mut orchestrator = Orchestrator::new(engine, config, clock)?;
    orchestrator.run(&batch, truth.as_ref(), filters.as_ref(), &mut report)
}

/// Run the benchmark described by `config` against `engine`.
///
/// The sampler is stopped before any error from the sweep is returned.
pub fn run_benchmark<E: SearchEngine + ?Sized>(
    config: &SearchConfig,
    engine: &mut E,
) -> BenchResult<RunOutcome> {
    config.validate()?;
    let clock = BenchClock::start();
    let hz = clock_ticks_per_sec();

    let sampler = if config.iostat.enabled {
        start_sampler(config, hz, clock)
    } else {
        None
    };
    let devices = sampler.as_ref().map(|s| s.devices.clone()).unwrap_or_default();
    let iostat_csv = sampler.as_ref().map(|s| s.csv_path.display().to_string());

    let sweep = execute(config, engine, clock);
    let telemetry = sampler.map(|s| s.handle.stop());
    let sweep = sweep?;

    reporter::print_summary(
        &sweep.results,
        sweep.best_recall,
        config.fail_if_recall_below,
        sweep.passed,
    );

    let baseline = match config.baseline {
        Some(ref path) => {
            info!("comparing against baseline {}", path.display());
            Some(RunReport::load(path)?.to_snapshots())
        }
        None => None,
    };
    let current: Vec<ConfigSnapshot> = sweep.results.iter().map(SweepResult::snapshot).collect();
    let gates = GateEvaluation::evaluate(
        &RegressionGates::for_mode(config.gate_mode),
        config.fail_if_recall_below,
        sweep.best_recall,
        baseline.as_deref(),
        &current,
    );
    if baseline.is_some() {
        reporter::print_gate_results(&gates);
    }

    if let Some(ref path) = config.report_json {
        let now = Utc::now();
        let result_files = sweep
            .results
            .iter()
            .flat_map(|r| {
                let (idx, dists) = config.result_paths(r.search_depth);
                [idx.display().to_string(), dists.display().to_string()]
            })
            .collect();

        let report = RunReport::builder()
            .run_id(&format!("sweep-{}", now.format("%Y%m%dT%H%M%SZ")))
            .timestamp(&now.to_rfc3339())
            .environment(EnvironmentInfo::collect(&devices, config.num_threads))
            .config(config.clone())
            .results(sweep.results.clone(), sweep.best_recall)
            .gates(gates.clone())
            .telemetry(telemetry.clone())
            .artifacts(ArtifactPaths {
                report_csv: config.report_csv.display().to_string(),
                result_files,
                iostat_csv,
                report_json: Some(path.display().to_string()),
            })
            .build()?;
        report.save(path)?;
        info!("run report written to {}", path.display());
    }

    Ok(RunOutcome {
        sweep,
        gates,
        telemetry,
        report_json: config.report_json.clone(),
    })
}
