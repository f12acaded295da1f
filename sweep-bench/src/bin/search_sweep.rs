// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Search sweep benchmark
//!
//! Runs a query batch against a disk index at several search depths,
//! reporting throughput, latency, I/O counts and recall while sampling
//! block-device counters in the background.
//!
//! ## Usage
//!
//! ```bash
//! # Everything from a config file
//! search-sweep --config sweep.toml
//!
//! # Flags only
//! search-sweep --index-prefix data/idx --query-file data/q.bin \
//!     --result-prefix out/res -K 10 -L 10 20 40 --gt-file data/gt.bin
//!
//! # Config file with overrides
//! search-sweep --config sweep.yaml -T 8 --fail-if-recall-below 0.9
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sweep_bench::{
    run_benchmark, BenchError, BenchResult, DataType, ExitStatus, FlatEngine, GateMode, LabelType, Metric,
    SearchConfig,
};

/// Search sweep benchmark
#[derive(Parser, Debug)]
#[command(name = "search-sweep")]
#[command(about = "Sweep search depths over a query batch and report QPS, latency and recall")]
#[command(version)]
struct Args {
    /// TOML or YAML run configuration; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vector element type: float, int8 or uint8
    #[arg(long)]
    data_type: Option<DataType>,

    /// Distance function: l2, mips or cosine
    #[arg(long = "dist-fn")]
    metric: Option<Metric>,

    #[arg(long)]
    index_prefix: Option<PathBuf>,

    /// Prefix for per-L result files
    #[arg(long)]
    result_prefix: Option<PathBuf>,

    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Truth set; "null" disables recall
    #[arg(long)]
    gt_file: Option<PathBuf>,

    /// Search report CSV, defaults to <result_prefix>_search.csv
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Number of neighbors per query
    #[arg(short = 'K', long = "recall-at")]
    k: Option<usize>,

    /// Search depths to sweep
    #[arg(short = 'L', long = "search-list", num_args = 1..)]
    search_depths: Option<Vec<u32>>,

    /// Worker threads
    #[arg(short = 'T', long = "num-threads")]
    num_threads: Option<usize>,

    /// Beam width, 0 tunes it per search depth
    #[arg(short = 'W', long = "beamwidth")]
    beam_width: Option<u32>,

    #[arg(long)]
    num_nodes_to_cache: Option<usize>,

    /// Maximum page reads per query
    #[arg(long)]
    search_io_limit: Option<u32>,

    #[arg(long)]
    use_reorder_data: bool,

    /// Label applied to every query
    #[arg(long)]
    filter_label: Option<String>,

    /// One label per query, one per line
    #[arg(long)]
    query_filters_file: Option<PathBuf>,

    /// Label width: uint or ushort
    #[arg(long)]
    label_type: Option<LabelType>,

    /// Fail with exit code 3 if the best recall is below this fraction
    #[arg(long)]
    fail_if_recall_below: Option<f64>,

    /// Run a warm-up pass before the sweep
    #[arg(long)]
    warmup: bool,

    /// Disable block-device telemetry
    #[arg(long)]
    no_iostat: bool,

    /// Devices to sample, defaults to every discovered device
    #[arg(long = "iostat-device")]
    iostat_devices: Vec<String>,

    #[arg(long)]
    iostat_interval_ms: Option<u64>,

    #[arg(long)]
    iostat_csv: Option<PathBuf>,

    /// Write a JSON run report
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// JSON run report to compare against
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Regression thresholds: default, pr or nightly
    #[arg(long)]
    gate_mode: Option<GateMode>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn missing(flag: &str) -> BenchError {
    BenchError::config(format!("--{} is required without --config", flag))
}

impl Args {
    fn into_config(self) -> BenchResult<SearchConfig> {
        let mut config = match self.config {
            Some(ref path) => SearchConfig::load(path)?,
            None => {
                let result_prefix = self.result_prefix.clone().ok_or_else(|| missing("result-prefix"))?;
                SearchConfig::new(
                    self.index_prefix.clone().ok_or_else(|| missing("index-prefix"))?,
                    self.query_file.clone().ok_or_else(|| missing("query-file"))?,
                    result_prefix,
                    self.k.ok_or_else(|| missing("recall-at"))?,
                    self.search_depths.clone().ok_or_else(|| missing("search-list"))?,
                )
            }
        };

        if let Some(v) = self.data_type {
            config.data_type = v;
        }
        if let Some(v) = self.metric {
            config.metric = v;
        }
        if let Some(v) = self.index_prefix {
            config.index_prefix = v;
        }
        if let Some(v) = self.result_prefix {
            let derived = config.report_csv == config.default_report_csv();
            config.result_prefix = v;
            if derived {
                config.report_csv = config.default_report_csv();
            }
        }
        if let Some(v) = self.query_file {
            config.query_file = v;
        }
        if let Some(v) = self.gt_file {
            config.gt_file = Some(v);
        }
        if let Some(v) = self.report_csv {
            config.report_csv = v;
        }
        if let Some(v) = self.k {
            config.k = v;
        }
        if let Some(v) = self.search_depths {
            config.search_depths = v;
        }
        if let Some(v) = self.num_threads {
            config.num_threads = v;
        }
        if let Some(v) = self.beam_width {
            config.beam_width = v;
        }
        if let Some(v) = self.num_nodes_to_cache {
            config.num_nodes_to_cache = v;
        }
        if self.search_io_limit.is_some() {
            config.search_io_limit = self.search_io_limit;
        }
        config.use_reorder_data |= self.use_reorder_data;
        if self.filter_label.is_some() {
            config.filter_label = self.filter_label;
        }
        if self.query_filters_file.is_some() {
            config.query_filters_file = self.query_filters_file;
        }
        if let Some(v) = self.label_type {
            config.label_type = v;
        }
        if let Some(v) = self.fail_if_recall_below {
            config.fail_if_recall_below = v;
        }
        config.warmup |= self.warmup;
        if self.no_iostat {
            config.iostat.enabled = false;
        }
        if !self.iostat_devices.is_empty() {
            config.iostat.devices = self.iostat_devices;
        }
        if let Some(v) = self.iostat_interval_ms {
            config.iostat.interval_ms = v;
        }
        if self.iostat_csv.is_some() {
            config.iostat.csv = self.iostat_csv;
        }
        if self.report_json.is_some() {
            config.report_json = self.report_json;
        }
        if self.baseline.is_some() {
            config.baseline = self.baseline;
        }
        if let Some(v) = self.gate_mode {
            config.gate_mode = v;
        }

        config.validate()?;
        Ok(config)
    }
}

fn run(args: Args) -> BenchResult<ExitStatus> {
    let config = args.into_config()?;
    tracing::info!(
        "search-sweep {}: K={} L={:?} T={}",
        env!("CARGO_PKG_VERSION"),
        config.k,
        config.search_depths,
        config.num_threads
    );

    let mut engine = FlatEngine::new(config.data_type, config.metric);
    let outcome = run_benchmark(&config, &mut engine)?;
    Ok(outcome.exit_status())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let status = match run(args) {
        Ok(status) => status,
        Err(e) => {
            error!("{}", e);
            e.exit_status()
        }
    };
    status.into()
}
