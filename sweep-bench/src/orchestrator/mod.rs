// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Parameter sweep over search depths.
//!
//! For each search depth the whole query batch is dispatched across a rayon
//! pool. Every query writes to its own disjoint slices of the id, distance
//! and stats arrays, so dispatch needs no locking. Results are aggregated
//! into a [`SweepResult`], streamed to the report sink and persisted as
//! `.bin` result files.

pub mod tuner;
pub mod warmup;

pub use tuner::{BeamwidthTuner, LatencyTuner};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Instant;
use tracing::{info, warn};

use crate::clock::BenchClock;
use crate::dataset::{self, QueryBatch, TruthSet};
use crate::engine::{EngineError, FilterLabel, SearchEngine, SearchParams};
use crate::error::{BenchError, BenchResult};
use crate::harness::config::{BeamWidth, FilterSpec, LabelType, SearchConfig};
use crate::harness::gates::{check_recall_floor, ConfigSnapshot};
use crate::harness::metrics::{LatencyHistogram, LatencySummary};
use crate::harness::recall::RecallEvaluator;
use crate::harness::reporter::ReportSink;
use crate::harness::stats::{mean, percentile, QueryRecord};

/// Warm-up queries used per tuning trial.
const TUNING_SAMPLE: usize = 1_000;

/// Aggregated metrics of one (search depth, beam width) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub search_depth: u32,
    pub beam_width: u32,
    pub qps_per_thread: f64,
    pub mean_latency_us: f64,
    pub p999_latency_us: f64,
    pub mean_ios: f64,
    pub mean_cpu_us: f64,
    pub mean_compute_dist_us: f64,
    pub mean_pq_dist_us: f64,
    pub mean_single_pq_dist_us: f64,
    pub mean_io_us: f64,
    pub mean_n_4k: f64,
    pub mean_neighbors: f64,
    pub mean_cmps: f64,
    pub mean_cache_hit_rate: f64,
    /// Recall@K as a fraction, when ground truth is usable
    pub recall: Option<f64>,
    pub latency: LatencySummary,
    pub elapsed_secs: f64,
}

impl SweepResult {
    fn aggregate(
        params: &SearchParams,
        records: &[QueryRecord],
        elapsed_secs: f64,
        threads: usize,
        recall: Option<f64>,
    ) -> BenchResult<Self> {
        let latency = LatencyHistogram::from_records(records)?.summary();
        Ok(Self {
            search_depth: params.search_depth,
            beam_width: params.beam_width,
            qps_per_thread: records.len() as f64 / elapsed_secs / threads as f64,
            mean_latency_us: mean(records, |r| r.total_us),
            p999_latency_us: percentile(records, |r| r.total_us, 0.999),
            mean_ios: mean(records, |r| r.n_ios),
            mean_cpu_us: mean(records, |r| r.cpu_us),
            mean_compute_dist_us: mean(records, |r| r.compute_dist_us),
            mean_pq_dist_us: mean(records, |r| r.pq_dist_us),
            mean_single_pq_dist_us: mean(records, |r| r.single_pq_dist_us),
            mean_io_us: mean(records, |r| r.io_us),
            mean_n_4k: mean(records, |r| r.n_4k),
            mean_neighbors: mean(records, |r| r.n_neighbors),
            mean_cmps: mean(records, |r| r.n_cmps),
            mean_cache_hit_rate: mean(records, |r| r.cache_hit_rate()),
            recall,
            latency,
            elapsed_secs,
        })
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            search_depth: self.search_depth,
            qps_per_thread: self.qps_per_thread,
            mean_latency_us: self.mean_latency_us,
            p999_latency_us: self.p999_latency_us,
            recall: self.recall,
        }
    }
}

/// Outcome of a whole sweep.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub results: Vec<SweepResult>,
    /// Highest recall over all configurations
    pub best_recall: Option<f64>,
    /// Best recall reached the configured floor
    pub passed: bool,
}

/// Output of one batch dispatch.
struct BatchOutput {
    ids: Vec<u32>,
    dists: Vec<f32>,
    records: Vec<QueryRecord>,
    elapsed_secs: f64,
}

/// Run `batch` through `engine` on `pool`, one task per query.
fn dispatch<E: SearchEngine + ?Sized>(
    pool: &rayon::ThreadPool,
    engine: &E,
    batch: &QueryBatch,
    params: &SearchParams,
    filters: Option<&[FilterLabel]>,
) -> Result<BatchOutput, EngineError> {
    let k = params.k;
    let mut ids = vec![0u32; batch.rows * k];
    let mut dists = vec![0f32; batch.rows * k];
    let mut records = vec![QueryRecord::default(); batch.rows];

    let start = Instant::now();
    pool.install(|| {
        ids.par_chunks_mut(k)
            .zip(dists.par_chunks_mut(k))
            .zip(records.par_iter_mut())
            .enumerate()
            .try_for_each(|(q, ((ids, dists), record))| {
                let mut query_params = *params;
                if let Some(labels) = filters {
                    query_params.filter = Some(labels[q]);
                }
                engine.search(batch.row(q), &query_params, ids, dists, record)
            })
    })?;
    // Guard against a zero-length measurement on tiny batches
    let elapsed_secs = start.elapsed().as_secs_f64().max(1e-9);

    Ok(BatchOutput {
        ids,
        dists,
        records,
        elapsed_secs,
    })
}

/// Reject a per-query filter list that has neither one entry nor one per
/// query. Needs no engine, so it can run before the index is loaded.
pub fn check_filter_count(filters: Option<&FilterSpec>, num_queries: usize) -> BenchResult<()> {
    if let Some(FilterSpec::PerQuery(labels)) = filters {
        if labels.len() != 1 && labels.len() != num_queries {
            return Err(BenchError::config(format!(
                "{} query filters for {} queries; provide one filter or one per query",
                labels.len(),
                num_queries
            )));
        }
    }
    Ok(())
}

/// Runs the sweep described by a [`SearchConfig`] against one engine.
pub struct Orchestrator<'a, E: SearchEngine + ?Sized> {
    engine: &'a mut E,
    config: &'a SearchConfig,
    clock: BenchClock,
    pool: rayon::ThreadPool,
    tuner: Box<dyn BeamwidthTuner>,
    warmup: Option<QueryBatch>,
    prepared: bool,
}

impl<'a, E: SearchEngine + ?Sized> Orchestrator<'a, E> {
    pub fn new(engine: &'a mut E, config: &'a SearchConfig, clock: BenchClock) -> BenchResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("search-worker-{}", i))
            .build()
            .map_err(|e| BenchError::config(format!("failed to build worker pool: {}", e)))?;

        Ok(Self {
            engine,
            config,
            clock,
            pool,
            tuner: Box::new(LatencyTuner::default()),
            warmup: None,
            prepared: false,
        })
    }

    /// Replace the beam width tuner used when `beam_width = 0`.
    pub fn with_tuner(mut self, tuner: Box<dyn BeamwidthTuner>) -> Self {
        self.tuner = tuner;
        self
    }

    /// Resolve filters into one label per query.
    ///
    /// A per-query list must have one entry per query, or a single entry
    /// that applies to all of them.
    pub fn resolve_filters(
        &self,
        filters: Option<&FilterSpec>,
        num_queries: usize,
    ) -> BenchResult<Option<Vec<FilterLabel>>> {
        check_filter_count(filters, num_queries)?;
        let raw: Vec<&str> = match filters {
            None => return Ok(None),
            Some(FilterSpec::Global(label)) => vec![label.as_str()],
            Some(FilterSpec::PerQuery(labels)) => labels.iter().map(String::as_str).collect(),
        };

        let mut resolved = Vec::with_capacity(raw.len());
        for label in raw {
            let id = match self.engine.resolve_filter_label(label) {
                Ok(id) => id,
                Err(EngineError::UnknownLabel(l)) => {
                    return Err(BenchError::config(format!("filter label '{}' is not in the index", l)))
                }
                Err(e) => return Err(e.into()),
            };
            if self.config.label_type == LabelType::Ushort && id.0 > u16::MAX as u32 {
                return Err(BenchError::config(format!(
                    "filter label '{}' resolves to {}, which does not fit a ushort label",
                    label, id.0
                )));
            }
            resolved.push(id);
        }

        if resolved.len() == 1 && num_queries != 1 {
            resolved = vec![resolved[0]; num_queries];
        }
        Ok(Some(resolved))
    }

    /// Cache warm-up and the optional warm-up pass. Runs once.
    fn prepare(&mut self) -> BenchResult<()> {
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;

        if self.config.num_nodes_to_cache > 0 {
            let nodes = self.engine.cache_frontier(self.config.num_nodes_to_cache);
            info!("caching {} nodes around the entry point", nodes.len());
            self.engine.load_cache(&nodes);
        }

        let needs_warmup_set =
            self.config.warmup || self.config.beam_width_mode() == BeamWidth::Auto;
        if needs_warmup_set {
            self.warmup = Some(warmup::load_warmup_set(self.config, self.engine.dim())?);
        }

        if self.config.warmup {
            if let Some(ref set) = self.warmup {
                let params = SearchParams::new(warmup::WARMUP_K, warmup::WARMUP_L, warmup::WARMUP_W);
                let out = dispatch(&self.pool, &*self.engine, set, &params, None)?;
                info!(
                    "warm-up pass: {} queries in {:.2}s",
                    set.rows, out.elapsed_secs
                );
            }
        }
        Ok(())
    }

    fn resolve_beam_width(&mut self, search_depth: u32, previous: u32) -> BenchResult<u32> {
        match self.config.beam_width_mode() {
            BeamWidth::Fixed(w) => Ok(w),
            BeamWidth::Auto => {
                let set = self
                    .warmup
                    .as_ref()
                    .ok_or_else(|| BenchError::config("beam width tuning needs a warm-up set"))?;
                let sample_rows = set.rows.min(TUNING_SAMPLE);
                let sample = QueryBatch {
                    data: set.data[..sample_rows * set.cols].to_vec(),
                    rows: sample_rows,
                    cols: set.cols,
                };

                let (pool, engine, k) = (&self.pool, &*self.engine, self.config.k);
                let mut trial = |w: u32| -> BenchResult<f64> {
                    let params = SearchParams::new(k, search_depth, w);
                    let out = dispatch(pool, engine, &sample, &params, None)?;
                    Ok(mean(&out.records, |r| r.total_us))
                };
                let w = self.tuner.tune(search_depth, previous, &mut trial)?;
                info!("tuned beam width for L={}: W={}", search_depth, w);
                Ok(w)
            }
        }
    }

    /// Decide whether recall can be computed against `truth`.
    fn usable_truth<'t>(&self, truth: Option<&'t TruthSet>, num_queries: usize) -> Option<&'t TruthSet> {
        let truth = truth?;
        if truth.num_queries != num_queries {
            warn!(
                "ground truth covers {} queries but the batch has {}; recall disabled",
                truth.num_queries, num_queries
            );
            return None;
        }
        if truth.dim < self.config.k {
            warn!(
                "ground truth has {} neighbours per query, fewer than K={}; recall disabled",
                truth.dim, self.config.k
            );
            return None;
        }
        Some(truth)
    }

    /// Run the sweep, streaming one report row per configuration.
    pub fn run<W: Write>(
        &mut self,
        batch: &QueryBatch,
        truth: Option<&TruthSet>,
        filters: Option<&FilterSpec>,
        report: &mut ReportSink<W>,
    ) -> BenchResult<SweepOutcome> {
        let config = self.config;
        config.validate()?;
        let k = config.k;
        if batch.is_empty() {
            return Err(BenchError::config("query batch is empty"));
        }
        if batch.cols != self.engine.dim() {
            return Err(BenchError::config(format!(
                "query dimension {} does not match index dimension {}",
                batch.cols,
                self.engine.dim()
            )));
        }

        let labels = self.resolve_filters(filters, batch.rows)?;
        let truth = self.usable_truth(truth, batch.rows);

        self.prepare()?;

        info!(
            "sweeping L={:?} over {} queries (K={}, {} threads) at {}us",
            config.search_depths,
            batch.rows,
            k,
            config.num_threads,
            self.clock.elapsed_us()
        );
        report.begin(k, truth.is_some())?;

        let mut results = Vec::new();
        let mut best_recall: Option<f64> = None;
        let mut previous_width = 2;

        for &l in &config.search_depths {
            if (l as usize) < k {
                warn!("skipping search depth L={}: smaller than K={}", l, k);
                continue;
            }

            let beam_width = self.resolve_beam_width(l, previous_width)?;
            previous_width = beam_width;

            let params = SearchParams {
                k,
                search_depth: l,
                beam_width,
                io_limit: config.search_io_limit,
                use_reorder_data: config.use_reorder_data,
                filter: None,
            };
            info!("running L={} W={}", l, beam_width);
            let out = dispatch(&self.pool, &*self.engine, batch, &params, labels.as_deref())?;

            let recall = truth.map(|t| RecallEvaluator::new(t).average_recall_at_k(&out.ids, k).mean);
            if let Some(r) = recall {
                best_recall = Some(best_recall.map_or(r, |b| b.max(r)));
            }

            let result = SweepResult::aggregate(
                &params,
                &out.records,
                out.elapsed_secs,
                config.num_threads,
                recall,
            )?;
            report.emit(&result)?;

            let (idx_path, dists_path) = config.result_paths(l);
            dataset::save_bin(&idx_path, &out.ids, batch.rows, k)?;
            dataset::save_bin(&dists_path, &out.dists, batch.rows, k)?;
            info!("saved results to {} and {}", idx_path.display(), dists_path.display());

            results.push(result);
        }

        let passed = check_recall_floor(best_recall, config.fail_if_recall_below).is_pass();
        Ok(SweepOutcome {
            results,
            best_recall,
            passed,
        })
    }
}
