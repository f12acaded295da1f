// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Warm-up query set used for the warm-up pass and beam width tuning.

use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::dataset::{self, QueryBatch};
use crate::error::BenchResult;
use crate::harness::config::SearchConfig;

/// Parameters of the warm-up pass.
pub const WARMUP_K: usize = 1;
pub const WARMUP_L: u32 = 20;
pub const WARMUP_W: u32 = 4;

const SYNTHETIC_PER_THREAD: usize = 15_000;
const SYNTHETIC_MAX: usize = 150_000;
const SYNTHETIC_SEED: u64 = 0x5eed;

/// Number of synthetic warm-up queries for `threads` workers.
pub fn synthetic_count(threads: usize) -> usize {
    SYNTHETIC_MAX.min(SYNTHETIC_PER_THREAD.saturating_mul(threads))
}

/// `count` vectors with components drawn uniformly from `[-128, 127]`.
pub fn synthetic_queries(count: usize, dim: usize, seed: u64) -> QueryBatch {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let range = Uniform::new_inclusive(-128i32, 127);
    let data: Vec<f32> = (0..count * dim).map(|_| range.sample(&mut rng) as f32).collect();
    QueryBatch {
        data,
        rows: count,
        cols: dim,
    }
}

/// Load `<index_prefix>_sample_data.bin`, falling back to synthetic
/// vectors when it is missing, unreadable or of the wrong dimension.
pub fn load_warmup_set(config: &SearchConfig, dim: usize) -> BenchResult<QueryBatch> {
    let path = config.warmup_query_path();
    if path.exists() {
        match dataset::load_as_f32(&path, config.data_type) {
            Ok(batch) if batch.cols == dim && !batch.is_empty() => {
                info!("loaded {} warm-up queries from {}", batch.rows, path.display());
                return Ok(batch);
            }
            Ok(batch) => warn!(
                "warm-up file {} has {} x {} vectors, expected dimension {}; using synthetic queries",
                path.display(),
                batch.rows,
                batch.cols,
                dim
            ),
            Err(e) => warn!("failed to load warm-up file: {}; using synthetic queries", e),
        }
    }

    let count = synthetic_count(config.num_threads);
    info!("generating {} synthetic warm-up queries", count);
    Ok(synthetic_queries(count, dim, SYNTHETIC_SEED))
}
