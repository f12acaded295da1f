// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Per-query statistics and the aggregation functions applied to them.
//!
//! Aggregation is exact: values are collected and sorted, and percentiles use
//! the nearest-rank method without interpolation. An empty record set yields
//! `f64::NAN` from both [`mean`] and [`percentile`].

use serde::{Deserialize, Serialize};

/// Statistics for a single query, filled in by the search engine.
///
/// Times are in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Total time to process the query
    pub total_us: f32,
    /// Time spent waiting on I/O
    pub io_us: f32,
    /// Time spent on CPU
    pub cpu_us: f32,

    /// Bulk distance computation
    pub compute_dist_us: f32,
    /// Per-chunk quantized distance lookups
    pub pq_dist_us: f32,
    /// Single-vector quantized distance lookups
    pub single_pq_dist_us: f32,

    /// 4 KiB reads
    pub n_4k: u32,
    /// 8 KiB reads
    pub n_8k: u32,
    /// 12 KiB reads
    pub n_12k: u32,
    /// Total reads issued
    pub n_ios: u32,
    /// Bytes read
    pub read_size: u32,

    pub n_cache_hits: u32,
    pub n_cache_misses: u32,
    /// Graph hops
    pub n_hops: u32,
    /// Candidate distance comparisons
    pub n_cmps: u32,
    /// Neighbours expanded
    pub n_neighbors: u32,
    /// Quantization chunks active for the query
    pub n_chunks: u32,
}

impl QueryRecord {
    /// Cache hit ratio in `[0, 1]`, or 0 when no lookups were made.
    pub fn cache_hit_rate(&self) -> f32 {
        let lookups = self.n_cache_hits + self.n_cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.n_cache_hits as f32 / lookups as f32
        }
    }
}

/// Mean of `field` over `records`.
///
/// Returns `NaN` when `records` is empty.
pub fn mean<R, V, F>(records: &[R], field: F) -> f64
where
    V: Into<f64>,
    F: Fn(&R) -> V,
{
    if records.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = records.iter().map(|r| field(r).into()).sum();
    sum / records.len() as f64
}

/// Nearest-rank percentile of `field` over `records`.
///
/// `p` is a fraction in `[0, 1]` (values outside are clamped). The value at
/// sorted position `floor(p * N)` is returned, with the index clamped to
/// `N - 1` so that `p = 1.0` yields the maximum. Returns `NaN` when
/// `records` is empty.
pub fn percentile<R, V, F>(records: &[R], field: F, p: f64) -> f64
where
    V: Into<f64>,
    F: Fn(&R) -> V,
{
    if records.is_empty() {
        return f64::NAN;
    }
    let mut values: Vec<f64> = records.iter().map(|r| field(r).into()).collect();
    values.sort_by(f64::total_cmp);

    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let rank = ((p * values.len() as f64).floor() as usize).min(values.len() - 1);
    values[rank]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records_with_latency(values: &[f32]) -> Vec<QueryRecord> {
        values
            .iter()
            .map(|&v| QueryRecord {
                total_us: v,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_mean_single_record_is_exact() {
        let records = records_with_latency(&[123.25]);
        assert_eq!(mean(&records, |r| r.total_us), 123.25);
    }

    #[test]
    fn test_mean_over_counts() {
        let records: Vec<QueryRecord> = (1..=4)
            .map(|n| QueryRecord {
                n_ios: n,
                ..Default::default()
            })
            .collect();
        assert_eq!(mean(&records, |r| r.n_ios), 2.5);
    }

    #[test]
    fn test_percentile_extremes() {
        let records = records_with_latency(&[7.0, 3.0, 9.0, 1.0, 5.0]);
        assert_eq!(percentile(&records, |r| r.total_us, 0.0), 1.0);
        assert_eq!(percentile(&records, |r| r.total_us, 1.0), 9.0);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        let records = records_with_latency(&values);
        // floor(0.999 * 1000) = 999
        assert_eq!(percentile(&records, |r| r.total_us, 0.999), 999.0);
        // floor(0.5 * 1000) = 500
        assert_eq!(percentile(&records, |r| r.total_us, 0.5), 500.0);

        let small = records_with_latency(&[10.0, 20.0, 30.0, 40.0]);
        // floor(0.999 * 4) = 3
        assert_eq!(percentile(&small, |r| r.total_us, 0.999), 40.0);
        // floor(0.3 * 4) = 1, no interpolation
        assert_eq!(percentile(&small, |r| r.total_us, 0.3), 20.0);
    }

    #[test]
    fn test_percentile_clamps_fraction() {
        let records = records_with_latency(&[2.0, 4.0]);
        assert_eq!(percentile(&records, |r| r.total_us, 1.5), 4.0);
        assert_eq!(percentile(&records, |r| r.total_us, -0.5), 2.0);
    }

    #[test]
    fn test_empty_set_is_nan_for_both() {
        let records: Vec<QueryRecord> = Vec::new();
        assert!(mean(&records, |r| r.total_us).is_nan());
        assert!(percentile(&records, |r| r.total_us, 0.5).is_nan());
        assert!(percentile(&records, |r| r.total_us, 1.0).is_nan());
    }

    #[test]
    fn test_cache_hit_rate() {
        let r = QueryRecord {
            n_cache_hits: 3,
            n_cache_misses: 1,
            ..Default::default()
        };
        assert_eq!(r.cache_hit_rate(), 0.75);
        assert_eq!(QueryRecord::default().cache_hit_rate(), 0.0);
    }
}
