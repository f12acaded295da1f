// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! HDRHistogram-based latency distribution for the JSON run report.
//!
//! The report row itself uses the exact nearest-rank aggregation in
//! [`super::stats`]; this histogram adds a p50/p95/p99/p99.9 distribution
//! per configuration without keeping every sample around.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use super::stats::QueryRecord;
use crate::error::{BenchError, BenchResult};

/// Latency histogram with microsecond resolution.
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Histogram covering 1µs..60s with 3 significant figures.
    pub fn new() -> BenchResult<Self> {
        Self::with_config(60_000_000, 3)
    }

    /// Create with custom configuration.
    ///
    /// # Arguments
    /// * `max_latency_us` - Largest value recorded without clamping
    /// * `sigfigs` - Significant figures of precision (1-5)
    pub fn with_config(max_latency_us: u64, sigfigs: u8) -> BenchResult<Self> {
        let histogram = Histogram::new_with_max(max_latency_us, sigfigs)
            .map_err(|e| BenchError::Report(format!("failed to create histogram: {:?}", e)))?;
        Ok(Self { histogram })
    }

    /// Build a histogram of `total_us` over a batch of query records.
    pub fn from_records(records: &[QueryRecord]) -> BenchResult<Self> {
        let mut hist = Self::new()?;
        for record in records {
            hist.record_us(record.total_us as f64);
        }
        Ok(hist)
    }

    /// Record a latency in microseconds.
    pub fn record_us(&mut self, latency_us: f64) {
        let value = if latency_us.is_finite() && latency_us > 0.0 {
            latency_us.round() as u64
        } else {
            0
        };
        // Clamp to max if needed
        let value = value.min(self.histogram.high());
        let _ = self.histogram.record(value);
    }

    /// Value at percentile `p` (0-100).
    pub fn percentile(&self, p: f64) -> u64 {
        self.histogram.value_at_percentile(p)
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    /// Export summary as a serializable struct.
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            min_us: self.histogram.min(),
            max_us: self.histogram.max(),
            mean_us: self.histogram.mean(),
            p50_us: self.percentile(50.0),
            p95_us: self.percentile(95.0),
            p99_us: self.percentile(99.0),
            p999_us: self.percentile(99.9),
        }
    }
}

/// Serializable latency distribution summary (microseconds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_from_records() {
        let records: Vec<QueryRecord> = (1..=100)
            .map(|i| QueryRecord {
                total_us: (i * 10) as f32,
                ..Default::default()
            })
            .collect();

        let hist = LatencyHistogram::from_records(&records).unwrap();
        assert_eq!(hist.count(), 100);

        let summary = hist.summary();
        assert!(summary.p50_us > 0);
        assert!(summary.p99_us >= summary.p50_us);
        assert!(summary.max_us >= 999 && summary.max_us <= 1_001);
    }

    #[test]
    fn test_negative_and_nan_latencies_record_as_zero() {
        let mut hist = LatencyHistogram::new().unwrap();
        hist.record_us(-5.0);
        hist.record_us(f64::NAN);
        assert_eq!(hist.count(), 2);
        assert_eq!(hist.summary().max_us, 0);
    }

    #[test]
    fn test_values_above_max_are_clamped() {
        let mut hist = LatencyHistogram::with_config(1_000, 3).unwrap();
        hist.record_us(5_000_000.0);
        assert_eq!(hist.count(), 1);
        assert!(hist.summary().max_us < 5_000_000);
    }
}
