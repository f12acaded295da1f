// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Per-interval rates derived from two counter snapshots.

use serde::Serialize;

use super::diskstats::DeviceCounterSnapshot;

/// Sectors are 512 bytes: 2048 sectors per MiB.
const SECTORS_PER_MB: f64 = 2048.0;

/// Header of the I/O counter CSV.
pub const IOSTAT_HEADER: [&str; 14] = [
    "timestampUs",
    "deviceName",
    "mergedReadsPerSec",
    "mergedWritesPerSec",
    "readsPerSec",
    "writesPerSec",
    "readMBPerSec",
    "writeMBPerSec",
    "avgRequestSectors",
    "avgQueueDepth",
    "avgWaitMs",
    "avgReadWaitMs",
    "avgWriteWaitMs",
    "utilizationPercent",
];

/// Rates for one device over one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedRateMetrics {
    pub merged_reads_per_sec: f64,
    pub merged_writes_per_sec: f64,
    pub reads_per_sec: f64,
    pub writes_per_sec: f64,
    pub read_mb_per_sec: f64,
    pub write_mb_per_sec: f64,
    /// Average request size in sectors
    pub avg_request_sectors: f64,
    pub avg_queue_depth: f64,
    pub avg_wait_ms: f64,
    pub avg_read_wait_ms: f64,
    pub avg_write_wait_ms: f64,
    pub utilization_percent: f64,
}

/// `num / den`, or 0 when nothing completed.
fn per_op(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl DerivedRateMetrics {
    /// Derive rates from `prev` to `curr`.
    ///
    /// The interval is the uptime delta in ticks, clamped to at least one.
    /// Counters that went backwards (device reset) contribute zero.
    pub fn between(prev: &DeviceCounterSnapshot, curr: &DeviceCounterSnapshot, hz: u64) -> Self {
        let itv = curr.uptime_ticks.saturating_sub(prev.uptime_ticks).max(1) as f64;
        let hz = hz as f64;
        let delta = |f: fn(&DeviceCounterSnapshot) -> u64| f(curr).saturating_sub(f(prev));
        let rate = |d: u64| d as f64 / itv * hz;

        let d_reads = delta(|s| s.reads_completed);
        let d_writes = delta(|s| s.writes_completed);
        let d_read_ms = delta(|s| s.read_ms);
        let d_write_ms = delta(|s| s.write_ms);
        let d_rsect = delta(|s| s.sectors_read);
        let d_wsect = delta(|s| s.sectors_written);
        let d_ops = d_reads + d_writes;

        Self {
            merged_reads_per_sec: rate(delta(|s| s.reads_merged)),
            merged_writes_per_sec: rate(delta(|s| s.writes_merged)),
            reads_per_sec: rate(d_reads),
            writes_per_sec: rate(d_writes),
            read_mb_per_sec: rate(d_rsect) / SECTORS_PER_MB,
            write_mb_per_sec: rate(d_wsect) / SECTORS_PER_MB,
            avg_request_sectors: per_op(d_rsect + d_wsect, d_ops),
            avg_queue_depth: rate(delta(|s| s.weighted_ms)) / 1000.0,
            avg_wait_ms: per_op(d_read_ms + d_write_ms, d_ops),
            avg_read_wait_ms: per_op(d_read_ms, d_reads),
            avg_write_wait_ms: per_op(d_write_ms, d_writes),
            utilization_percent: rate(delta(|s| s.io_ms)) / 10.0,
        }
    }

    /// CSV record matching [`IOSTAT_HEADER`].
    pub fn record(&self, timestamp_us: u64, device: &str) -> Vec<String> {
        let mut record = Vec::with_capacity(IOSTAT_HEADER.len());
        record.push(timestamp_us.to_string());
        record.push(device.to_string());
        for v in [
            self.merged_reads_per_sec,
            self.merged_writes_per_sec,
            self.reads_per_sec,
            self.writes_per_sec,
            self.read_mb_per_sec,
            self.write_mb_per_sec,
            self.avg_request_sectors,
            self.avg_queue_depth,
            self.avg_wait_ms,
            self.avg_read_wait_ms,
            self.avg_write_wait_ms,
            self.utilization_percent,
        ] {
            record.push(format!("{:.2}", v));
        }
        record
    }

    fn values(&self) -> [f64; 12] {
        [
            self.merged_reads_per_sec,
            self.merged_writes_per_sec,
            self.reads_per_sec,
            self.writes_per_sec,
            self.read_mb_per_sec,
            self.write_mb_per_sec,
            self.avg_request_sectors,
            self.avg_queue_depth,
            self.avg_wait_ms,
            self.avg_read_wait_ms,
            self.avg_write_wait_ms,
            self.utilization_percent,
        ]
    }

    /// True if every rate is finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.values().iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}
