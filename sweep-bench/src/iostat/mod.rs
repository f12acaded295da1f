// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Block-device I/O telemetry.
//!
//! This module provides:
//! - `/proc/diskstats` and `/proc/uptime` parsing
//! - Rate derivation between consecutive counter snapshots
//! - A cancellable periodic task
//! - The background sampler that writes one CSV row per device per tick

pub mod diskstats;
pub mod rates;
pub mod sampler;
pub mod task;

pub use diskstats::{
    clock_ticks_per_sec, discover_devices, parse_diskstats, parse_uptime, CounterSource,
    DeviceCounterSnapshot, DeviceTable, DiskStatsError, ProcDiskStats,
};
pub use rates::{DerivedRateMetrics, IOSTAT_HEADER};
pub use sampler::{IoSampler, SamplerHandle, SamplerSummary};
pub use task::{CancellationToken, PeriodicTask};
