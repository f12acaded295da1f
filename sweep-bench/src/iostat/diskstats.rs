// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Cumulative block-device counters from `/proc/diskstats`.
//!
//! Line format (kernel 2.6.25+, newer kernels append discard/flush fields
//! which are ignored):
//! ```text
//! major minor name rd_ios rd_merges rd_sectors rd_ticks wr_ios wr_merges wr_sectors wr_ticks in_flight io_ticks time_in_queue
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Minimum number of whitespace-separated fields per diskstats line.
const MIN_FIELDS: usize = 14;

/// Fallback when `sysconf(_SC_CLK_TCK)` fails.
const DEFAULT_HZ: u64 = 100;

/// Errors raised while reading device counters. These never fail a
/// benchmark run; the sampler logs them and skips the tick.
#[derive(Error, Debug)]
pub enum DiskStatsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse counters: {0}")]
    Parse(String),
}

/// Counters of one block device at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounterSnapshot {
    pub major: u32,
    pub minor: u32,
    pub name: String,
    pub reads_completed: u64,
    pub reads_merged: u64,
    pub sectors_read: u64,
    /// Milliseconds spent reading
    pub read_ms: u64,
    pub writes_completed: u64,
    pub writes_merged: u64,
    pub sectors_written: u64,
    /// Milliseconds spent writing
    pub write_ms: u64,
    pub in_flight: u64,
    /// Milliseconds spent doing I/O
    pub io_ms: u64,
    /// Weighted milliseconds spent doing I/O
    pub weighted_ms: u64,
    /// System uptime in clock ticks when the counters were read
    pub uptime_ticks: u64,
}

impl DeviceCounterSnapshot {
    /// All-zero baseline with uptime 0, used before the first real sample.
    pub fn zero(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Snapshot of every device, keyed by name.
pub type DeviceTable = BTreeMap<String, DeviceCounterSnapshot>;

fn field<T: std::str::FromStr>(parts: &[&str], idx: usize, line_no: usize) -> Result<T, DiskStatsError> {
    parts[idx].parse().map_err(|_| {
        DiskStatsError::Parse(format!(
            "line {}: field {} ('{}') is not a number",
            line_no + 1,
            idx + 1,
            parts[idx]
        ))
    })
}

/// Parse diskstats `text`, stamping every snapshot with `uptime_ticks`.
pub fn parse_diskstats(text: &str, uptime_ticks: u64) -> Result<DeviceTable, DiskStatsError> {
    let mut table = DeviceTable::new();

    for (line_no, line) in text.lines().enumerate() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < MIN_FIELDS {
            return Err(DiskStatsError::Parse(format!(
                "line {}: expected at least {} fields, found {}",
                line_no + 1,
                MIN_FIELDS,
                parts.len()
            )));
        }

        let snapshot = DeviceCounterSnapshot {
            major: field(&parts, 0, line_no)?,
            minor: field(&parts, 1, line_no)?,
            name: parts[2].to_string(),
            reads_completed: field(&parts, 3, line_no)?,
            reads_merged: field(&parts, 4, line_no)?,
            sectors_read: field(&parts, 5, line_no)?,
            read_ms: field(&parts, 6, line_no)?,
            writes_completed: field(&parts, 7, line_no)?,
            writes_merged: field(&parts, 8, line_no)?,
            sectors_written: field(&parts, 9, line_no)?,
            write_ms: field(&parts, 10, line_no)?,
            in_flight: field(&parts, 11, line_no)?,
            io_ms: field(&parts, 12, line_no)?,
            weighted_ms: field(&parts, 13, line_no)?,
            uptime_ticks,
        };
        table.insert(snapshot.name.clone(), snapshot);
    }

    Ok(table)
}

/// Convert `/proc/uptime` ("secs.cents idle") into clock ticks.
pub fn parse_uptime(text: &str, hz: u64) -> Result<u64, DiskStatsError> {
    let first = text
        .split_whitespace()
        .next()
        .ok_or_else(|| DiskStatsError::Parse("empty uptime".to_string()))?;
    let bad = || DiskStatsError::Parse(format!("malformed uptime '{}'", first));

    let (secs, frac) = first.split_once('.').unwrap_or((first, "0"));
    let secs: u64 = secs.parse().map_err(|_| bad())?;
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    // Hundredths only, right-padded ("5" means 50 cents)
    let cents: u64 = format!("{:0<2}", &frac[..frac.len().min(2)])
        .parse()
        .map_err(|_| bad())?;

    Ok(secs * hz + cents * hz / 100)
}

/// Kernel clock ticks per second.
pub fn clock_ticks_per_sec() -> u64 {
    // SAFETY: sysconf has no side effects for this query.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        debug!("invalid sysconf(_SC_CLK_TCK) return value {}, assuming {}", ticks, DEFAULT_HZ);
        DEFAULT_HZ
    } else {
        ticks as u64
    }
}

/// Provider of device counter tables.
pub trait CounterSource: Send {
    fn read_table(&mut self) -> Result<DeviceTable, DiskStatsError>;
}

/// Reads `/proc/diskstats` and `/proc/uptime`.
#[derive(Debug, Clone)]
pub struct ProcDiskStats {
    diskstats: PathBuf,
    uptime: PathBuf,
    hz: u64,
}

impl ProcDiskStats {
    pub fn new(hz: u64) -> Self {
        Self::with_paths("/proc/diskstats", "/proc/uptime", hz)
    }

    pub fn with_paths(diskstats: impl Into<PathBuf>, uptime: impl Into<PathBuf>, hz: u64) -> Self {
        Self {
            diskstats: diskstats.into(),
            uptime: uptime.into(),
            hz,
        }
    }

    fn read(path: &PathBuf) -> Result<String, DiskStatsError> {
        fs::read_to_string(path).map_err(|source| DiskStatsError::Read {
            path: path.display().to_string(),
            source,
        })
    }
}

impl CounterSource for ProcDiskStats {
    fn read_table(&mut self) -> Result<DeviceTable, DiskStatsError> {
        let uptime = parse_uptime(&Self::read(&self.uptime)?, self.hz)?;
        parse_diskstats(&Self::read(&self.diskstats)?, uptime)
    }
}

/// Names of every device the source currently reports, in sorted order.
pub fn discover_devices<S: CounterSource + ?Sized>(source: &mut S) -> Result<Vec<String>, DiskStatsError> {
    let table = source.read_table()?;
    Ok(table.into_keys().collect())
}
