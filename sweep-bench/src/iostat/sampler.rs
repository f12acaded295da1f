// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Background sampler writing per-device I/O rates to CSV.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::diskstats::{CounterSource, DeviceCounterSnapshot};
use super::rates::{DerivedRateMetrics, IOSTAT_HEADER};
use super::task::PeriodicTask;
use crate::clock::BenchClock;

/// What the sampler did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerSummary {
    /// Devices rows were written for
    pub devices: Vec<String>,
    pub ticks_written: u64,
    /// Ticks lost to unreadable or unparsable counters
    pub ticks_skipped: u64,
    pub rows_written: u64,
    /// The sink failed and the sampler exited before being stopped
    pub stopped_early: bool,
}

/// Derives rates for the tracked devices each tick.
///
/// One previous snapshot is kept per tracked device. It starts as an
/// all-zero baseline, so the first tick reports averages since boot.
pub struct IoSampler<S> {
    source: S,
    previous: BTreeMap<String, DeviceCounterSnapshot>,
    hz: u64,
    clock: BenchClock,
    summary: SamplerSummary,
}

impl<S: CounterSource> IoSampler<S> {
    /// Track `targets` among `discovered` devices; empty `targets` tracks
    /// everything discovered. Targets that were not discovered are dropped.
    pub fn new(source: S, discovered: &[String], targets: &[String], hz: u64, clock: BenchClock) -> Self {
        let tracked: Vec<String> = if targets.is_empty() {
            discovered.to_vec()
        } else {
            targets
                .iter()
                .filter(|t| {
                    let found = discovered.contains(*t);
                    if !found {
                        warn!("iostat target device '{}' not found, ignoring", t);
                    }
                    found
                })
                .cloned()
                .collect()
        };

        let previous = tracked
            .iter()
            .map(|name| (name.clone(), DeviceCounterSnapshot::zero(name)))
            .collect();

        Self {
            source,
            previous,
            hz,
            clock,
            summary: SamplerSummary {
                devices: tracked,
                ..Default::default()
            },
        }
    }

    pub fn devices(&self) -> &[String] {
        &self.summary.devices
    }

    pub fn summary(&self) -> &SamplerSummary {
        &self.summary
    }

    /// Sample once and append one row per tracked device.
    ///
    /// Counter read failures skip the tick; only sink failures are returned.
    pub fn tick<W: Write>(&mut self, sink: &mut csv::Writer<W>) -> Result<(), csv::Error> {
        let mut table = match self.source.read_table() {
            Ok(table) => table,
            Err(e) => {
                warn!("skipping iostat tick: {}", e);
                self.summary.ticks_skipped += 1;
                return Ok(());
            }
        };
        let timestamp_us = self.clock.elapsed_us();

        for (name, prev) in self.previous.iter_mut() {
            let Some(curr) = table.remove(name) else {
                debug!("device '{}' missing from counters, no row this tick", name);
                continue;
            };
            let metrics = DerivedRateMetrics::between(prev, &curr, self.hz);
            sink.write_record(metrics.record(timestamp_us, name))?;
            self.summary.rows_written += 1;
            *prev = curr;
        }

        sink.flush()?;
        self.summary.ticks_written += 1;
        Ok(())
    }
}

impl<S: CounterSource + 'static> IoSampler<S> {
    /// Write the CSV header and start sampling every `interval` on a
    /// background thread.
    pub fn spawn<W: Write + Send + 'static>(
        self,
        mut sink: csv::Writer<W>,
        interval: Duration,
    ) -> io::Result<SamplerHandle<S, W>> {
        sink.write_record(IOSTAT_HEADER)?;
        sink.flush()?;
        info!(
            "iostat sampler started for {:?} every {:?}",
            self.devices(),
            interval
        );

        let task = PeriodicTask::spawn("iostat-sampler", interval, (self, sink), |(sampler, sink)| {
            match sampler.tick(sink) {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    error!("iostat sink failed, sampler exiting: {}", e);
                    sampler.summary.stopped_early = true;
                    ControlFlow::Break(())
                }
            }
        })?;

        Ok(SamplerHandle { task })
    }
}

/// Owner side of a running sampler.
pub struct SamplerHandle<S, W: Write> {
    task: PeriodicTask<(IoSampler<S>, csv::Writer<W>)>,
}

impl<S: CounterSource + 'static, W: Write + Send + 'static> SamplerHandle<S, W> {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the sampler to stop, wait for it and flush the sink.
    pub fn stop(self) -> SamplerSummary {
        let state = self.task.stop(|| info!("waiting for iostat sampler to stop"));
        match state {
            Some((sampler, mut sink)) => {
                if let Err(e) = sink.flush() {
                    warn!("failed to flush iostat sink: {}", e);
                }
                info!(
                    "iostat sampler stopped after {} ticks ({} skipped)",
                    sampler.summary.ticks_written, sampler.summary.ticks_skipped
                );
                sampler.summary
            }
            None => {
                error!("iostat sampler thread panicked");
                SamplerSummary {
                    stopped_early: true,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iostat::diskstats::{DeviceTable, DiskStatsError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Four devices whose counters advance by 100 ops per read.
    struct ScriptedSource {
        reads: Arc<AtomicU64>,
        fail_on: Option<u64>,
    }

    impl CounterSource for ScriptedSource {
        fn read_table(&mut self) -> Result<DeviceTable, DiskStatsError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(DiskStatsError::Parse("scripted failure".to_string()));
            }
            let mut table = DeviceTable::new();
            for name in ["sda", "sdb", "nvme0n1", "nvme1n1"] {
                table.insert(
                    name.to_string(),
                    DeviceCounterSnapshot {
                        name: name.to_string(),
                        reads_completed: n * 100,
                        read_ms: n * 50,
                        io_ms: n * 10,
                        uptime_ticks: n * 100,
                        ..Default::default()
                    },
                );
            }
            Ok(table)
        }
    }

    fn source(fail_on: Option<u64>) -> (ScriptedSource, Arc<AtomicU64>) {
        let reads = Arc::new(AtomicU64::new(0));
        (
            ScriptedSource {
                reads: Arc::clone(&reads),
                fail_on,
            },
            reads,
        )
    }

    fn all_devices() -> Vec<String> {
        ["nvme0n1", "nvme1n1", "sda", "sdb"].iter().map(|s| s.to_string()).collect()
    }

    fn rows(buf: Vec<u8>) -> Vec<csv::StringRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(buf.as_slice());
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_one_row_per_tick_for_single_target() {
        let (src, _) = source(None);
        let mut sampler = IoSampler::new(src, &all_devices(), &["sdb".to_string()], 100, BenchClock::start());
        let mut sink = csv::Writer::from_writer(Vec::new());

        for _ in 0..5 {
            sampler.tick(&mut sink).unwrap();
        }
        let rows = rows(sink.into_inner().unwrap());
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| &r[1] == "sdb"));
    }

    #[test]
    fn test_empty_targets_track_all_discovered() {
        let (src, _) = source(None);
        let mut sampler = IoSampler::new(src, &all_devices(), &[], 100, BenchClock::start());
        let mut sink = csv::Writer::from_writer(Vec::new());
        sampler.tick(&mut sink).unwrap();
        sampler.tick(&mut sink).unwrap();
        assert_eq!(rows(sink.into_inner().unwrap()).len(), 8);
        assert_eq!(sampler.summary().rows_written, 8);
    }

    #[test]
    fn test_unknown_target_is_dropped() {
        let (src, _) = source(None);
        let sampler = IoSampler::new(
            src,
            &all_devices(),
            &["sda".to_string(), "md0".to_string()],
            100,
            BenchClock::start(),
        );
        assert_eq!(sampler.devices(), &["sda".to_string()]);
    }

    #[test]
    fn test_first_tick_uses_zero_baseline_then_rolls_forward() {
        let (src, _) = source(None);
        let mut sampler = IoSampler::new(src, &all_devices(), &["sda".to_string()], 100, BenchClock::start());
        let mut sink = csv::Writer::from_writer(Vec::new());
        sampler.tick(&mut sink).unwrap();
        sampler.tick(&mut sink).unwrap();
        let rows = rows(sink.into_inner().unwrap());

        // Both intervals are 100 reads over 100 ticks at HZ=100
        assert_eq!(&rows[0][4], "100.00");
        assert_eq!(&rows[1][4], "100.00");
        // 50ms per read
        assert_eq!(&rows[1][11], "0.50");
    }

    /// `sdb` is present on the first read only.
    struct VanishingSource {
        reads: u64,
    }

    impl CounterSource for VanishingSource {
        fn read_table(&mut self) -> Result<DeviceTable, DiskStatsError> {
            self.reads += 1;
            let mut table = DeviceTable::new();
            let names: &[&str] = if self.reads == 1 { &["sda", "sdb"] } else { &["sda"] };
            for name in names {
                table.insert(
                    name.to_string(),
                    DeviceCounterSnapshot {
                        name: name.to_string(),
                        uptime_ticks: self.reads * 100,
                        ..Default::default()
                    },
                );
            }
            Ok(table)
        }
    }

    #[test]
    fn test_vanished_device_writes_no_row() {
        let discovered = vec!["sda".to_string(), "sdb".to_string()];
        let mut sampler = IoSampler::new(VanishingSource { reads: 0 }, &discovered, &[], 100, BenchClock::start());
        let mut sink = csv::Writer::from_writer(Vec::new());
        sampler.tick(&mut sink).unwrap();
        sampler.tick(&mut sink).unwrap();

        let rows = rows(sink.into_inner().unwrap());
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][1], "sda");
        assert_eq!(sampler.summary().ticks_written, 2);
        assert_eq!(sampler.summary().ticks_skipped, 0);
        assert_eq!(sampler.summary().rows_written, 3);
    }

    #[test]
    fn test_read_failure_skips_tick() {
        let (src, _) = source(Some(2));
        let mut sampler = IoSampler::new(src, &all_devices(), &["sda".to_string()], 100, BenchClock::start());
        let mut sink = csv::Writer::from_writer(Vec::new());
        for _ in 0..3 {
            sampler.tick(&mut sink).unwrap();
        }
        assert_eq!(sampler.summary().ticks_written, 2);
        assert_eq!(sampler.summary().ticks_skipped, 1);
        assert_eq!(rows(sink.into_inner().unwrap()).len(), 2);
    }

    #[test]
    fn test_spawned_sampler_writes_header_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iostats.csv");
        let (src, reads) = source(None);
        let sampler = IoSampler::new(src, &all_devices(), &["nvme0n1".to_string()], 100, BenchClock::start());

        let handle = sampler
            .spawn(csv::Writer::from_path(&path).unwrap(), Duration::from_millis(5))
            .unwrap();
        let start = std::time::Instant::now();
        while reads.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let summary = handle.stop();
        assert!(!summary.stopped_early);
        assert!(summary.ticks_written >= 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), IOSTAT_HEADER.join(","));
        assert_eq!(lines.count() as u64, summary.rows_written);
        assert_eq!(summary.rows_written, summary.ticks_written);
    }

    /// Sink that accepts the header and then refuses writes.
    struct FailingSink {
        writes: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if self.writes > 1 {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            } else {
                Ok(buf.len())
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_ends_sampler() {
        let (src, _) = source(None);
        let sampler = IoSampler::new(src, &all_devices(), &[], 100, BenchClock::start());
        let sink = csv::Writer::from_writer(FailingSink { writes: 0 });

        let handle = sampler.spawn(sink, Duration::from_millis(1)).unwrap();
        let start = std::time::Instant::now();
        while !handle.is_finished() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let summary = handle.stop();
        assert!(summary.stopped_early);
        assert_eq!(summary.ticks_written, 0);
    }
}
