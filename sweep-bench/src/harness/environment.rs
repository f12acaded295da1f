// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Host and storage environment captured into the run report.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::process::Command;

use crate::iostat::clock_ticks_per_sec;

/// Block device attributes from sysfs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDeviceInfo {
    pub name: String,
    /// `queue/rotational`: spinning disk when true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotational: Option<bool>,
    /// Active I/O scheduler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
}

/// Environment information for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    /// Kernel release
    pub os_version: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_gb: u64,
    /// Kernel clock ticks per second used to scale counter rates
    pub clock_ticks_per_sec: u64,
    /// Devices the I/O sampler discovered
    pub block_devices: Vec<BlockDeviceInfo>,
    /// Query worker threads
    pub worker_threads: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_governor: Option<String>,
    pub git_sha: String,
    /// Build profile (debug/release)
    pub build_profile: String,
    /// Warnings about non-reproducible settings
    pub warnings: Vec<String>,
}

impl EnvironmentInfo {
    /// Collect environment information for a run over `devices` with
    /// `worker_threads` query threads.
    pub fn collect(devices: &[String], worker_threads: usize) -> Self {
        let mut warnings = Vec::new();

        let cpu_governor = read_trimmed("/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor");
        if let Some(ref gov) = cpu_governor {
            if gov != "performance" {
                warnings.push(format!(
                    "CPU governor is '{}', should be 'performance' for reproducible results",
                    gov
                ));
            }
        }

        let block_devices: Vec<BlockDeviceInfo> = devices
            .iter()
            .map(|name| block_device_info(Path::new("/sys/block"), name))
            .collect();

        for dev in &block_devices {
            if dev.rotational == Some(true) {
                warnings.push(format!("{} is a rotational device", dev.name));
            }
        }

        let build_profile = if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "release".to_string()
        };
        if build_profile == "debug" {
            warnings.push("Running in debug mode - latencies not meaningful".to_string());
        }

        Self {
            os: std::env::consts::OS.to_string(),
            os_version: command_output("uname", &["-r"]),
            cpu_model: fs::read_to_string("/proc/cpuinfo")
                .ok()
                .and_then(|s| parse_cpu_model(&s))
                .unwrap_or_else(|| "unknown".to_string()),
            cpu_cores: num_cpus::get() as u32,
            ram_gb: fs::read_to_string("/proc/meminfo")
                .ok()
                .and_then(|s| parse_mem_total_gb(&s))
                .unwrap_or(0),
            clock_ticks_per_sec: clock_ticks_per_sec(),
            block_devices,
            worker_threads,
            cpu_governor,
            git_sha: command_output("git", &["rev-parse", "--short", "HEAD"]),
            build_profile,
            warnings,
        }
    }
}

fn read_trimmed(path: impl AsRef<Path>) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn block_device_info(sys_block: &Path, name: &str) -> BlockDeviceInfo {
    let queue = sys_block.join(name).join("queue");
    BlockDeviceInfo {
        name: name.to_string(),
        rotational: read_trimmed(queue.join("rotational")).map(|v| v == "1"),
        scheduler: read_trimmed(queue.join("scheduler")).and_then(|s| parse_scheduler(&s)),
    }
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

fn parse_mem_total_gb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|n| n.parse::<u64>().ok())
        .map(|kb| kb / (1024 * 1024))
}

/// Format: "mq-deadline [none] kyber" - the bracketed entry is active.
fn parse_scheduler(s: &str) -> Option<String> {
    s.split_whitespace()
        .find(|w| w.starts_with('['))
        .map(|w| w.trim_matches(|c| c == '[' || c == ']').to_string())
}
