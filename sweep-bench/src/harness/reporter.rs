// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Sweep output: streamed console rows, the benchmark CSV, the end-of-run
//! summary table and the JSON run report.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::config::SearchConfig;
use super::environment::EnvironmentInfo;
use super::gates::{ConfigSnapshot, GateEvaluation, GateResult};
use crate::error::{BenchError, BenchResult};
use crate::iostat::SamplerSummary;
use crate::orchestrator::SweepResult;

/// Schema version for the run report.
const SCHEMA_VERSION: &str = "1.0";

/// Benchmark CSV header. The recall column is appended when ground truth is
/// available.
pub fn report_header(k: usize, with_recall: bool) -> Vec<String> {
    let mut header: Vec<String> = [
        "searchDepth",
        "beamWidth",
        "qpsPerThread",
        "meanLatencyUs",
        "p999LatencyUs",
        "meanIoCount",
        "meanCpuUs",
        "meanComputeDistUs",
        "meanPqDistUs",
        "meanSinglePqDistUs",
        "meanIoTimeUs",
        "meanIo4kCount",
        "meanNeighborsVisited",
        "meanComparisons",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if with_recall {
        header.push(format!("recallAt{}", k));
    }
    header
}

fn report_record(r: &SweepResult, with_recall: bool) -> Vec<String> {
    let mut record = vec![
        r.search_depth.to_string(),
        r.beam_width.to_string(),
        format!("{:.2}", r.qps_per_thread),
        format!("{:.2}", r.mean_latency_us),
        format!("{:.2}", r.p999_latency_us),
        format!("{:.2}", r.mean_ios),
        format!("{:.2}", r.mean_cpu_us),
        format!("{:.2}", r.mean_compute_dist_us),
        format!("{:.2}", r.mean_pq_dist_us),
        format!("{:.2}", r.mean_single_pq_dist_us),
        format!("{:.2}", r.mean_io_us),
        format!("{:.2}", r.mean_n_4k),
        format!("{:.2}", r.mean_neighbors),
        format!("{:.2}", r.mean_cmps),
    ];
    if with_recall {
        record.push(r.recall.map(|v| format!("{:.4}", v)).unwrap_or_default());
    }
    record
}

/// Destination for per-configuration rows as they complete.
///
/// Each row is written to the CSV (and flushed) and, if enabled, printed to
/// the console before the next configuration starts.
pub struct ReportSink<W: Write> {
    csv: csv::Writer<W>,
    console: bool,
    with_recall: bool,
    started: bool,
}

impl ReportSink<fs::File> {
    /// CSV at `path`, creating the parent directory.
    pub fn create(path: &Path, console: bool) -> BenchResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(fs::File::create(path)?, console))
    }
}

impl<W: Write> ReportSink<W> {
    pub fn new(writer: W, console: bool) -> Self {
        Self {
            csv: csv::Writer::from_writer(writer),
            console,
            with_recall: false,
            started: false,
        }
    }

    /// Write the header. Must precede the first row.
    pub fn begin(&mut self, k: usize, with_recall: bool) -> BenchResult<()> {
        self.with_recall = with_recall;
        let header = report_header(k, with_recall);
        self.csv.write_record(&header)?;
        self.csv.flush()?;
        self.started = true;

        if self.console {
            let line: String = header.iter().map(|h| format!("{:>16}", h)).collect();
            println!("{}", line.bold());
            println!("{}", "=".repeat(line.len()));
        }
        Ok(())
    }

    pub fn emit(&mut self, result: &SweepResult) -> BenchResult<()> {
        if !self.started {
            return Err(BenchError::Report(
                "report row written before the header".to_string(),
            ));
        }
        let record = report_record(result, self.with_recall);
        self.csv.write_record(&record)?;
        self.csv.flush()?;

        if self.console {
            let line: String = record.iter().map(|v| format!("{:>16}", v)).collect();
            println!("{}", line);
        }
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> BenchResult<W> {
        self.csv
            .into_inner()
            .map_err(|e| BenchError::Report(format!("failed to flush report: {}", e)))
    }
}

/// Print the end-of-run table, starring the best-recall row (or the fastest
/// row when recall was not measured), followed by the quality gate verdict.
pub fn print_summary(results: &[SweepResult], best_recall: Option<f64>, floor: f64, passed: bool) {
    if !results.is_empty() {
        println!("\n{}", "━━━ Sweep summary ━━━".bold().cyan());

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS);
        table.set_header(vec![
            "L",
            "W",
            "QPS/thread",
            "Mean (μs)",
            "p99.9 (μs)",
            "p50 (μs)",
            "Mean IOs",
            "Cache hit",
            "Recall",
        ]);

        let best_idx = match best_recall {
            Some(best) => results.iter().position(|r| r.recall == Some(best)),
            None => results
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.qps_per_thread.total_cmp(&b.1.qps_per_thread))
                .map(|(i, _)| i),
        };

        for (i, r) in results.iter().enumerate() {
            let is_best = best_idx == Some(i);
            let depth = if is_best {
                Cell::new(format!("★ {}", r.search_depth)).fg(Color::Green)
            } else {
                Cell::new(r.search_depth)
            };
            let recall = r
                .recall
                .map(|v| format!("{:.2}%", v * 100.0))
                .unwrap_or_else(|| "-".to_string());

            table.add_row(vec![
                depth,
                Cell::new(r.beam_width),
                Cell::new(format!("{:.1}", r.qps_per_thread)),
                Cell::new(format!("{:.1}", r.mean_latency_us)),
                Cell::new(format!("{:.1}", r.p999_latency_us)),
                Cell::new(r.latency.p50_us),
                Cell::new(format!("{:.1}", r.mean_ios)),
                Cell::new(format!("{:.1}%", r.mean_cache_hit_rate * 100.0)),
                Cell::new(recall),
            ]);
        }

        println!("{table}");
    }

    let best = best_recall
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string());
    let verdict = if passed { "PASS".green().bold() } else { "FAIL".red().bold() };
    println!(
        "Quality gate: {} (best recall {}, floor {:.2}%)",
        verdict,
        best,
        floor * 100.0
    );
}

/// Print the non-trivial gate outcomes.
pub fn print_gate_results(gates: &GateEvaluation) {
    println!(
        "Gate evaluation: {}",
        if gates.overall_pass {
            "PASS ✅".to_string()
        } else {
            format!("FAIL ❌ ({})", gates.summary)
        }
    );
    for result in &gates.results {
        match result {
            GateResult::Pass => {}
            GateResult::Improvement { metric, delta_pct } => {
                println!("  ✅ {}: +{:.1}% (improvement)", metric, delta_pct);
            }
            GateResult::Warning {
                metric,
                delta_pct,
                threshold_pct,
            } => {
                println!("  ⚠️  {}: {:.1}% (threshold: {:.1}%)", metric, delta_pct, threshold_pct);
            }
            GateResult::Fail {
                metric,
                delta_pct,
                threshold_pct,
            } => {
                println!("  ❌ {}: {:.1}% (threshold: {:.1}%)", metric, delta_pct, threshold_pct);
            }
            GateResult::BelowFloor { metric, value, floor } => {
                println!("  ❌ {}: {:.4} below floor {:.4}", metric, value, floor);
            }
        }
    }
}

/// Paths to artifact files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub report_csv: String,
    /// Id / distance result files, one pair per configuration
    #[serde(default)]
    pub result_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iostat_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_json: Option<String>,
}

/// Complete run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: String,
    pub run_id: String,
    pub timestamp_utc: String,
    pub environment: EnvironmentInfo,
    pub config: SearchConfig,
    pub results: Vec<SweepResult>,
    #[serde(default)]
    pub best_recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gates: Option<GateEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<SamplerSummary>,
    pub artifacts: ArtifactPaths,
}

impl RunReport {
    pub fn builder() -> RunReportBuilder {
        RunReportBuilder::default()
    }

    /// Save report to a JSON file, creating the parent directory.
    pub fn save(&self, path: &Path) -> BenchResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| BenchError::Report(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Per-configuration metrics for gate evaluation.
    pub fn to_snapshots(&self) -> Vec<ConfigSnapshot> {
        self.results.iter().map(SweepResult::snapshot).collect()
    }
}

/// Builder for RunReport.
#[derive(Default)]
pub struct RunReportBuilder {
    run_id: Option<String>,
    timestamp: Option<String>,
    environment: Option<EnvironmentInfo>,
    config: Option<SearchConfig>,
    results: Vec<SweepResult>,
    best_recall: Option<f64>,
    gates: Option<GateEvaluation>,
    telemetry: Option<SamplerSummary>,
    artifacts: ArtifactPaths,
}

impl RunReportBuilder {
    pub fn run_id(mut self, id: &str) -> Self {
        self.run_id = Some(id.to_string());
        self
    }

    pub fn timestamp(mut self, ts: &str) -> Self {
        self.timestamp = Some(ts.to_string());
        self
    }

    pub fn environment(mut self, env: EnvironmentInfo) -> Self {
        self.environment = Some(env);
        self
    }

    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn results(mut self, results: Vec<SweepResult>, best_recall: Option<f64>) -> Self {
        self.results = results;
        self.best_recall = best_recall;
        self
    }

    pub fn gates(mut self, g: GateEvaluation) -> Self {
        self.gates = Some(g);
        self
    }

    pub fn telemetry(mut self, summary: Option<SamplerSummary>) -> Self {
        self.telemetry = summary;
        self
    }

    pub fn artifacts(mut self, artifacts: ArtifactPaths) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn build(self) -> BenchResult<RunReport> {
        let environment = self
            .environment
            .ok_or_else(|| BenchError::Report("environment info required".to_string()))?;
        let config = self
            .config
            .ok_or_else(|| BenchError::Report("configuration required".to_string()))?;

        Ok(RunReport {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: self.run_id.unwrap_or_else(|| "unknown".to_string()),
            timestamp_utc: self.timestamp.unwrap_or_else(|| "unknown".to_string()),
            environment,
            config,
            results: self.results,
            best_recall: self.best_recall,
            gates: self.gates,
            telemetry: self.telemetry,
            artifacts: self.artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::metrics::LatencySummary;

    fn result(l: u32, recall: Option<f64>) -> SweepResult {
        SweepResult {
            search_depth: l,
            beam_width: 4,
            qps_per_thread: 1234.5,
            mean_latency_us: 810.25,
            p999_latency_us: 2048.0,
            mean_ios: 12.5,
            mean_cpu_us: 100.0,
            mean_compute_dist_us: 10.0,
            mean_pq_dist_us: 20.0,
            mean_single_pq_dist_us: 1.0,
            mean_io_us: 700.0,
            mean_n_4k: 12.5,
            mean_neighbors: 64.0,
            mean_cmps: 640.0,
            mean_cache_hit_rate: 0.25,
            recall,
            latency: LatencySummary::default(),
            elapsed_secs: 0.5,
        }
    }

    #[test]
    fn test_header_recall_column() {
        let header = report_header(10, true);
        assert_eq!(header.len(), 15);
        assert_eq!(header[0], "searchDepth");
        assert_eq!(header[14], "recallAt10");
        assert_eq!(report_header(10, false).len(), 14);
    }

    #[test]
    fn test_sink_writes_header_and_rows() {
        let mut sink = ReportSink::new(Vec::new(), false);
        sink.begin(10, true).unwrap();
        sink.emit(&result(10, Some(0.95))).unwrap();
        sink.emit(&result(20, Some(0.99))).unwrap();
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("searchDepth,beamWidth,qpsPerThread"));
        assert!(lines[0].ends_with("recallAt10"));
        assert!(lines[1].starts_with("10,4,1234.50,810.25,2048.00"));
        assert!(lines[2].ends_with(",0.9900"));
    }

    #[test]
    fn test_row_before_header_is_rejected() {
        let mut sink = ReportSink::new(Vec::new(), false);
        assert!(matches!(
            sink.emit(&result(10, None)),
            Err(BenchError::Report(_))
        ));
    }

    #[test]
    fn test_report_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let config = SearchConfig::new("/idx/a", "/q.bin", "/out/a", 10, vec![10, 20]);

        let report = RunReport::builder()
            .run_id("run-1")
            .environment(EnvironmentInfo::collect(&[], 2))
            .config(config)
            .results(vec![result(10, Some(0.9)), result(20, Some(0.97))], Some(0.97))
            .build()
            .unwrap();
        report.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.best_recall, Some(0.97));
        let snapshots = loaded.to_snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].search_depth, 20);
        assert_eq!(snapshots[1].recall, Some(0.97));
    }

    #[test]
    fn test_builder_requires_environment() {
        assert!(RunReport::builder().build().is_err());
    }
}
