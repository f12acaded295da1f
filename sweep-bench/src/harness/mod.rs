// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Measurement and reporting harness for search sweeps
//!
//! This module provides:
//! - Run configuration loaded from TOML or YAML
//! - Per-query statistics and HDRHistogram latency summaries
//! - Recall@k evaluation against a truth set
//! - Recall floor and baseline regression gates
//! - CSV, console and JSON reports

pub mod config;
pub mod environment;
pub mod gates;
pub mod metrics;
pub mod recall;
pub mod reporter;
pub mod stats;

pub use config::{DataType, FilterSpec, IostatConfig, LabelType, Metric, SearchConfig};
pub use environment::EnvironmentInfo;
pub use gates::{GateEvaluation, GateMode, GateResult, RegressionGates};
pub use metrics::{LatencyHistogram, LatencySummary};
pub use recall::{RecallEvaluator, RecallMetrics};
pub use reporter::{ReportSink, RunReport};
pub use stats::QueryRecord;
