// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Sweep configuration: parsing, defaults and up-front validation.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::gates::GateMode;
use crate::dataset;
use crate::error::{BenchError, BenchResult};

/// Element type of the query and base vector files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Int8,
    Uint8,
}

impl Default for DataType {
    fn default() -> Self {
        Self::Float
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Int8 => write!(f, "int8"),
            Self::Uint8 => write!(f, "uint8"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(Self::Float),
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::Uint8),
            _ => Err(format!("unsupported data type '{}'; use float, int8 or uint8", s)),
        }
    }
}

/// Distance function the index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    L2,
    /// Maximum inner product
    Mips,
    Cosine,
}

impl Default for Metric {
    fn default() -> Self {
        Self::L2
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L2 => write!(f, "l2"),
            Self::Mips => write!(f, "mips"),
            Self::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l2" => Ok(Self::L2),
            "mips" => Ok(Self::Mips),
            "cosine" => Ok(Self::Cosine),
            _ => Err(format!(
                "unsupported distance function '{}'; use l2, mips or cosine",
                s
            )),
        }
    }
}

/// Width of the integer labels used for filtered search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Uint,
    Ushort,
}

impl Default for LabelType {
    fn default() -> Self {
        Self::Uint
    }
}

impl FromStr for LabelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint" => Ok(Self::Uint),
            "ushort" => Ok(Self::Ushort),
            _ => Err(format!("unsupported label type '{}'; use uint or ushort", s)),
        }
    }
}

/// Category filter applied to the query batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// One label for every query
    Global(String),
    /// One label per query, in batch order
    PerQuery(Vec<String>),
}

/// Beam width selection for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamWidth {
    Fixed(u32),
    Auto,
}

/// Block-device telemetry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IostatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Device names to report; empty means every discovered device
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Defaults to `<result_prefix>_iostats.csv`
    #[serde(default)]
    pub csv: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    1_000
}

impl Default for IostatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            devices: Vec::new(),
            interval_ms: default_interval_ms(),
            csv: None,
        }
    }
}

/// Complete configuration of one sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub metric: Metric,
    pub index_prefix: PathBuf,
    pub result_prefix: PathBuf,
    pub query_file: PathBuf,
    /// Truth set; `null` / `NULL` are treated as absent
    #[serde(default)]
    pub gt_file: Option<PathBuf>,
    pub report_csv: PathBuf,
    /// Number of results requested per query (recall@K)
    pub k: usize,
    /// Search depths (L) to sweep, in report order
    pub search_depths: Vec<u32>,
    #[serde(default = "default_threads")]
    pub num_threads: usize,
    /// 0 requests per-L tuning
    #[serde(default = "default_beam_width")]
    pub beam_width: u32,
    #[serde(default)]
    pub num_nodes_to_cache: usize,
    #[serde(default)]
    pub search_io_limit: Option<u32>,
    #[serde(default)]
    pub use_reorder_data: bool,
    #[serde(default)]
    pub filter_label: Option<String>,
    #[serde(default)]
    pub query_filters_file: Option<PathBuf>,
    #[serde(default)]
    pub label_type: LabelType,
    #[serde(default)]
    pub fail_if_recall_below: f64,
    #[serde(default)]
    pub warmup: bool,
    #[serde(default)]
    pub iostat: IostatConfig,
    #[serde(default)]
    pub report_json: Option<PathBuf>,
    #[serde(default)]
    pub baseline: Option<PathBuf>,
    #[serde(default)]
    pub gate_mode: GateMode,
}

fn default_threads() -> usize {
    num_cpus::get()
}

fn default_beam_width() -> u32 {
    2
}

/// Append `suffix` to a path prefix without inserting a separator.
pub(crate) fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl SearchConfig {
    /// Configuration with defaults for everything but the required inputs.
    pub fn new(
        index_prefix: impl Into<PathBuf>,
        query_file: impl Into<PathBuf>,
        result_prefix: impl Into<PathBuf>,
        k: usize,
        search_depths: Vec<u32>,
    ) -> Self {
        let result_prefix = result_prefix.into();
        Self {
            data_type: DataType::default(),
            metric: Metric::default(),
            index_prefix: index_prefix.into(),
            report_csv: with_suffix(&result_prefix, "_search.csv"),
            result_prefix,
            query_file: query_file.into(),
            gt_file: None,
            k,
            search_depths,
            num_threads: default_threads(),
            beam_width: default_beam_width(),
            num_nodes_to_cache: 0,
            search_io_limit: None,
            use_reorder_data: false,
            filter_label: None,
            query_filters_file: None,
            label_type: LabelType::default(),
            fail_if_recall_below: 0.0,
            warmup: false,
            iostat: IostatConfig::default(),
            report_json: None,
            baseline: None,
            gate_mode: GateMode::default(),
        }
    }

    /// Load from a TOML or YAML file, chosen by extension.
    pub fn load(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| BenchError::config(format!("failed to parse TOML config: {}", e))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| BenchError::config(format!("failed to parse YAML config: {}", e))),
            _ => Err(BenchError::config(format!(
                "config file {} must end in .toml, .yaml or .yml",
                path.display()
            ))),
        }
    }

    /// Reject invalid parameter combinations before any work starts.
    pub fn validate(&self) -> BenchResult<()> {
        if self.k == 0 {
            return Err(BenchError::config("K (recall_at) must be at least 1"));
        }
        if self.search_depths.is_empty() {
            return Err(BenchError::config("at least one search depth (L) is required"));
        }
        if self.num_threads == 0 {
            return Err(BenchError::config("num_threads must be at least 1"));
        }
        if self.metric == Metric::Mips && self.data_type != DataType::Float {
            return Err(BenchError::config(
                "inner product is only supported for float data",
            ));
        }
        if self.use_reorder_data && self.data_type != DataType::Float {
            return Err(BenchError::config(
                "reorder data is only supported for float data",
            ));
        }
        if self.filter_label.is_some() && self.query_filters_file.is_some() {
            return Err(BenchError::config(
                "only one of filter_label and query_filters_file may be given",
            ));
        }
        if !(self.fail_if_recall_below.is_finite() && self.fail_if_recall_below >= 0.0) {
            return Err(BenchError::config(format!(
                "fail_if_recall_below must be a non-negative number, got {}",
                self.fail_if_recall_below
            )));
        }
        if self.iostat.enabled && self.iostat.interval_ms == 0 {
            return Err(BenchError::config("iostat interval must be at least 1ms"));
        }
        Ok(())
    }

    pub fn beam_width_mode(&self) -> BeamWidth {
        if self.beam_width == 0 {
            BeamWidth::Auto
        } else {
            BeamWidth::Fixed(self.beam_width)
        }
    }

    /// Truth-set path, if one is configured.
    pub fn ground_truth_path(&self) -> Option<&Path> {
        self.gt_file
            .as_deref()
            .filter(|p| !matches!(p.to_str(), Some("null") | Some("NULL") | Some("")))
    }

    /// Filters to apply, reading the per-query file if configured.
    pub fn query_filters(&self) -> BenchResult<Option<FilterSpec>> {
        if let Some(ref label) = self.filter_label {
            return Ok(Some(FilterSpec::Global(label.clone())));
        }
        match self.query_filters_file {
            Some(ref path) => {
                let labels = dataset::read_filter_labels(path)?;
                Ok(Some(FilterSpec::PerQuery(labels)))
            }
            None => Ok(None),
        }
    }

    /// `<result_prefix>_search.csv`
    pub fn default_report_csv(&self) -> PathBuf {
        with_suffix(&self.result_prefix, "_search.csv")
    }

    pub fn iostat_csv_path(&self) -> PathBuf {
        self.iostat
            .csv
            .clone()
            .unwrap_or_else(|| with_suffix(&self.result_prefix, "_iostats.csv"))
    }

    pub fn warmup_query_path(&self) -> PathBuf {
        with_suffix(&self.index_prefix, "_sample_data.bin")
    }

    /// Paths of the id and distance result files for search depth `l`.
    pub fn result_paths(&self, l: u32) -> (PathBuf, PathBuf) {
        (
            with_suffix(&self.result_prefix, &format!("_{}_idx.bin", l)),
            with_suffix(&self.result_prefix, &format!("_{}_dists.bin", l)),
        )
    }
}
