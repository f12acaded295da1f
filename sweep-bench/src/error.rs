// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Error taxonomy and process exit codes for sweep runs.

use std::process::ExitCode;

use thiserror::Error;

use crate::engine::EngineError;

pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Errors surfaced by the benchmark harness.
///
/// Telemetry faults have no variant here: the I/O sampler logs its own
/// failures and never turns them into a benchmark error.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid parameter combination, detected before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated `.bin` matrix / truth-set file.
    #[error("dataset error in {path}: {reason}")]
    Dataset { path: String, reason: String },

    #[error("search engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("report error: {0}")]
    Report(String),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn dataset(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        BenchError::Dataset {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Exit status the binary reports for this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            BenchError::Config(_) => ExitStatus::ConfigError,
            _ => ExitStatus::RuntimeError,
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError::Report(e.to_string())
    }
}

/// Process-level outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Recall floor met (or none configured) and no regression gate failed.
    Success,
    /// I/O, engine or report failure while running.
    RuntimeError,
    /// Rejected configuration; nothing was executed.
    ConfigError,
    /// The benchmark completed but measured quality is below the floor.
    QualityGateFailed,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::RuntimeError => 1,
            ExitStatus::ConfigError => 2,
            ExitStatus::QualityGateFailed => 3,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
