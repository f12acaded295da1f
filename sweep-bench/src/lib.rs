// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Search sweep benchmark library
//!
//! This crate provides:
//! - A parameter sweep over search depths against a [`SearchEngine`]
//! - Recall@k evaluation and quality gates
//! - Block-device telemetry sampled from `/proc/diskstats`
//! - CSV and JSON reporting

pub mod clock;
pub mod coordinator;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod harness;
pub mod iostat;
pub mod orchestrator;

pub use clock::BenchClock;
pub use coordinator::{run_benchmark, RunOutcome};
pub use engine::{EngineError, FlatEngine, SearchEngine, SearchParams};
pub use error::{BenchError, BenchResult, ExitStatus};
pub use harness::*;
pub use orchestrator::{Orchestrator, SweepOutcome, SweepResult};
