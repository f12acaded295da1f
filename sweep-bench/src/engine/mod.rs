// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! The search engine under test.
//!
//! The harness only needs the operations in [`SearchEngine`]; any
//! disk-resident index can be benchmarked by implementing it.

pub mod flat;

pub use flat::FlatEngine;

use std::path::Path;
use thiserror::Error;

use crate::harness::stats::QueryRecord;

/// Errors returned by a search engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load index {prefix}: {reason}")]
    Load { prefix: String, reason: String },

    #[error("index is not loaded")]
    NotLoaded,

    #[error("unknown filter label '{0}'")]
    UnknownLabel(String),

    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("search failed: {0}")]
    Search(String),
}

/// Integer label a filtered search is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterLabel(pub u32);

/// Parameters of one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Results to return
    pub k: usize,
    /// Candidate list size (L)
    pub search_depth: u32,
    /// Concurrent disk fetches per search step (W)
    pub beam_width: u32,
    /// Maximum reads per query
    pub io_limit: Option<u32>,
    /// Re-rank with full-precision vectors
    pub use_reorder_data: bool,
    pub filter: Option<FilterLabel>,
}

impl SearchParams {
    pub fn new(k: usize, search_depth: u32, beam_width: u32) -> Self {
        Self {
            k,
            search_depth,
            beam_width,
            io_limit: None,
            use_reorder_data: false,
            filter: None,
        }
    }
}

/// A loaded index that answers k-NN queries.
///
/// `search` takes `&self` and is called concurrently from the worker pool;
/// every call gets its own output slices and stats record.
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Load the index files under `index_prefix`.
    fn load(&mut self, num_threads: usize, index_prefix: &Path) -> Result<(), EngineError>;

    /// Vector dimension of the loaded index.
    fn dim(&self) -> usize;

    /// Up to `budget` node ids worth keeping in memory.
    fn cache_frontier(&self, budget: usize) -> Vec<u32>;

    fn load_cache(&mut self, nodes: &[u32]);

    /// Map a user-facing label to its integer form.
    fn resolve_filter_label(&self, raw: &str) -> Result<FilterLabel, EngineError>;

    /// Search for the `params.k` nearest neighbours of `query`.
    ///
    /// `ids` and `dists` hold exactly `params.k` entries and are filled in
    /// ascending distance order. `stats` is written once.
    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        ids: &mut [u32],
        dists: &mut [f32],
        stats: &mut QueryRecord,
    ) -> Result<(), EngineError>;
}
