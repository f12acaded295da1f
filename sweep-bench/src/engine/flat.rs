// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Exact brute-force engine.
//!
//! Scans every base vector, so its recall is 1.0 at any search depth. It
//! reports simulated 4 KiB page reads so that I/O columns carry sensible
//! values in smoke runs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::{EngineError, FilterLabel, SearchEngine, SearchParams};
use crate::dataset::{self, Matrix};
use crate::harness::config::{with_suffix, DataType, Metric};
use crate::harness::stats::QueryRecord;

const PAGE_SIZE: usize = 4096;

/// Candidate ordered by distance, then id.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.total_cmp(&other.dist).then(self.id.cmp(&other.id))
    }
}

pub struct FlatEngine {
    data_type: DataType,
    metric: Metric,
    base: Option<Matrix<f32>>,
    /// Label ids per base point
    point_labels: Vec<Vec<u32>>,
    label_ids: HashMap<String, u32>,
    cached: HashSet<u32>,
}

impl FlatEngine {
    pub fn new(data_type: DataType, metric: Metric) -> Self {
        Self {
            data_type,
            metric,
            base: None,
            point_labels: Vec::new(),
            label_ids: HashMap::new(),
            cached: HashSet::new(),
        }
    }

    /// Engine over in-memory vectors.
    pub fn from_matrix(base: Matrix<f32>, metric: Metric) -> Self {
        let mut engine = Self::new(DataType::Float, metric);
        engine.base = Some(base);
        engine
    }

    /// Attach comma-separated labels, one line per base point.
    pub fn set_labels<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.label_ids.clear();
        self.point_labels = lines
            .iter()
            .map(|line| {
                line.as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| {
                        let next = self.label_ids.len() as u32;
                        *self.label_ids.entry(l.to_string()).or_insert(next)
                    })
                    .collect()
            })
            .collect();
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::Mips => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            Metric::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na.sqrt() * nb.sqrt())
                }
            }
        }
    }

    fn has_label(&self, id: usize, label: FilterLabel) -> bool {
        self.point_labels
            .get(id)
            .map_or(false, |labels| labels.contains(&label.0))
    }
}

impl SearchEngine for FlatEngine {
    fn name(&self) -> &str {
        "flat"
    }

    fn load(&mut self, num_threads: usize, index_prefix: &Path) -> Result<(), EngineError> {
        let load_err = |reason: String| EngineError::Load {
            prefix: index_prefix.display().to_string(),
            reason,
        };

        let base_path = with_suffix(index_prefix, "_base.bin");
        let base = dataset::load_as_f32(&base_path, self.data_type)
            .map_err(|e| load_err(e.to_string()))?;

        let labels_path = with_suffix(index_prefix, "_labels.txt");
        if labels_path.exists() {
            let content = fs::read_to_string(&labels_path).map_err(|e| load_err(e.to_string()))?;
            let lines: Vec<&str> = content.lines().collect();
            if lines.len() != base.rows {
                return Err(load_err(format!(
                    "{} label lines for {} points",
                    lines.len(),
                    base.rows
                )));
            }
            self.set_labels(&lines);
        }

        info!(
            "flat engine loaded {} x {} {} vectors ({} threads, {} labels)",
            base.rows,
            base.cols,
            self.data_type,
            num_threads,
            self.label_ids.len()
        );
        self.base = Some(base);
        Ok(())
    }

    fn dim(&self) -> usize {
        self.base.as_ref().map_or(0, |b| b.cols)
    }

    /// Points nearest the centroid, the region every query passes through.
    fn cache_frontier(&self, budget: usize) -> Vec<u32> {
        let Some(base) = self.base.as_ref() else {
            return Vec::new();
        };
        if budget == 0 || base.rows == 0 {
            return Vec::new();
        }

        let mut centroid = vec![0.0f32; base.cols];
        for i in 0..base.rows {
            for (c, v) in centroid.iter_mut().zip(base.row(i)) {
                *c += v;
            }
        }
        centroid.iter_mut().for_each(|c| *c /= base.rows as f32);

        let mut by_dist: Vec<Candidate> = (0..base.rows)
            .map(|i| Candidate {
                dist: self.distance(&centroid, base.row(i)),
                id: i as u32,
            })
            .collect();
        by_dist.sort_unstable();
        by_dist.truncate(budget);
        by_dist.into_iter().map(|c| c.id).collect()
    }

    fn load_cache(&mut self, nodes: &[u32]) {
        self.cached = nodes.iter().copied().collect();
        debug!("flat engine caching {} nodes", self.cached.len());
    }

    fn resolve_filter_label(&self, raw: &str) -> Result<FilterLabel, EngineError> {
        self.label_ids
            .get(raw)
            .map(|&id| FilterLabel(id))
            .ok_or_else(|| EngineError::UnknownLabel(raw.to_string()))
    }

    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        ids: &mut [u32],
        dists: &mut [f32],
        stats: &mut QueryRecord,
    ) -> Result<(), EngineError> {
        let start = Instant::now();
        let base = self.base.as_ref().ok_or(EngineError::NotLoaded)?;
        if query.len() != base.cols {
            return Err(EngineError::DimensionMismatch {
                expected: base.cols,
                actual: query.len(),
            });
        }
        let k = params.k.min(ids.len()).min(dists.len());

        let rows_per_page = (PAGE_SIZE / (base.cols * 4).max(1)).max(1);
        let max_misses = params.io_limit.map(|limit| limit as usize * rows_per_page);

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        let (mut hits, mut misses, mut cmps) = (0u32, 0usize, 0u32);

        for i in 0..base.rows {
            let cached = self.cached.contains(&(i as u32));
            if !cached && max_misses.map_or(false, |max| misses >= max) {
                continue;
            }
            if let Some(label) = params.filter {
                if !self.has_label(i, label) {
                    continue;
                }
            }
            if cached {
                hits += 1;
            } else {
                misses += 1;
            }

            let candidate = Candidate {
                dist: self.distance(query, base.row(i)),
                id: i as u32,
            };
            cmps += 1;
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().map_or(false, |worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        let found = heap.into_sorted_vec();
        for slot in 0..k {
            match found.get(slot) {
                Some(c) => {
                    ids[slot] = c.id;
                    dists[slot] = c.dist;
                }
                None => {
                    ids[slot] = u32::MAX;
                    dists[slot] = f32::MAX;
                }
            }
        }

        let n_ios = misses.div_ceil(rows_per_page) as u32;
        let elapsed_us = start.elapsed().as_secs_f32() * 1e6;
        *stats = QueryRecord {
            total_us: elapsed_us,
            cpu_us: elapsed_us,
            compute_dist_us: elapsed_us,
            n_4k: n_ios,
            n_ios,
            read_size: n_ios.saturating_mul(PAGE_SIZE as u32),
            n_cache_hits: hits,
            n_cache_misses: misses as u32,
            n_cmps: cmps,
            n_neighbors: found.len() as u32,
            ..Default::default()
        };
        Ok(())
    }
}
