// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Beam width selection for configurations run with `beam_width = 0`.

use tracing::debug;

use crate::error::BenchResult;

/// Picks a beam width for one search depth.
///
/// `trial(w)` runs a warm-up sample at beam width `w` and returns the mean
/// latency in microseconds.
pub trait BeamwidthTuner: Send {
    fn tune(
        &mut self,
        search_depth: u32,
        start_width: u32,
        trial: &mut dyn FnMut(u32) -> BenchResult<f64>,
    ) -> BenchResult<u32>;
}

/// Grows the beam width while mean latency keeps improving.
///
/// Each step widens to `max(w + 1, ceil(1.1 * w))`, capped at
/// `max_width`.
#[derive(Debug, Clone, Copy)]
pub struct LatencyTuner {
    pub max_width: u32,
}

impl Default for LatencyTuner {
    fn default() -> Self {
        Self { max_width: 64 }
    }
}

fn next_width(w: u32) -> u32 {
    let grown = (w as f64 * 1.1).ceil() as u32;
    grown.max(w + 1)
}

impl BeamwidthTuner for LatencyTuner {
    fn tune(
        &mut self,
        search_depth: u32,
        start_width: u32,
        trial: &mut dyn FnMut(u32) -> BenchResult<f64>,
    ) -> BenchResult<u32> {
        let mut best_width = start_width.clamp(1, self.max_width);
        let mut best_latency = trial(best_width)?;
        debug!("L={} W={} mean latency {:.1}us", search_depth, best_width, best_latency);

        while best_width < self.max_width {
            let candidate = next_width(best_width).min(self.max_width);
            let latency = trial(candidate)?;
            debug!("L={} W={} mean latency {:.1}us", search_depth, candidate, latency);
            if latency < best_latency {
                best_latency = latency;
                best_width = candidate;
            } else {
                break;
            }
        }

        Ok(best_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_width() {
        assert_eq!(next_width(1), 2);
        assert_eq!(next_width(2), 3);
        assert_eq!(next_width(10), 11);
        assert_eq!(next_width(20), 22);
        assert_eq!(next_width(40), 44);
    }

    #[test]
    fn test_stops_at_latency_minimum() {
        let mut tuner = LatencyTuner::default();
        let mut tried = Vec::new();
        // Latency is lowest at W=6
        let mut trial = |w: u32| {
            tried.push(w);
            Ok((w as f64 - 6.0).abs() + 100.0)
        };
        let w = tuner.tune(50, 2, &mut trial).unwrap();
        assert_eq!(w, 6);
        assert_eq!(tried, vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_capped_at_max_width() {
        let mut tuner = LatencyTuner { max_width: 8 };
        let mut trial = |w: u32| Ok(1000.0 / w as f64);
        assert_eq!(tuner.tune(50, 2, &mut trial).unwrap(), 8);
        assert_eq!(tuner.tune(50, 100, &mut trial).unwrap(), 8);
    }

    #[test]
    fn test_trial_error_propagates() {
        let mut tuner = LatencyTuner::default();
        let mut trial = |_w: u32| Err(crate::error::BenchError::config("no warm-up data"));
        assert!(tuner.tune(10, 2, &mut trial).is_err());
    }
}
