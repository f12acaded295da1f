// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Quality and regression gates.
//!
//! Two kinds of gate decide whether a completed sweep passes:
//! - the recall floor: the best recall observed across all configurations
//!   must reach `fail_if_recall_below`;
//! - optional baseline gates: each configuration is matched by search depth
//!   against a previous run report and its QPS/thread, p99.9 latency and
//!   recall are compared with relative (or, for recall, absolute) thresholds.

use serde::{Deserialize, Serialize};

use crate::error::ExitStatus;

/// Gate result for a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum GateResult {
    /// Metric is within acceptable bounds
    Pass,
    /// Metric shows improvement
    Improvement { metric: String, delta_pct: f64 },
    /// Metric is close to threshold (warning)
    Warning {
        metric: String,
        delta_pct: f64,
        threshold_pct: f64,
    },
    /// Metric exceeds threshold (failure)
    Fail {
        metric: String,
        delta_pct: f64,
        threshold_pct: f64,
    },
    /// Best recall below the configured floor
    BelowFloor { metric: String, value: f64, floor: f64 },
}

impl GateResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateResult::Pass | GateResult::Improvement { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, GateResult::Fail { .. } | GateResult::BelowFloor { .. })
    }
}

/// Threshold preset for baseline comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    #[default]
    Default,
    /// Strict thresholds for pre-merge checks
    Pr,
    /// Relaxed thresholds for noisy nightly hosts
    Nightly,
}

impl std::str::FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "pr" => Ok(Self::Pr),
            "nightly" => Ok(Self::Nightly),
            _ => Err(format!("unknown gate mode '{}'; use default, pr or nightly", s)),
        }
    }
}

/// Regression gate configuration.
///
/// Relative thresholds are fractions (`-0.05` = 5% drop). The recall
/// threshold is absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionGates {
    /// Maximum allowed QPS/thread regression
    pub qps_regression_threshold: f64,
    /// Maximum allowed p99.9 latency increase
    pub p999_latency_threshold: f64,
    /// Maximum allowed mean latency increase
    pub mean_latency_threshold: f64,
    /// Maximum allowed recall regression
    pub recall_regression_threshold: f64,
    /// Fraction of a threshold at which a warning is raised
    pub warning_factor: f64,
}

impl Default for RegressionGates {
    fn default() -> Self {
        Self {
            qps_regression_threshold: -0.05,
            p999_latency_threshold: 0.15,
            mean_latency_threshold: 0.10,
            recall_regression_threshold: -0.002,
            warning_factor: 0.5,
        }
    }
}

/// Improvements smaller than this (relative) are reported as a plain pass.
const IMPROVEMENT_MARGIN: f64 = 0.05;
/// Recall gains above this (absolute) are reported as an improvement.
const RECALL_IMPROVEMENT_MARGIN: f64 = 0.01;

impl RegressionGates {
    pub fn for_mode(mode: GateMode) -> Self {
        match mode {
            GateMode::Default => Self::default(),
            GateMode::Pr => Self {
                qps_regression_threshold: -0.03,
                p999_latency_threshold: 0.10,
                mean_latency_threshold: 0.05,
                recall_regression_threshold: -0.001,
                ..Default::default()
            },
            GateMode::Nightly => Self {
                qps_regression_threshold: -0.08,
                p999_latency_threshold: 0.20,
                mean_latency_threshold: 0.12,
                recall_regression_threshold: -0.003,
                ..Default::default()
            },
        }
    }

    /// Classify a regression `delta` against `threshold`.
    ///
    /// `delta` is oriented so that negative means worse; `threshold` is
    /// negative. Reported percentages use the caller's `scale`.
    fn classify(
        &self,
        name: &str,
        delta: f64,
        threshold: f64,
        improvement_margin: f64,
        scale: f64,
    ) -> GateResult {
        if delta >= 0.0 {
            if delta > improvement_margin {
                GateResult::Improvement {
                    metric: name.to_string(),
                    delta_pct: delta * scale,
                }
            } else {
                GateResult::Pass
            }
        } else if delta < threshold {
            GateResult::Fail {
                metric: name.to_string(),
                delta_pct: delta * scale,
                threshold_pct: threshold * scale,
            }
        } else if delta < threshold * self.warning_factor {
            GateResult::Warning {
                metric: name.to_string(),
                delta_pct: delta * scale,
                threshold_pct: threshold * scale,
            }
        } else {
            GateResult::Pass
        }
    }

    /// Evaluate a higher-is-better metric (e.g., QPS).
    pub fn check_higher_is_better(
        &self,
        name: &str,
        baseline: f64,
        current: f64,
        threshold: f64,
    ) -> GateResult {
        if baseline == 0.0 || !baseline.is_finite() || !current.is_finite() {
            return GateResult::Pass;
        }
        let delta = (current - baseline) / baseline;
        self.classify(name, delta, threshold, IMPROVEMENT_MARGIN, 100.0)
    }

    /// Evaluate a lower-is-better metric (e.g., latency). `threshold` is
    /// the allowed relative increase.
    pub fn check_lower_is_better(
        &self,
        name: &str,
        baseline: f64,
        current: f64,
        threshold: f64,
    ) -> GateResult {
        if baseline == 0.0 || !baseline.is_finite() || !current.is_finite() {
            return GateResult::Pass;
        }
        let delta = (baseline - current) / baseline;
        self.classify(name, delta, -threshold, IMPROVEMENT_MARGIN, 100.0)
    }

    /// Evaluate recall (absolute threshold).
    pub fn check_recall(&self, name: &str, baseline: f64, current: f64) -> GateResult {
        self.classify(
            name,
            current - baseline,
            self.recall_regression_threshold,
            RECALL_IMPROVEMENT_MARGIN,
            100.0,
        )
    }
}

/// Recall floor gate. A run without recall counts as recall 0.
pub fn check_recall_floor(best_recall: Option<f64>, floor: f64) -> GateResult {
    let value = best_recall.unwrap_or(0.0);
    if value >= floor {
        GateResult::Pass
    } else {
        GateResult::BelowFloor {
            metric: "best_recall".to_string(),
            value,
            floor,
        }
    }
}

/// Per-configuration metrics used for baseline comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub search_depth: u32,
    pub qps_per_thread: f64,
    pub mean_latency_us: f64,
    pub p999_latency_us: f64,
    #[serde(default)]
    pub recall: Option<f64>,
}

/// Complete gate evaluation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub overall_pass: bool,
    pub results: Vec<GateResult>,
    pub summary: String,
}

impl GateEvaluation {
    /// Evaluate the recall floor and, if a baseline is given, every
    /// configuration that appears in both runs.
    pub fn evaluate(
        gates: &RegressionGates,
        floor: f64,
        best_recall: Option<f64>,
        baseline: Option<&[ConfigSnapshot]>,
        current: &[ConfigSnapshot],
    ) -> Self {
        let mut results = vec![check_recall_floor(best_recall, floor)];

        for cur in current {
            let Some(base) = baseline
                .and_then(|rows| rows.iter().find(|b| b.search_depth == cur.search_depth))
            else {
                continue;
            };
            let l = cur.search_depth;

            results.push(gates.check_higher_is_better(
                &format!("qps_per_thread@L{}", l),
                base.qps_per_thread,
                cur.qps_per_thread,
                gates.qps_regression_threshold,
            ));
            results.push(gates.check_lower_is_better(
                &format!("mean_latency@L{}", l),
                base.mean_latency_us,
                cur.mean_latency_us,
                gates.mean_latency_threshold,
            ));
            results.push(gates.check_lower_is_better(
                &format!("p999_latency@L{}", l),
                base.p999_latency_us,
                cur.p999_latency_us,
                gates.p999_latency_threshold,
            ));
            if let (Some(b), Some(c)) = (base.recall, cur.recall) {
                results.push(gates.check_recall(&format!("recall@L{}", l), b, c));
            }
        }

        let failures = results.iter().filter(|r| r.is_fail()).count();
        let overall_pass = failures == 0;

        let summary = if overall_pass {
            "All gates passed".to_string()
        } else {
            format!("{} gate(s) failed", failures)
        };

        Self {
            overall_pass,
            results,
            summary,
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.overall_pass {
            ExitStatus::Success
        } else {
            ExitStatus::QualityGateFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(l: u32, qps: f64, p999: f64, recall: Option<f64>) -> ConfigSnapshot {
        ConfigSnapshot {
            search_depth: l,
            qps_per_thread: qps,
            mean_latency_us: p999 / 4.0,
            p999_latency_us: p999,
            recall,
        }
    }

    #[test]
    fn test_qps_gate() {
        let gates = RegressionGates::default();

        let result = gates.check_higher_is_better("qps", 1000.0, 1100.0, -0.05);
        assert!(matches!(result, GateResult::Improvement { .. }));

        let result = gates.check_higher_is_better("qps", 1000.0, 980.0, -0.05);
        assert!(result.is_pass());

        let result = gates.check_higher_is_better("qps", 1000.0, 970.0, -0.05);
        assert!(matches!(result, GateResult::Warning { .. }));

        let result = gates.check_higher_is_better("qps", 1000.0, 900.0, -0.05);
        assert!(result.is_fail());
    }

    #[test]
    fn test_latency_gate() {
        let gates = RegressionGates::default();

        let result = gates.check_lower_is_better("p999", 1000.0, 900.0, 0.05);
        assert!(matches!(result, GateResult::Improvement { .. }));

        let result = gates.check_lower_is_better("p999", 1000.0, 1100.0, 0.05);
        assert!(result.is_fail());
    }

    #[test]
    fn test_recall_gate() {
        let gates = RegressionGates::default();
        assert!(gates.check_recall("recall", 0.95, 0.95).is_pass());
        assert!(gates.check_recall("recall", 0.95, 0.944).is_fail());
    }

    #[test]
    fn test_recall_floor() {
        assert!(check_recall_floor(Some(0.97), 0.9).is_pass());
        assert!(check_recall_floor(Some(0.9), 0.9).is_pass());
        assert!(check_recall_floor(Some(1.0), 1.01).is_fail());
        // No ground truth: a zero floor still passes, any positive floor fails
        assert!(check_recall_floor(None, 0.0).is_pass());
        assert!(check_recall_floor(None, 0.5).is_fail());
    }

    #[test]
    fn test_evaluation_matches_rows_by_depth() {
        let gates = RegressionGates::default();
        let baseline = vec![snapshot(10, 1000.0, 800.0, Some(0.9)), snapshot(20, 600.0, 900.0, None)];
        // L=40 has no baseline row and is not compared
        let current = vec![snapshot(20, 400.0, 900.0, None), snapshot(40, 1.0, 1e9, None)];

        let eval = GateEvaluation::evaluate(&gates, 0.0, Some(0.9), Some(&baseline), &current);
        // floor + qps + mean + p999 for L=20
        assert_eq!(eval.results.len(), 4);
        assert!(!eval.overall_pass);
        assert_eq!(eval.exit_status(), ExitStatus::QualityGateFailed);
    }

    #[test]
    fn test_evaluation_without_baseline() {
        let eval = GateEvaluation::evaluate(
            &RegressionGates::default(),
            0.5,
            Some(0.75),
            None,
            &[snapshot(10, 1.0, 1.0, Some(0.75))],
        );
        assert!(eval.overall_pass);
        assert_eq!(eval.results, vec![GateResult::Pass]);
        assert_eq!(eval.exit_status(), ExitStatus::Success);
    }

    #[test]
    fn test_gate_mode_presets() {
        let pr = RegressionGates::for_mode(GateMode::Pr);
        let nightly = RegressionGates::for_mode(GateMode::Nightly);
        assert!(pr.qps_regression_threshold > nightly.qps_regression_threshold);
        assert_eq!("nightly".parse::<GateMode>(), Ok(GateMode::Nightly));
    }
}
