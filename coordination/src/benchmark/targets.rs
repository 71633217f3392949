//! Performance targets
//!
//! A benchmark config may name thresholds for any [`EnsembleMetrics`] field.
//! Each target is checked in the direction its metric implies:
//!
//! | Metric name contains | Direction |
//! |---|---|
//! | `time`, `error`, `variance`, `memory` | Lower is better |
//! | anything else | Higher is better |
//!
//! Unmet targets are reported, never fatal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::EnsembleMetrics;

/// Direction of a metric (whether higher or lower is better).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    /// Higher values are better (e.g., accuracy).
    HigherIsBetter,
    /// Lower values are better (e.g., latency, error rate).
    LowerIsBetter,
}

impl MetricDirection {
    /// Infer the direction from a metric name.
    pub fn for_metric(name: &str) -> Self {
        const LOWER: [&str; 4] = ["time", "error", "variance", "memory"];
        if LOWER.iter().any(|needle| name.contains(needle)) {
            Self::LowerIsBetter
        } else {
            Self::HigherIsBetter
        }
    }

    pub fn is_met(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::HigherIsBetter => observed >= threshold,
            Self::LowerIsBetter => observed <= threshold,
        }
    }
}

/// Outcome of checking one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub metric: String,
    pub threshold: f64,
    /// `None` when the metric name is unknown
    pub observed: Option<f64>,
    pub direction: MetricDirection,
    pub met: bool,
}

/// Check every target against `metrics`, in name order.
pub fn evaluate_targets(metrics: &EnsembleMetrics, targets: &BTreeMap<String, f64>) -> Vec<TargetResult> {
    targets
        .iter()
        .map(|(metric, threshold)| {
            let direction = MetricDirection::for_metric(metric);
            let observed = metrics.metric_value(metric);
            TargetResult {
                metric: metric.clone(),
                threshold: *threshold,
                observed,
                direction,
                met: observed.is_some_and(|v| direction.is_met(v, *threshold)),
            }
        })
        .collect()
}

/// One line per target, e.g. `[PASS] accuracy: 0.91 (>= 0.85)`.
pub fn summarize_targets(results: &[TargetResult]) -> String {
    results
        .iter()
        .map(|r| {
            let status = if r.met { "[PASS]" } else { "[MISS]" };
            let op = match r.direction {
                MetricDirection::HigherIsBetter => ">=",
                MetricDirection::LowerIsBetter => "<=",
            };
            match r.observed {
                Some(v) => format!("{} {}: {:.4} ({} {})", status, r.metric, v, op, r.threshold),
                None => format!("{} {}: unknown metric", status, r.metric),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_inference() {
        assert_eq!(MetricDirection::for_metric("accuracy"), MetricDirection::HigherIsBetter);
        assert_eq!(MetricDirection::for_metric("total_time"), MetricDirection::LowerIsBetter);
        assert_eq!(MetricDirection::for_metric("error_rate"), MetricDirection::LowerIsBetter);
        assert_eq!(
            MetricDirection::for_metric("prediction_variance"),
            MetricDirection::LowerIsBetter
        );
    }

    #[test]
    fn test_evaluate_targets() {
        let metrics = EnsembleMetrics {
            accuracy: 0.9,
            total_time: 2.0,
            ..Default::default()
        };
        let targets = BTreeMap::from([
            ("accuracy".to_string(), 0.85),
            ("total_time".to_string(), 1.0),
            ("bogus".to_string(), 1.0),
        ]);

        let results = evaluate_targets(&metrics, &targets);
        assert_eq!(results.len(), 3);
        let by_name: BTreeMap<_, _> = results.iter().map(|r| (r.metric.as_str(), r)).collect();
        assert!(by_name["accuracy"].met);
        assert!(!by_name["total_time"].met);
        assert!(!by_name["bogus"].met);
        assert!(by_name["bogus"].observed.is_none());

        let summary = summarize_targets(&results);
        assert!(summary.contains("[PASS] accuracy"));
        assert!(summary.contains("[MISS] bogus: unknown metric"));
    }
}
