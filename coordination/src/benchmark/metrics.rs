//! Ensemble benchmark metrics
//!
//! Timing, consensus, accuracy, resource and quality measures for one
//! ensemble run, plus the [`BenchmarkResult`] that carries them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::agent::PerformanceSnapshot;
use crate::ensemble::consensus::{model_diversity, prediction_variance};
use crate::ensemble::voting::{agreement_fraction, VotingMethod};
use crate::models::{
    classification_scores, dataset::labels_of, predicted_labels, regression_scores, roc_auc_ovr,
    Prediction,
};

use super::targets::TargetResult;

/// Seconds spent in each benchmark phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    /// Agent spawn plus training
    pub init_time: f64,
    /// Training alone, a subset of `init_time`
    pub training_time: f64,
    pub prediction_time: f64,
    pub consensus_time: f64,
    pub total_time: f64,
}

/// Aggregate metrics for one ensemble run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMetrics {
    // timing (seconds)
    pub init_time: f64,
    pub training_time: f64,
    pub prediction_time: f64,
    pub consensus_time: f64,
    pub total_time: f64,

    // ensemble
    pub ensemble_size: usize,
    pub successful_predictions: usize,
    pub consensus_strength: f64,
    pub model_diversity: f64,
    pub prediction_variance: f64,

    // performance against ground truth
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc: f64,
    pub mean_absolute_error: f64,
    pub mean_squared_error: f64,

    // resources
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
    pub cpu_utilization: f64,
    pub gpu_utilization: f64,

    // quality
    pub prediction_confidence: f64,
    pub ensemble_agreement: f64,
    pub error_rate: f64,
}

impl EnsembleMetrics {
    /// Metrics grouped into timing, ensemble, performance, resources and
    /// quality sections.
    pub fn to_sections(&self) -> serde_json::Value {
        serde_json::json!({
            "timing": {
                "init_time": self.init_time,
                "training_time": self.training_time,
                "prediction_time": self.prediction_time,
                "consensus_time": self.consensus_time,
                "total_time": self.total_time,
            },
            "ensemble": {
                "ensemble_size": self.ensemble_size,
                "successful_predictions": self.successful_predictions,
                "consensus_strength": self.consensus_strength,
                "model_diversity": self.model_diversity,
                "prediction_variance": self.prediction_variance,
            },
            "performance": {
                "accuracy": self.accuracy,
                "precision": self.precision,
                "recall": self.recall,
                "f1_score": self.f1_score,
                "auc": self.auc,
                "mean_absolute_error": self.mean_absolute_error,
                "mean_squared_error": self.mean_squared_error,
            },
            "resources": {
                "memory_usage_mb": self.memory_usage_mb,
                "peak_memory_mb": self.peak_memory_mb,
                "cpu_utilization": self.cpu_utilization,
                "gpu_utilization": self.gpu_utilization,
            },
            "quality": {
                "prediction_confidence": self.prediction_confidence,
                "ensemble_agreement": self.ensemble_agreement,
                "error_rate": self.error_rate,
            },
        })
    }

    /// Look up a metric by field name.
    pub fn metric_value(&self, name: &str) -> Option<f64> {
        let value = match name {
            "init_time" => self.init_time,
            "training_time" => self.training_time,
            "prediction_time" => self.prediction_time,
            "consensus_time" => self.consensus_time,
            "total_time" => self.total_time,
            "ensemble_size" => self.ensemble_size as f64,
            "successful_predictions" => self.successful_predictions as f64,
            "consensus_strength" => self.consensus_strength,
            "model_diversity" => self.model_diversity,
            "prediction_variance" => self.prediction_variance,
            "accuracy" => self.accuracy,
            "precision" => self.precision,
            "recall" => self.recall,
            "f1_score" => self.f1_score,
            "auc" => self.auc,
            "mean_absolute_error" => self.mean_absolute_error,
            "mean_squared_error" => self.mean_squared_error,
            "memory_usage_mb" => self.memory_usage_mb,
            "peak_memory_mb" => self.peak_memory_mb,
            "cpu_utilization" => self.cpu_utilization,
            "gpu_utilization" => self.gpu_utilization,
            "prediction_confidence" => self.prediction_confidence,
            "ensemble_agreement" => self.ensemble_agreement,
            "error_rate" => self.error_rate,
            _ => return None,
        };
        Some(value)
    }

    /// Get metrics as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// How the ensemble reached its final output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusDetails {
    pub strategy: VotingMethod,
    pub consensus_strength: f64,
    /// Pairwise agreement between participating models, 1.0 on the diagonal
    pub agreement_matrix: Vec<Vec<f64>>,
    /// Mean per-row class match between the output and each model
    pub class_agreement: f64,
    /// Self-reported confidence per participating model
    pub confidence_scores: Vec<f64>,
    pub weights: Vec<f64>,
    pub participating_models: Vec<String>,
    /// Consensus fell below the configured threshold
    pub below_threshold: bool,
    pub fallback_reason: Option<String>,
}

/// Resource usage summarised over a tracking session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Mean process memory
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
    /// Mean CPU usage, percent
    pub cpu_utilization: f64,
    /// Mean GPU usage, percent; 0 when unavailable
    pub gpu_utilization: f64,
    pub samples: usize,
}

/// Outcome of one ensemble benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub task_name: String,
    pub ensemble_size: usize,
    pub metrics: EnsembleMetrics,
    pub final_output: Option<Prediction>,
    /// Seconds
    pub execution_time: f64,
    pub model_performances: BTreeMap<String, PerformanceSnapshot>,
    pub consensus_details: Option<ConsensusDetails>,
    pub resource_usage: ResourceUsage,
    pub target_results: Vec<TargetResult>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkResult {
    /// A failed run: empty ensemble, default metrics.
    pub fn failed(task_name: impl Into<String>, execution_time: f64, error: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ensemble_size: 0,
            metrics: EnsembleMetrics {
                total_time: execution_time,
                ..Default::default()
            },
            final_output: None,
            execution_time,
            model_performances: BTreeMap::new(),
            consensus_details: None,
            resource_usage: ResourceUsage::default(),
            target_results: Vec::new(),
            success: false,
            error_message: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Unmet targets
    pub fn missed_targets(&self) -> impl Iterator<Item = &TargetResult> {
        self.target_results.iter().filter(|t| !t.met)
    }
}

/// Compute run metrics from the successful predictions and the final output.
///
/// Resource fields are left at zero for the tracker to fill in.
pub fn assemble_metrics(
    predictions: &[Prediction],
    final_prediction: &Prediction,
    timing: &PhaseTiming,
    ground_truth: Option<&[f64]>,
    ensemble_size: usize,
) -> EnsembleMetrics {
    let successful = predictions.len();
    let confidence = if successful == 0 {
        0.0
    } else {
        predictions.iter().map(Prediction::confidence).sum::<f64>() / successful as f64
    };
    let diversity = model_diversity(predictions);
    let agreement = if successful < 2 { 1.0 } else { 1.0 - diversity };

    let mut metrics = EnsembleMetrics {
        init_time: timing.init_time,
        training_time: timing.training_time,
        prediction_time: timing.prediction_time,
        consensus_time: timing.consensus_time,
        total_time: timing.total_time,
        ensemble_size,
        successful_predictions: successful,
        consensus_strength: agreement_fraction(final_prediction, predictions),
        model_diversity: diversity,
        prediction_variance: prediction_variance(predictions),
        prediction_confidence: confidence,
        ensemble_agreement: agreement,
        error_rate: if ensemble_size == 0 {
            0.0
        } else {
            ensemble_size.saturating_sub(successful) as f64 / ensemble_size as f64
        },
        ..Default::default()
    };

    if let Some(truth) = ground_truth {
        score_against_truth(&mut metrics, final_prediction, truth);
    }
    metrics
}

fn score_against_truth(metrics: &mut EnsembleMetrics, prediction: &Prediction, truth: &[f64]) {
    if let Some(tensor) = prediction.as_tensor().filter(|t| t.ndim() >= 2) {
        let labels = labels_of(truth);
        let predicted = tensor.argmax_rows();
        if predicted.len() != labels.len() {
            return;
        }
        let scores = classification_scores(&labels, &predicted);
        metrics.accuracy = scores.accuracy;
        metrics.precision = scores.precision;
        metrics.recall = scores.recall;
        metrics.f1_score = scores.f1;
        if tensor.is_probability_rows() {
            metrics.auc = roc_auc_ovr(&labels, tensor).unwrap_or(0.0);
        }
        return;
    }

    let Some(values) = prediction.flatten().filter(|v| v.len() == truth.len()) else {
        return;
    };
    let errors = regression_scores(truth, &values);
    metrics.mean_absolute_error = errors.mean_absolute_error;
    metrics.mean_squared_error = errors.mean_squared_error;

    // Integer targets are class labels; score the rounded predictions too.
    if truth.iter().all(|t| *t >= 0.0 && t.fract() == 0.0) {
        if let Some(predicted) = predicted_labels(prediction) {
            let scores = classification_scores(&labels_of(truth), &predicted);
            metrics.accuracy = scores.accuracy;
            metrics.precision = scores.precision;
            metrics.recall = scores.recall;
            metrics.f1_score = scores.f1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tensor;

    #[test]
    fn test_sections_have_exact_groups() {
        let sections = EnsembleMetrics::default().to_sections();
        let keys: Vec<&String> = sections.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 5);
        for group in ["timing", "ensemble", "performance", "resources", "quality"] {
            assert!(sections.get(group).is_some(), "missing {}", group);
        }
        assert!(sections["quality"].get("error_rate").is_some());
    }

    #[test]
    fn test_every_section_field_is_addressable() {
        let metrics = EnsembleMetrics::default();
        let sections = metrics.to_sections();
        for group in sections.as_object().unwrap().values() {
            for name in group.as_object().unwrap().keys() {
                assert!(metrics.metric_value(name).is_some(), "{}", name);
            }
        }
    }

    #[test]
    fn test_assemble_classification_metrics() {
        let a = Tensor::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4]]).unwrap();
        let b = Tensor::from_rows(&[vec![0.8, 0.2], vec![0.3, 0.7], vec![0.3, 0.7]]).unwrap();
        let preds = vec![Prediction::tensor(a.clone()), Prediction::tensor(b)];
        let timing = PhaseTiming {
            total_time: 1.5,
            ..Default::default()
        };

        let metrics = assemble_metrics(&preds, &Prediction::tensor(a), &timing, Some(&[0.0, 1.0, 0.0]), 3);
        assert_eq!(metrics.ensemble_size, 3);
        assert_eq!(metrics.successful_predictions, 2);
        assert!((metrics.error_rate - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.auc, 1.0);
        assert_eq!(metrics.model_diversity, 1.0);
        // the final output equals `a` and disagrees with `b`
        assert_eq!(metrics.consensus_strength, 0.5);
        assert_eq!(metrics.total_time, 1.5);
    }

    #[test]
    fn test_assemble_regression_metrics() {
        let preds = vec![Prediction::tensor(Tensor::vector(vec![1.0, 2.0]))];
        let metrics = assemble_metrics(
            &preds,
            &preds[0],
            &PhaseTiming::default(),
            Some(&[1.0, 3.0]),
            1,
        );
        assert_eq!(metrics.mean_absolute_error, 0.5);
        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.consensus_strength, 1.0);
        assert_eq!(metrics.ensemble_agreement, 1.0);
    }

    #[test]
    fn test_failed_result_defaults() {
        let result = BenchmarkResult::failed("iris", 0.25, "All models failed to initialize");
        assert!(!result.success);
        assert_eq!(result.ensemble_size, 0);
        assert_eq!(result.metrics.accuracy, 0.0);
        assert!(result.final_output.is_none());
    }
}
