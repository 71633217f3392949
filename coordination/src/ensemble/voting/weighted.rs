//! Weighted voting

use serde::{Deserialize, Serialize};

use super::{normalize_weights, uniform_weights, weighted_combine, VoteResult, VotingMethod, VotingStrategy};
use crate::models::Prediction;

/// How weights are derived when none are supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightStrategy {
    #[default]
    Equal,
    /// Proportional to each prediction's self-reported confidence
    Confidence,
    /// Proportional to supplied model scores; uniform without them
    Performance,
}

/// Weighted average of predictions
#[derive(Debug, Clone, Default)]
pub struct WeightedVoting {
    weights: Option<Vec<f64>>,
    strategy: WeightStrategy,
}

impl WeightedVoting {
    pub fn new(weights: Option<Vec<f64>>, strategy: WeightStrategy) -> Self {
        Self { weights, strategy }
    }

    /// Weight by model performance scores, e.g. training accuracy.
    pub fn by_performance(scores: Vec<f64>) -> Self {
        Self::new(Some(scores), WeightStrategy::Performance)
    }

    pub fn by_confidence() -> Self {
        Self::new(None, WeightStrategy::Confidence)
    }

    pub fn strategy(&self) -> WeightStrategy {
        self.strategy
    }
}

impl VotingStrategy for WeightedVoting {
    fn method(&self) -> VotingMethod {
        VotingMethod::Weighted
    }

    fn combine(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        weighted_combine(predictions, &self.weights(predictions))
    }

    /// Supplied weights win when their length matches the input.
    fn weights(&self, predictions: &[Prediction]) -> Vec<f64> {
        if let Some(weights) = self.weights.as_ref().filter(|w| w.len() == predictions.len()) {
            return normalize_weights(weights);
        }
        match self.strategy {
            WeightStrategy::Equal | WeightStrategy::Performance => uniform_weights(predictions.len()),
            WeightStrategy::Confidence => {
                let confidences: Vec<f64> = predictions.iter().map(Prediction::confidence).collect();
                normalize_weights(&confidences)
            }
        }
    }
}
