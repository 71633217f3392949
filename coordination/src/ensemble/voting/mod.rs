//! Voting strategies for combining model predictions
//!
//! Every strategy is a pure function over a non-empty slice of predictions.
//! A single prediction is returned unchanged; when a strategy cannot combine
//! its inputs it falls back (to the first prediction, or to weighted voting
//! for stacking) and reports why in [`VotingResult::fallback_reason`].

pub mod bayesian;
pub mod majority;
pub mod stacking;
pub mod weighted;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{ModelError, Prediction, ShapeError};

pub use bayesian::BayesianAveraging;
pub use majority::MajorityVoting;
pub use stacking::StackingEnsemble;
pub use weighted::{WeightStrategy, WeightedVoting};

/// Error type for voting operations
#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("No predictions to vote on")]
    EmptyInput,

    #[error("Predictions cannot be combined: {0}")]
    Incompatible(String),

    #[error("Meta-model has not been trained")]
    MetaModelNotTrained,

    #[error("Meta-model expects {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Meta-model fit failed: {0}")]
    MetaModel(#[from] ModelError),
}

/// Result type for voting operations
pub type VoteResult<T> = Result<T, VotingError>;

/// Named voting strategies selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VotingMethod {
    Majority,
    Weighted,
    Stacking,
    Bayesian,
}

impl VotingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Majority => "majority",
            Self::Weighted => "weighted",
            Self::Stacking => "stacking",
            Self::Bayesian => "bayesian",
        }
    }

    /// Parse without logging; `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "majority" => Some(Self::Majority),
            "weighted" => Some(Self::Weighted),
            "stacking" => Some(Self::Stacking),
            "bayesian" => Some(Self::Bayesian),
            _ => None,
        }
    }
}

impl From<&str> for VotingMethod {
    fn from(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            warn!(strategy = name, "Unknown voting strategy, using majority");
            Self::Majority
        })
    }
}

impl From<String> for VotingMethod {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<VotingMethod> for String {
    fn from(method: VotingMethod) -> Self {
        method.as_str().to_string()
    }
}

impl std::fmt::Display for VotingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a vote with diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingResult {
    pub prediction: Prediction,
    /// Fraction of inputs agreeing with the output
    pub confidence: f64,
    /// Normalized weight per input
    pub weights: Vec<f64>,
    pub individual_votes: Vec<Prediction>,
    pub consensus_strength: f64,
    /// Set when the strategy could not combine and used its fallback
    pub fallback_reason: Option<String>,
}

/// A rule for turning several predictions into one
pub trait VotingStrategy: Send + Sync {
    fn method(&self) -> VotingMethod;

    /// Combine at least two predictions. Errors trigger [`fallback`](Self::fallback).
    fn combine(&self, predictions: &[Prediction]) -> VoteResult<Prediction>;

    /// Normalized weight per input.
    fn weights(&self, predictions: &[Prediction]) -> Vec<f64> {
        uniform_weights(predictions.len())
    }

    /// Output used when `combine` fails: the first prediction.
    fn fallback(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        predictions.first().cloned().ok_or(VotingError::EmptyInput)
    }

    /// Combine with the single-input and fallback rules applied.
    fn resolve(&self, predictions: &[Prediction]) -> VoteResult<(Prediction, Option<String>)> {
        match predictions {
            [] => Err(VotingError::EmptyInput),
            [only] => Ok((only.clone(), None)),
            _ => match self.combine(predictions) {
                Ok(prediction) => Ok((prediction, None)),
                Err(e) => {
                    warn!(strategy = %self.method(), error = %e, "Voting failed, using fallback");
                    let prediction = self.fallback(predictions)?;
                    Ok((prediction, Some(e.to_string())))
                }
            },
        }
    }

    fn vote(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        self.resolve(predictions).map(|(prediction, _)| prediction)
    }

    fn vote_with_details(&self, predictions: &[Prediction]) -> VoteResult<VotingResult> {
        let (prediction, fallback_reason) = self.resolve(predictions)?;
        let confidence = agreement_fraction(&prediction, predictions);
        Ok(VotingResult {
            confidence,
            weights: self.weights(predictions),
            individual_votes: predictions.to_vec(),
            consensus_strength: confidence,
            fallback_reason,
            prediction,
        })
    }
}

/// Strategy with default parameters for `method`
pub fn build_strategy(method: VotingMethod) -> Box<dyn VotingStrategy> {
    match method {
        VotingMethod::Majority => Box::new(MajorityVoting),
        VotingMethod::Weighted => Box::new(WeightedVoting::default()),
        VotingMethod::Stacking => Box::new(StackingEnsemble::default()),
        VotingMethod::Bayesian => Box::new(BayesianAveraging::default()),
    }
}

pub fn uniform_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n.max(1) as f64; n]
}

/// Scale weights to sum to 1. Negative and non-finite entries count as zero;
/// an all-zero vector becomes uniform.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let cleaned: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let total: f64 = cleaned.iter().sum();
    if total <= 0.0 {
        return uniform_weights(weights.len());
    }
    cleaned.into_iter().map(|w| w / total).collect()
}

/// Fraction of `inputs` that agree with `output`, in `[0, 1]`.
pub fn agreement_fraction(output: &Prediction, inputs: &[Prediction]) -> f64 {
    if inputs.is_empty() {
        return 0.0;
    }
    inputs.iter().filter(|p| output.agrees_with(p)).count() as f64 / inputs.len() as f64
}

/// Mean per-row class agreement of `inputs` with `output`.
pub fn class_agreement(output: &Prediction, inputs: &[Prediction]) -> f64 {
    if inputs.is_empty() {
        return 0.0;
    }
    inputs.iter().map(|p| output.class_agreement(p)).sum::<f64>() / inputs.len() as f64
}

/// Weighted combination shared by weighted and Bayesian voting.
///
/// Numbers sum, equal-shape tensors sum elementwise, and anything else yields
/// the highest-weight prediction (the first on ties).
pub(crate) fn weighted_combine(predictions: &[Prediction], weights: &[f64]) -> VoteResult<Prediction> {
    if predictions.is_empty() {
        return Err(VotingError::EmptyInput);
    }
    if weights.len() != predictions.len() {
        return Err(VotingError::Incompatible(format!(
            "{} weights for {} predictions",
            weights.len(),
            predictions.len()
        )));
    }

    if let Some(values) = predictions.iter().map(Prediction::as_scalar).collect::<Option<Vec<_>>>() {
        let sum = values.iter().zip(weights).map(|(v, w)| v * w).sum();
        return Ok(Prediction::scalar(sum));
    }

    if let Some(tensors) = predictions.iter().map(Prediction::as_tensor).collect::<Option<Vec<_>>>() {
        let shape = tensors[0].shape();
        if tensors.iter().all(|t| t.shape() == shape) {
            let mut combined = vec![0.0; tensors[0].len()];
            for (tensor, w) in tensors.iter().zip(weights) {
                for (acc, v) in combined.iter_mut().zip(tensor.data()) {
                    *acc += w * v;
                }
            }
            return Ok(Prediction::tensor(crate::models::Tensor::new(shape.to_vec(), combined)?));
        }
    }

    let mut best = 0;
    for (i, w) in weights.iter().enumerate() {
        if *w > weights[best] {
            best = i;
        }
    }
    Ok(predictions[best].clone())
}
