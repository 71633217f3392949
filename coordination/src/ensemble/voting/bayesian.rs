//! Bayesian model averaging
//!
//! Posterior weight ∝ prior × exp(−uncertainty_weight × uncertainty), where
//! uncertainty is read off each prediction: a distribution's spread, the
//! entropy of class probabilities, or the spread of a plain tensor.

use super::{normalize_weights, uniform_weights, weighted_combine, VoteResult, VotingMethod, VotingStrategy};
use crate::models::Prediction;

/// Uncertainty assumed for predictions that carry no spread information
pub const DEFAULT_UNCERTAINTY: f64 = 0.5;

/// Posterior-weighted averaging
#[derive(Debug, Clone)]
pub struct BayesianAveraging {
    prior_weights: Option<Vec<f64>>,
    uncertainty_weight: f64,
}

impl BayesianAveraging {
    pub fn new(prior_weights: Option<Vec<f64>>, uncertainty_weight: f64) -> Self {
        Self {
            prior_weights,
            uncertainty_weight,
        }
    }

    /// Priors whose length does not match the input are ignored.
    fn priors(&self, n: usize) -> Vec<f64> {
        match &self.prior_weights {
            Some(priors) if priors.len() == n => normalize_weights(priors),
            _ => uniform_weights(n),
        }
    }
}

impl Default for BayesianAveraging {
    fn default() -> Self {
        Self::new(None, 1.0)
    }
}

impl VotingStrategy for BayesianAveraging {
    fn method(&self) -> VotingMethod {
        VotingMethod::Bayesian
    }

    fn combine(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        weighted_combine(predictions, &self.weights(predictions))
    }

    fn weights(&self, predictions: &[Prediction]) -> Vec<f64> {
        let unnormalized: Vec<f64> = self
            .priors(predictions.len())
            .into_iter()
            .zip(predictions)
            .map(|(prior, p)| prior * (-self.uncertainty_weight * uncertainty(p)).exp())
            .collect();
        normalize_weights(&unnormalized)
    }
}

/// Uncertainty of one prediction; lower is more certain.
pub fn uncertainty(prediction: &Prediction) -> f64 {
    match prediction {
        Prediction::Distribution { std, .. } => std.abs(),
        Prediction::Tensor { tensor } if tensor.is_probability_rows() => {
            let entropies: Vec<f64> = tensor
                .rows()
                .map(|row| {
                    row.iter()
                        .filter(|p| **p > 0.0)
                        .map(|p| -p * p.ln())
                        .sum::<f64>()
                })
                .collect();
            entropies.iter().sum::<f64>() / entropies.len().max(1) as f64
        }
        Prediction::Tensor { tensor } => tensor.std(),
        _ => DEFAULT_UNCERTAINTY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tensor;

    #[test]
    fn test_confident_distribution_dominates() {
        let preds = vec![
            Prediction::distribution(10.0, 0.1),
            Prediction::distribution(20.0, 3.0),
        ];
        let voting = BayesianAveraging::default();
        let weights = voting.weights(&preds);
        assert!(weights[0] > 0.9);
        let out = voting.vote(&preds).unwrap().as_scalar().unwrap();
        assert!(out < 11.0);
    }

    #[test]
    fn test_equal_uncertainty_reduces_to_priors() {
        let preds = vec![Prediction::scalar(0.0), Prediction::scalar(4.0)];
        let voting = BayesianAveraging::new(Some(vec![3.0, 1.0]), 1.0);
        let weights = voting.weights(&preds);
        assert!((weights[0] - 0.75).abs() < 1e-12);
        assert!((weights[1] - 0.25).abs() < 1e-12);
        let out = voting.vote(&preds).unwrap().as_scalar().unwrap();
        assert!((out - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_priors_are_ignored() {
        let preds = vec![Prediction::scalar(0.0), Prediction::scalar(4.0)];
        let voting = BayesianAveraging::new(Some(vec![1.0, 2.0, 3.0]), 1.0);
        assert_eq!(voting.weights(&preds), vec![0.5, 0.5]);
    }

    #[test]
    fn test_entropy_uncertainty() {
        let certain = Prediction::tensor(Tensor::from_rows(&[vec![1.0, 0.0]]).unwrap());
        let unsure = Prediction::tensor(Tensor::from_rows(&[vec![0.5, 0.5]]).unwrap());
        assert_eq!(uncertainty(&certain), 0.0);
        assert!((uncertainty(&unsure) - std::f64::consts::LN_2).abs() < 1e-12);
        assert_eq!(uncertainty(&Prediction::label("x")), DEFAULT_UNCERTAINTY);
    }
}
