//! Stacking ensemble
//!
//! A ridge meta-regressor learns to map the concatenated outputs of the base
//! models onto the target. Until it is trained, or when the inputs do not
//! match what it was trained on, voting falls back to [`WeightedVoting`].

use tracing::{info, warn};

use super::{VoteResult, VotingError, VotingMethod, VotingStrategy, WeightedVoting};
use crate::models::linalg::{ridge_apply, ridge_fit};
use crate::models::{ModelKind, Prediction, Tensor};

const DEFAULT_META_ALPHA: f64 = 1e-3;

/// Fitted meta-regressor
#[derive(Debug, Clone)]
struct MetaModel {
    coefficients: Vec<Vec<f64>>,
    input_width: usize,
    output_shape: Vec<usize>,
}

/// Meta-learned combination of base predictions
#[derive(Debug, Clone)]
pub struct StackingEnsemble {
    meta_model_type: ModelKind,
    alpha: f64,
    meta: Option<MetaModel>,
}

impl StackingEnsemble {
    /// Only linear meta-models are fitted; other kinds are logged and treated
    /// as ridge regression.
    pub fn new(meta_model_type: ModelKind) -> Self {
        if !matches!(
            meta_model_type,
            ModelKind::LinearRegression | ModelKind::LogisticRegression
        ) {
            warn!(%meta_model_type, "Unsupported meta-model type, using ridge regression");
        }
        Self {
            meta_model_type,
            alpha: DEFAULT_META_ALPHA,
            meta: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn meta_model_type(&self) -> ModelKind {
        self.meta_model_type
    }

    pub fn is_trained(&self) -> bool {
        self.meta.is_some()
    }

    /// Fit the meta-model. `prediction_sets[i]` holds every base model's output
    /// for sample `i`, in a fixed model order; `targets[i]` is its truth.
    pub fn train_meta_model(
        &mut self,
        prediction_sets: &[Vec<Prediction>],
        targets: &[Prediction],
    ) -> VoteResult<()> {
        if prediction_sets.is_empty() {
            return Err(VotingError::EmptyInput);
        }
        if prediction_sets.len() != targets.len() {
            return Err(VotingError::Incompatible(format!(
                "{} prediction sets for {} targets",
                prediction_sets.len(),
                targets.len()
            )));
        }

        let features = prediction_sets
            .iter()
            .map(|set| stack_features(set))
            .collect::<VoteResult<Vec<_>>>()?;
        let input_width = features[0].len();
        if let Some(row) = features.iter().find(|row| row.len() != input_width) {
            return Err(VotingError::FeatureMismatch {
                expected: input_width,
                actual: row.len(),
            });
        }

        let outputs = targets
            .iter()
            .map(|t| {
                t.flatten()
                    .ok_or_else(|| VotingError::Incompatible(format!("non-numeric target {}", t)))
            })
            .collect::<VoteResult<Vec<_>>>()?;
        let output_shape = match &targets[0] {
            Prediction::Tensor { tensor } => tensor.shape().to_vec(),
            _ => Vec::new(),
        };

        let coefficients = ridge_fit(&features, &outputs, self.alpha)?;
        info!(
            samples = features.len(),
            input_width,
            outputs = outputs[0].len(),
            "Stacking meta-model trained"
        );
        self.meta = Some(MetaModel {
            coefficients,
            input_width,
            output_shape,
        });
        Ok(())
    }
}

impl Default for StackingEnsemble {
    fn default() -> Self {
        Self::new(ModelKind::LinearRegression)
    }
}

impl VotingStrategy for StackingEnsemble {
    fn method(&self) -> VotingMethod {
        VotingMethod::Stacking
    }

    fn combine(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        let meta = self.meta.as_ref().ok_or(VotingError::MetaModelNotTrained)?;
        let features = stack_features(predictions)?;
        if features.len() != meta.input_width {
            return Err(VotingError::FeatureMismatch {
                expected: meta.input_width,
                actual: features.len(),
            });
        }

        let output = ridge_apply(&meta.coefficients, &features);
        if meta.output_shape.is_empty() || output.len() == 1 {
            return Ok(Prediction::scalar(output.first().copied().unwrap_or(0.0)));
        }
        Ok(Prediction::tensor(Tensor::new(meta.output_shape.clone(), output)?))
    }

    fn fallback(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        WeightedVoting::default().vote(predictions)
    }
}

fn stack_features(predictions: &[Prediction]) -> VoteResult<Vec<f64>> {
    let mut features = Vec::new();
    for prediction in predictions {
        let values = prediction
            .flatten()
            .ok_or_else(|| VotingError::Incompatible(format!("non-numeric prediction {}", prediction)))?;
        features.extend(values);
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_falls_back_to_weighted() {
        let stacking = StackingEnsemble::default();
        let result = stacking
            .vote_with_details(&[Prediction::scalar(1.0), Prediction::scalar(3.0)])
            .unwrap();
        assert_eq!(result.prediction, Prediction::scalar(2.0));
        assert!(result
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("not been trained"));
    }

    #[test]
    fn test_trained_meta_model_learns_combination() {
        // target = 0.25 * a + 0.75 * b
        let mut sets = Vec::new();
        let mut targets = Vec::new();
        for i in 0..20 {
            let a = i as f64;
            let b = (i * i % 7) as f64;
            sets.push(vec![Prediction::scalar(a), Prediction::scalar(b)]);
            targets.push(Prediction::scalar(0.25 * a + 0.75 * b));
        }
        let mut stacking = StackingEnsemble::default().with_alpha(1e-9);
        stacking.train_meta_model(&sets, &targets).unwrap();
        assert!(stacking.is_trained());

        let out = stacking
            .vote(&[Prediction::scalar(4.0), Prediction::scalar(8.0)])
            .unwrap();
        assert!((out.as_scalar().unwrap() - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_width_mismatch_falls_back() {
        let sets = vec![
            vec![Prediction::scalar(1.0), Prediction::scalar(2.0)],
            vec![Prediction::scalar(2.0), Prediction::scalar(1.0)],
            vec![Prediction::scalar(0.0), Prediction::scalar(5.0)],
        ];
        let targets = vec![
            Prediction::scalar(1.5),
            Prediction::scalar(1.5),
            Prediction::scalar(2.5),
        ];
        let mut stacking = StackingEnsemble::default();
        stacking.train_meta_model(&sets, &targets).unwrap();

        let three = vec![Prediction::scalar(1.0); 3];
        let result = stacking.vote_with_details(&three).unwrap();
        assert_eq!(result.prediction, Prediction::scalar(1.0));
        assert!(result.fallback_reason.is_some());
    }

    #[test]
    fn test_train_rejects_mismatched_lengths() {
        let mut stacking = StackingEnsemble::default();
        let err = stacking
            .train_meta_model(&[vec![Prediction::scalar(1.0)]], &[])
            .unwrap_err();
        assert!(matches!(err, VotingError::Incompatible(_)));
        assert!(!stacking.is_trained());
    }
}
