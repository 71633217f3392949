//! Linear estimators: multinomial logistic regression and ridge regression.

use super::dataset::{class_count, labels_of};
use super::linalg::{ridge_apply, ridge_fit};
use super::{
    check_fit_input, check_width, softmax_in_place, Model, ModelError, ModelResult, Prediction,
    Tensor,
};

/// Multinomial logistic regression trained with full-batch gradient descent.
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    learning_rate: f64,
    epochs: usize,
    l2: f64,
    /// `n_classes × (n_features + 1)`, bias last.
    weights: Option<Vec<Vec<f64>>>,
}

impl SoftmaxRegression {
    pub fn new(learning_rate: f64, epochs: usize, l2: f64) -> Self {
        Self {
            learning_rate,
            epochs: epochs.max(1),
            l2: l2.max(0.0),
            weights: None,
        }
    }

    fn probabilities(weights: &[Vec<f64>], row: &[f64]) -> Vec<f64> {
        let p = row.len();
        let mut logits: Vec<f64> = weights
            .iter()
            .map(|w| row.iter().zip(w).map(|(x, w)| x * w).sum::<f64>() + w[p])
            .collect();
        softmax_in_place(&mut logits);
        logits
    }
}

impl Model for SoftmaxRegression {
    fn name(&self) -> &'static str {
        "softmax_regression"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()> {
        let p = check_fit_input(x, y)?;
        check_width(x, p)?;
        let n_classes = class_count(y).max(2);
        let labels = labels_of(y);
        let n = x.len() as f64;
        let mut weights = vec![vec![0.0; p + 1]; n_classes];

        for _ in 0..self.epochs {
            let mut grad = vec![vec![0.0; p + 1]; n_classes];
            for (row, &label) in x.iter().zip(&labels) {
                let probs = Self::probabilities(&weights, row);
                for (c, prob) in probs.iter().enumerate() {
                    let err = prob - if c == label { 1.0 } else { 0.0 };
                    for (j, v) in row.iter().enumerate() {
                        grad[c][j] += err * v;
                    }
                    grad[c][p] += err;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad) {
                for j in 0..=p {
                    let penalty = if j < p { self.l2 * w[j] } else { 0.0 };
                    w[j] -= self.learning_rate * (g[j] / n + penalty);
                }
            }
        }

        self.weights = Some(weights);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        let weights = self.weights.as_ref().ok_or(ModelError::NotFitted)?;
        let p = weights[0].len() - 1;
        check_width(x, p)?;
        let rows: Vec<Vec<f64>> = x.iter().map(|row| Self::probabilities(weights, row)).collect();
        Ok(Prediction::tensor(Tensor::from_rows(&rows)?))
    }
}

/// Ordinary least squares with optional ridge penalty.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    alpha: f64,
    coefficients: Option<Vec<Vec<f64>>>,
}

impl LinearRegressor {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coefficients: None,
        }
    }
}

impl Model for LinearRegressor {
    fn name(&self) -> &'static str {
        "linear_regressor"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()> {
        check_fit_input(x, y)?;
        let targets: Vec<Vec<f64>> = y.iter().map(|v| vec![*v]).collect();
        self.coefficients = Some(ridge_fit(x, &targets, self.alpha)?);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        let coefficients = self.coefficients.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(x, coefficients.len() - 1)?;
        let values = x.iter().map(|row| ridge_apply(coefficients, row)[0]).collect();
        Ok(Prediction::tensor(Tensor::vector(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dataset;

    #[test]
    fn test_softmax_regression_separates_blobs() {
        let data = Dataset::make_classification(120, 5, 2, 3).unwrap();
        let mut model = SoftmaxRegression::new(0.1, 300, 0.0);
        model.fit(data.features(), data.targets()).unwrap();
        let pred = model.predict(data.features()).unwrap();
        let predicted = pred.as_tensor().unwrap().argmax_rows();
        let correct = predicted
            .iter()
            .zip(data.labels())
            .filter(|(p, t)| **p == *t)
            .count();
        assert!(correct as f64 / 120.0 > 0.8);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = SoftmaxRegression::new(0.1, 10, 0.0);
        assert!(matches!(model.predict(&[vec![1.0]]), Err(ModelError::NotFitted)));
    }

    #[test]
    fn test_linear_regressor_outputs_one_value_per_row() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        let mut model = LinearRegressor::new(0.0);
        model.fit(&x, &[1.0, 3.0, 5.0]).unwrap();
        let pred = model.predict(&[vec![3.0]]).unwrap();
        let tensor = pred.as_tensor().unwrap();
        assert_eq!(tensor.shape(), &[1]);
        assert!((tensor.data()[0] - 7.0).abs() < 1e-4);
    }
}
