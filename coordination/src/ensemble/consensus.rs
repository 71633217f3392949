//! Consensus and diversity measures over a set of model predictions

use crate::models::Prediction;

/// Pairwise agreement as 1.0 or 0.0, 1.0 on the diagonal.
pub fn agreement_matrix(predictions: &[Prediction]) -> Vec<Vec<f64>> {
    let n = predictions.len();
    let mut matrix = vec![vec![1.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let a = if predictions[i].agrees_with(&predictions[j]) { 1.0 } else { 0.0 };
            matrix[i][j] = a;
            matrix[j][i] = a;
        }
    }
    matrix
}

/// Mean off-diagonal agreement; 1.0 with fewer than two predictions.
pub fn mean_pairwise_agreement(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    if n < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    for (i, row) in matrix.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            if i != j {
                total += value;
            }
        }
    }
    (total / (n * (n - 1)) as f64).clamp(0.0, 1.0)
}

/// Fraction of disagreeing pairs, in `[0, 1]`; 0.0 with fewer than two
/// predictions.
pub fn model_diversity(predictions: &[Prediction]) -> f64 {
    if predictions.len() < 2 {
        return 0.0;
    }
    1.0 - mean_pairwise_agreement(&agreement_matrix(predictions))
}

/// Spread of the predictions.
///
/// Numbers report their population variance and equal-shape tensors the mean
/// elementwise variance. Other mixes have no numeric spread and report
/// diversity instead.
pub fn prediction_variance(predictions: &[Prediction]) -> f64 {
    if predictions.len() < 2 {
        return 0.0;
    }
    if let Some(values) = predictions.iter().map(Prediction::as_scalar).collect::<Option<Vec<_>>>() {
        return variance(&values);
    }
    if let Some(tensors) = predictions.iter().map(Prediction::as_tensor).collect::<Option<Vec<_>>>() {
        let shape = tensors[0].shape();
        if tensors.iter().all(|t| t.shape() == shape) && !tensors[0].is_empty() {
            let len = tensors[0].len();
            let total: f64 = (0..len)
                .map(|i| variance(&tensors.iter().map(|t| t.data()[i]).collect::<Vec<_>>()))
                .sum();
            return total / len as f64;
        }
    }
    model_diversity(predictions)
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tensor;

    #[test]
    fn test_agreement_matrix_diagonal_and_symmetry() {
        let preds = vec![
            Prediction::scalar(1.0),
            Prediction::scalar(1.0),
            Prediction::scalar(2.0),
        ];
        let matrix = agreement_matrix(&preds);
        for (i, row) in matrix.iter().enumerate() {
            assert_eq!(row[i], 1.0);
        }
        assert_eq!(matrix[0][1], 1.0);
        assert_eq!(matrix[0][2], 0.0);
        assert_eq!(matrix[2][0], matrix[0][2]);
        assert!((mean_pairwise_agreement(&matrix) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_diversity_bounds() {
        assert_eq!(model_diversity(&[]), 0.0);
        assert_eq!(model_diversity(&[Prediction::scalar(1.0)]), 0.0);
        assert_eq!(model_diversity(&vec![Prediction::label("x"); 4]), 0.0);

        let all_different: Vec<Prediction> = (0..4).map(|i| Prediction::scalar(i as f64)).collect();
        assert_eq!(model_diversity(&all_different), 1.0);
    }

    #[test]
    fn test_probability_tensors_agree_only_when_close() {
        let a = Tensor::from_rows(&[vec![0.8, 0.2], vec![0.3, 0.7]]).unwrap();
        let b = Tensor::from_rows(&[vec![0.6, 0.4], vec![0.4, 0.6]]).unwrap();
        let preds = vec![
            Prediction::tensor(a.clone()),
            Prediction::tensor(a),
            Prediction::tensor(b),
        ];
        let matrix = agreement_matrix(&preds);
        assert_eq!(matrix[0][1], 1.0);
        // same argmax per row, but not elementwise close
        assert_eq!(matrix[0][2], 0.0);
        assert!((model_diversity(&preds) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_of_scalars_and_tensors() {
        let scalars = vec![Prediction::scalar(1.0), Prediction::scalar(3.0)];
        assert_eq!(prediction_variance(&scalars), 1.0);

        let a = Prediction::tensor(Tensor::vector(vec![0.0, 2.0]));
        let b = Prediction::tensor(Tensor::vector(vec![2.0, 2.0]));
        assert_eq!(prediction_variance(&[a, b]), 0.5);

        let mixed = vec![Prediction::label("a"), Prediction::label("b")];
        assert_eq!(prediction_variance(&mixed), 1.0);
    }
}
