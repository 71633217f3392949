//! Majority voting
//!
//! Numbers resolve to their median, class-probability tensors to a per-row
//! plurality over predicted classes, and anything else to the most common
//! textual value.

use super::{VoteResult, VotingMethod, VotingStrategy};
use crate::models::{Prediction, Tensor};

/// Plurality / median voting
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityVoting;

impl VotingStrategy for MajorityVoting {
    fn method(&self) -> VotingMethod {
        VotingMethod::Majority
    }

    fn combine(&self, predictions: &[Prediction]) -> VoteResult<Prediction> {
        if let Some(values) = predictions
            .iter()
            .map(Prediction::as_scalar)
            .collect::<Option<Vec<_>>>()
        {
            return Ok(Prediction::scalar(median(values)));
        }

        if let Some(tensors) = predictions
            .iter()
            .map(Prediction::as_tensor)
            .collect::<Option<Vec<_>>>()
        {
            let shape = tensors[0].shape();
            if tensors.iter().all(|t| t.shape() == shape) {
                let combined = if shape.len() >= 2 || tensors.iter().all(|t| t.is_probability_rows()) {
                    row_plurality(&tensors)?
                } else {
                    elementwise_median(&tensors)?
                };
                return Ok(Prediction::tensor(combined));
            }
        }

        Ok(text_plurality(predictions))
    }
}

/// Median; even counts average the two middle values.
pub fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// One-hot of the most voted class per row; ties go to the class seen first.
fn row_plurality(tensors: &[&Tensor]) -> VoteResult<Tensor> {
    let width = tensors[0].row_width();
    let votes: Vec<Vec<usize>> = tensors.iter().map(|t| t.argmax_rows()).collect();
    let rows = votes[0].len();

    let mut out = Tensor::zeros(tensors[0].shape().to_vec());
    let data = out.data_mut();
    for row in 0..rows {
        let mut counts = vec![0usize; width];
        let mut first_seen = vec![usize::MAX; width];
        for (order, labels) in votes.iter().enumerate() {
            let class = labels[row];
            counts[class] += 1;
            first_seen[class] = first_seen[class].min(order);
        }
        let winner = (0..width)
            .max_by(|&a, &b| counts[a].cmp(&counts[b]).then(first_seen[b].cmp(&first_seen[a])))
            .unwrap_or(0);
        data[row * width + winner] = 1.0;
    }
    Ok(out)
}

fn elementwise_median(tensors: &[&Tensor]) -> VoteResult<Tensor> {
    let len = tensors[0].len();
    let data = (0..len)
        .map(|i| median(tensors.iter().map(|t| t.data()[i]).collect()))
        .collect();
    Ok(Tensor::new(tensors[0].shape().to_vec(), data)?)
}

/// Most common textual value; ties go to the value seen first.
fn text_plurality(predictions: &[Prediction]) -> Prediction {
    let keys: Vec<String> = predictions.iter().map(ToString::to_string).collect();
    let mut best = 0;
    let mut best_count = 0;
    for (i, key) in keys.iter().enumerate() {
        if keys[..i].contains(key) {
            continue;
        }
        let count = keys.iter().filter(|k| *k == key).count();
        if count > best_count {
            best = i;
            best_count = count;
        }
    }
    predictions[best].clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::voting::class_agreement;

    fn scalars(values: &[f64]) -> Vec<Prediction> {
        values.iter().copied().map(Prediction::scalar).collect()
    }

    #[test]
    fn test_median_resists_outliers() {
        let out = MajorityVoting.vote(&scalars(&[1.0, 2.0, 3.0, 4.0, 100.0])).unwrap();
        assert_eq!(out, Prediction::scalar(3.0));
    }

    #[test]
    fn test_even_count_median_averages_middle() {
        let out = MajorityVoting.vote(&scalars(&[4.0, 1.0, 3.0, 2.0])).unwrap();
        assert_eq!(out, Prediction::scalar(2.5));
    }

    #[test]
    fn test_class_probabilities_vote_per_row() {
        let a = Tensor::from_rows(&[vec![0.8, 0.2], vec![0.3, 0.7]]).unwrap();
        let b = Tensor::from_rows(&[vec![0.6, 0.4], vec![0.9, 0.1]]).unwrap();
        let c = Tensor::from_rows(&[vec![0.1, 0.9], vec![0.2, 0.8]]).unwrap();
        let preds: Vec<Prediction> = [a, b, c].into_iter().map(Prediction::tensor).collect();

        let result = MajorityVoting.vote_with_details(&preds).unwrap();
        let expected = Tensor::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(result.prediction, Prediction::tensor(expected));
        // one-hot output is not elementwise close to any input
        assert_eq!(result.consensus_strength, 0.0);
        assert_eq!(result.confidence, 0.0);
        // a matches both rows, b the first, c the second
        assert!((class_agreement(&result.prediction, &preds) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_consensus_counts_agreeing_tensors() {
        let a = Tensor::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8]]).unwrap();
        let b = Tensor::from_rows(&[vec![0.7, 0.3], vec![0.4, 0.6]]).unwrap();
        let preds: Vec<Prediction> = [a.clone(), a, b].into_iter().map(Prediction::tensor).collect();

        let result = MajorityVoting.vote_with_details(&preds).unwrap();
        let agreeing = preds.iter().filter(|p| p.agrees_with(&result.prediction)).count();
        assert_eq!(agreeing, 0);
        assert_eq!(result.consensus_strength, agreeing as f64 / preds.len() as f64);
    }

    #[test]
    fn test_row_tie_goes_to_first_voter() {
        let a = Tensor::from_rows(&[vec![0.1, 0.9]]).unwrap();
        let b = Tensor::from_rows(&[vec![0.9, 0.1]]).unwrap();
        let out = MajorityVoting
            .vote(&[Prediction::tensor(a), Prediction::tensor(b)])
            .unwrap();
        assert_eq!(out.as_tensor().unwrap().data(), &[0.0, 1.0]);
    }

    #[test]
    fn test_labels_use_plurality_first_seen_wins() {
        let preds = vec![
            Prediction::label("dog"),
            Prediction::label("cat"),
            Prediction::label("cat"),
            Prediction::label("dog"),
        ];
        let result = MajorityVoting.vote_with_details(&preds).unwrap();
        assert_eq!(result.prediction, Prediction::label("dog"));
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.weights, vec![0.25; 4]);
    }
}
