//! Ground-truth scoring helpers shared by model agents and the tracker.

use serde::{Deserialize, Serialize};

use super::{Prediction, Tensor};

/// Macro-averaged classification scores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Error summary for numeric predictions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegressionScores {
    pub mean_absolute_error: f64,
    pub mean_squared_error: f64,
}

/// Accuracy plus macro precision/recall/F1 over classes seen in either input.
pub fn classification_scores(y_true: &[usize], y_pred: &[usize]) -> ClassificationScores {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return ClassificationScores::default();
    }
    let n_classes = y_true
        .iter()
        .chain(y_pred)
        .copied()
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);

    let mut tp = vec![0usize; n_classes];
    let mut fp = vec![0usize; n_classes];
    let mut fn_ = vec![0usize; n_classes];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t == p {
            tp[t] += 1;
        } else {
            fp[p] += 1;
            fn_[t] += 1;
        }
    }

    let correct: usize = tp.iter().sum();
    let present: Vec<usize> = (0..n_classes)
        .filter(|&c| tp[c] + fp[c] + fn_[c] > 0)
        .collect();
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    for &c in &present {
        let p = ratio(tp[c], tp[c] + fp[c]);
        let r = ratio(tp[c], tp[c] + fn_[c]);
        precision += p;
        recall += r;
        f1 += if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
    }
    let classes = present.len().max(1) as f64;

    ClassificationScores {
        accuracy: correct as f64 / n as f64,
        precision: precision / classes,
        recall: recall / classes,
        f1: f1 / classes,
    }
}

pub fn regression_scores(y_true: &[f64], y_pred: &[f64]) -> RegressionScores {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return RegressionScores::default();
    }
    let (abs, sq) = y_true
        .iter()
        .zip(y_pred)
        .fold((0.0, 0.0), |(abs, sq), (t, p)| {
            (abs + (t - p).abs(), sq + (t - p).powi(2))
        });
    RegressionScores {
        mean_absolute_error: abs / n as f64,
        mean_squared_error: sq / n as f64,
    }
}

/// One-vs-rest macro ROC AUC from class-probability rows.
///
/// Returns `None` when the tensor does not have one row per label, or when
/// no class has both positive and negative examples.
pub fn roc_auc_ovr(y_true: &[usize], probabilities: &Tensor) -> Option<f64> {
    let width = probabilities.row_width();
    let rows: Vec<&[f64]> = probabilities.rows().collect();
    if rows.len() != y_true.len() || width < 2 {
        return None;
    }

    let mut total = 0.0;
    let mut counted = 0usize;
    for class in 0..width {
        let mut scored: Vec<(f64, bool)> = rows
            .iter()
            .zip(y_true)
            .map(|(row, &t)| (row[class], t == class))
            .collect();
        let positives = scored.iter().filter(|(_, p)| *p).count();
        let negatives = scored.len() - positives;
        if positives == 0 || negatives == 0 {
            continue;
        }
        // Mann–Whitney U with average ranks for ties.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut rank_sum = 0.0;
        let mut i = 0;
        while i < scored.len() {
            let mut j = i;
            while j + 1 < scored.len() && scored[j + 1].0 == scored[i].0 {
                j += 1;
            }
            let avg_rank = (i + j) as f64 / 2.0 + 1.0;
            rank_sum += scored[i..=j].iter().filter(|(_, p)| *p).count() as f64 * avg_rank;
            i = j + 1;
        }
        let u = rank_sum - (positives * (positives + 1)) as f64 / 2.0;
        total += u / (positives * negatives) as f64;
        counted += 1;
    }
    (counted > 0).then(|| total / counted as f64)
}

/// Class labels implied by a prediction, if it carries any.
///
/// Probability tensors map to their row argmax; 1-D tensors and scalars are
/// rounded.
pub fn predicted_labels(prediction: &Prediction) -> Option<Vec<usize>> {
    match prediction {
        Prediction::Tensor { tensor } if tensor.ndim() >= 2 => Some(tensor.argmax_rows()),
        Prediction::Tensor { tensor } => Some(
            tensor
                .data()
                .iter()
                .map(|v| v.round().max(0.0) as usize)
                .collect(),
        ),
        Prediction::Scalar { value } => Some(vec![value.round().max(0.0) as usize]),
        _ => None,
    }
}
