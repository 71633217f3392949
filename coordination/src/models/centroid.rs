//! Distance-based classifiers: a kernelised nearest-centroid model and a
//! bagged ensemble of them over random feature subsets.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::dataset::{class_count, labels_of};
use super::{
    check_fit_input, check_width, softmax_in_place, Model, ModelError, ModelResult, Prediction,
    Tensor,
};

/// Nearest-centroid classifier with an RBF-style soft assignment:
/// `p(c | x) ∝ exp(-gamma · ‖x − μ_c‖² / n_features)`.
#[derive(Debug, Clone)]
pub struct CentroidClassifier {
    gamma: f64,
    /// Per-class centroid; `None` for classes absent from training data.
    centroids: Option<Vec<Option<Vec<f64>>>>,
    /// Feature indices this classifier looks at; `None` means all.
    features: Option<Vec<usize>>,
    n_features: usize,
}

impl CentroidClassifier {
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma: gamma.max(0.0),
            centroids: None,
            features: None,
            n_features: 0,
        }
    }

    fn on_features(mut self, features: Vec<usize>) -> Self {
        self.features = Some(features);
        self
    }

    fn project<'a>(&'a self, row: &'a [f64]) -> Box<dyn Iterator<Item = f64> + 'a> {
        match &self.features {
            Some(idx) => Box::new(idx.iter().map(move |&i| row[i])),
            None => Box::new(row.iter().copied()),
        }
    }

    fn fit_rows(&mut self, x: &[&Vec<f64>], labels: &[usize], n_classes: usize) {
        let width = self.features.as_ref().map(Vec::len).unwrap_or(self.n_features);
        let mut sums = vec![vec![0.0; width]; n_classes];
        let mut counts = vec![0usize; n_classes];
        for (row, &label) in x.iter().zip(labels) {
            for (s, v) in sums[label].iter_mut().zip(self.project(row)) {
                *s += v;
            }
            counts[label] += 1;
        }
        self.centroids = Some(
            sums.into_iter()
                .zip(counts)
                .map(|(sum, count)| {
                    (count > 0).then(|| sum.into_iter().map(|s| s / count as f64).collect())
                })
                .collect(),
        );
    }

    fn row_probabilities(&self, centroids: &[Option<Vec<f64>>], row: &[f64]) -> Vec<f64> {
        let width = self.features.as_ref().map(Vec::len).unwrap_or(self.n_features).max(1) as f64;
        let mut logits: Vec<f64> = centroids
            .iter()
            .map(|centroid| match centroid {
                Some(mu) => {
                    let d2: f64 = self.project(row).zip(mu).map(|(v, m)| (v - m).powi(2)).sum();
                    -self.gamma * d2 / width
                }
                None => f64::NEG_INFINITY,
            })
            .collect();
        softmax_in_place(&mut logits);
        logits
    }
}

impl Model for CentroidClassifier {
    fn name(&self) -> &'static str {
        "centroid_classifier"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()> {
        self.n_features = check_fit_input(x, y)?;
        check_width(x, self.n_features)?;
        let rows: Vec<&Vec<f64>> = x.iter().collect();
        self.fit_rows(&rows, &labels_of(y), class_count(y).max(2));
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        let centroids = self.centroids.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(x, self.n_features)?;
        let rows: Vec<Vec<f64>> = x
            .iter()
            .map(|row| self.row_probabilities(centroids, row))
            .collect();
        Ok(Prediction::tensor(Tensor::from_rows(&rows)?))
    }
}

/// Bootstrap-aggregated centroid classifiers, each on a random feature subset.
#[derive(Debug, Clone)]
pub struct BaggedCentroids {
    n_estimators: usize,
    max_features: f64,
    seed: u64,
    members: Vec<CentroidClassifier>,
    n_features: usize,
}

impl BaggedCentroids {
    pub fn new(n_estimators: usize, max_features: f64, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_features: max_features.clamp(0.0, 1.0),
            seed,
            members: Vec::new(),
            n_features: 0,
        }
    }
}

impl Model for BaggedCentroids {
    fn name(&self) -> &'static str {
        "bagged_centroids"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()> {
        let p = check_fit_input(x, y)?;
        check_width(x, p)?;
        let labels = labels_of(y);
        let n_classes = class_count(y).max(2);
        let subset = ((p as f64 * self.max_features).ceil() as usize).clamp(1, p.max(1));
        let mut rng = StdRng::seed_from_u64(self.seed);

        self.members = (0..self.n_estimators)
            .map(|_| {
                let mut features: Vec<usize> = (0..p).collect();
                features.shuffle(&mut rng);
                features.truncate(subset);

                let sample: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
                let rows: Vec<&Vec<f64>> = sample.iter().map(|&i| &x[i]).collect();
                let sample_labels: Vec<usize> = sample.iter().map(|&i| labels[i]).collect();

                let mut member = CentroidClassifier::new(1.0).on_features(features);
                member.n_features = p;
                member.fit_rows(&rows, &sample_labels, n_classes);
                member
            })
            .collect();
        self.n_features = p;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        if self.members.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_width(x, self.n_features)?;
        let mut total: Option<Tensor> = None;
        for member in &self.members {
            let pred = member.predict(x)?;
            let tensor = match pred {
                Prediction::Tensor { tensor } => tensor,
                _ => return Err(ModelError::InvalidInput("member emitted non-tensor".to_string())),
            };
            match total.as_mut() {
                Some(acc) => {
                    for (a, v) in acc.data_mut().iter_mut().zip(tensor.data()) {
                        *a += v;
                    }
                }
                None => total = Some(tensor),
            }
        }
        let mut total = total.ok_or(ModelError::NotFitted)?;
        let scale = self.members.len() as f64;
        for v in total.data_mut() {
            *v /= scale;
        }
        Ok(Prediction::tensor(total))
    }
}
