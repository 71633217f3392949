//! In-memory tabular datasets and a seeded synthetic classification generator.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{ModelError, ModelResult};

/// Row-major feature matrix.
pub type Matrix = Vec<Vec<f64>>;

/// Features plus integer class labels stored as `f64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    features: Matrix,
    targets: Vec<f64>,
    n_classes: usize,
}

impl Dataset {
    /// Create a dataset, validating row widths and target length.
    pub fn new(features: Matrix, targets: Vec<f64>) -> ModelResult<Self> {
        if features.is_empty() {
            return Err(ModelError::InvalidInput("dataset has no rows".to_string()));
        }
        if features.len() != targets.len() {
            return Err(ModelError::InvalidInput(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        let width = features[0].len();
        if let Some(bad) = features.iter().position(|row| row.len() != width) {
            return Err(ModelError::InvalidInput(format!(
                "row {} has {} features, expected {}",
                bad,
                features[bad].len(),
                width
            )));
        }
        let n_classes = class_count(&targets);
        Ok(Self {
            features,
            targets,
            n_classes,
        })
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn n_samples(&self) -> usize {
        self.features.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.first().map(Vec::len).unwrap_or(0)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Targets as class indices; negative or fractional values are truncated.
    pub fn labels(&self) -> Vec<usize> {
        labels_of(&self.targets)
    }

    /// Shuffle with `seed` and split off `test_fraction` of the rows.
    ///
    /// Both halves keep at least one row and inherit the full class count.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> ModelResult<(Dataset, Dataset)> {
        if self.n_samples() < 2 {
            return Err(ModelError::InvalidInput(
                "need at least two rows to split".to_string(),
            ));
        }
        let mut order: Vec<usize> = (0..self.n_samples()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let test_len = ((self.n_samples() as f64 * test_fraction.clamp(0.0, 1.0)).round() as usize)
            .clamp(1, self.n_samples() - 1);
        let (test_idx, train_idx) = order.split_at(test_len);

        let take = |idx: &[usize]| Dataset {
            features: idx.iter().map(|&i| self.features[i].clone()).collect(),
            targets: idx.iter().map(|&i| self.targets[i]).collect(),
            n_classes: self.n_classes,
        };
        Ok((take(train_idx), take(test_idx)))
    }

    /// Deterministic Gaussian-blob classification data.
    ///
    /// Each class gets a random centre in `[-3, 3]^n_features`; samples are the
    /// centre plus unit Gaussian noise. Labels are assigned round-robin so every
    /// class is represented when `n_samples >= n_classes`.
    pub fn make_classification(
        n_samples: usize,
        n_features: usize,
        n_classes: usize,
        seed: u64,
    ) -> ModelResult<Self> {
        if n_samples == 0 || n_features == 0 || n_classes < 2 {
            return Err(ModelError::InvalidInput(format!(
                "invalid synthetic shape: samples={} features={} classes={}",
                n_samples, n_features, n_classes
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let centres: Matrix = (0..n_classes)
            .map(|_| (0..n_features).map(|_| rng.gen_range(-3.0..3.0)).collect())
            .collect();

        let mut rows: Vec<(Vec<f64>, f64)> = (0..n_samples)
            .map(|i| {
                let class = i % n_classes;
                let row = centres[class]
                    .iter()
                    .map(|c| c + standard_normal(&mut rng))
                    .collect();
                (row, class as f64)
            })
            .collect();
        rows.shuffle(&mut rng);

        let (features, targets) = rows.into_iter().unzip();
        let mut dataset = Self::new(features, targets)?;
        dataset.n_classes = n_classes;
        Ok(dataset)
    }
}

/// Number of classes implied by integer-valued targets.
pub fn class_count(targets: &[f64]) -> usize {
    targets
        .iter()
        .map(|t| t.max(0.0) as usize + 1)
        .max()
        .unwrap_or(0)
}

pub fn labels_of(targets: &[f64]) -> Vec<usize> {
    targets.iter().map(|t| t.max(0.0) as usize).collect()
}

/// Box–Muller transform over two uniform draws.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
