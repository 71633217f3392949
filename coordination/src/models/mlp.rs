//! Single-hidden-layer perceptron with tanh activations and a softmax head.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::dataset::{class_count, labels_of};
use super::{
    check_fit_input, check_width, softmax_in_place, Model, ModelError, ModelResult, Prediction,
    Tensor,
};

#[derive(Debug, Clone)]
struct Layers {
    /// `hidden × (inputs + 1)`, bias last.
    w1: Vec<Vec<f64>>,
    /// `classes × (hidden + 1)`, bias last.
    w2: Vec<Vec<f64>>,
}

impl Layers {
    fn forward(&self, row: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let p = row.len();
        let hidden: Vec<f64> = self
            .w1
            .iter()
            .map(|w| (row.iter().zip(w).map(|(x, w)| x * w).sum::<f64>() + w[p]).tanh())
            .collect();
        let h = hidden.len();
        let mut out: Vec<f64> = self
            .w2
            .iter()
            .map(|w| hidden.iter().zip(w).map(|(a, w)| a * w).sum::<f64>() + w[h])
            .collect();
        softmax_in_place(&mut out);
        (hidden, out)
    }
}

/// Small MLP classifier trained with full-batch gradient descent.
#[derive(Debug, Clone)]
pub struct Mlp {
    hidden_units: usize,
    learning_rate: f64,
    epochs: usize,
    seed: u64,
    layers: Option<Layers>,
}

impl Mlp {
    pub fn new(hidden_units: usize, learning_rate: f64, epochs: usize, seed: u64) -> Self {
        Self {
            hidden_units: hidden_units.max(1),
            learning_rate,
            epochs: epochs.max(1),
            seed,
            layers: None,
        }
    }
}

impl Model for Mlp {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()> {
        let p = check_fit_input(x, y)?;
        check_width(x, p)?;
        let labels = labels_of(y);
        let k = class_count(y).max(2);
        let h = self.hidden_units;
        let n = x.len() as f64;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale1 = (1.0 / (p.max(1) as f64)).sqrt();
        let scale2 = (1.0 / h as f64).sqrt();
        let mut layers = Layers {
            w1: (0..h)
                .map(|_| (0..=p).map(|_| rng.gen_range(-scale1..scale1)).collect())
                .collect(),
            w2: (0..k)
                .map(|_| (0..=h).map(|_| rng.gen_range(-scale2..scale2)).collect())
                .collect(),
        };

        for _ in 0..self.epochs {
            let mut g1 = vec![vec![0.0; p + 1]; h];
            let mut g2 = vec![vec![0.0; h + 1]; k];
            for (row, &label) in x.iter().zip(&labels) {
                let (hidden, out) = layers.forward(row);
                let delta_out: Vec<f64> = out
                    .iter()
                    .enumerate()
                    .map(|(c, o)| o - if c == label { 1.0 } else { 0.0 })
                    .collect();
                for (c, d) in delta_out.iter().enumerate() {
                    for (j, a) in hidden.iter().enumerate() {
                        g2[c][j] += d * a;
                    }
                    g2[c][h] += d;
                }
                for j in 0..h {
                    let back: f64 = delta_out
                        .iter()
                        .enumerate()
                        .map(|(c, d)| d * layers.w2[c][j])
                        .sum();
                    let delta_hidden = back * (1.0 - hidden[j] * hidden[j]);
                    for (i, v) in row.iter().enumerate() {
                        g1[j][i] += delta_hidden * v;
                    }
                    g1[j][p] += delta_hidden;
                }
            }
            for (w, g) in layers.w1.iter_mut().zip(&g1) {
                for (wi, gi) in w.iter_mut().zip(g) {
                    *wi -= self.learning_rate * gi / n;
                }
            }
            for (w, g) in layers.w2.iter_mut().zip(&g2) {
                for (wi, gi) in w.iter_mut().zip(g) {
                    *wi -= self.learning_rate * gi / n;
                }
            }
        }

        self.layers = Some(layers);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        let layers = self.layers.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(x, layers.w1[0].len() - 1)?;
        let rows: Vec<Vec<f64>> = x.iter().map(|row| layers.forward(row).1).collect();
        Ok(Prediction::tensor(Tensor::from_rows(&rows)?))
    }
}
