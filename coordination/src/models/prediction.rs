//! Prediction values exchanged between model agents and voting strategies.
//!
//! A prediction is one of a small closed set of shapes: a single number, an
//! n-dimensional array (class probabilities, regression vectors), a Gaussian
//! summary, or an opaque label. Voting strategies branch on these variants
//! instead of probing for attributes at runtime.

use serde::{Deserialize, Serialize};

/// Absolute tolerance used when deciding whether two predictions agree.
pub const AGREEMENT_TOLERANCE: f64 = 1e-6;

/// Error raised when tensor data does not match its declared shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("shape {shape:?} expects {expected} values, got {actual}")]
pub struct ShapeError {
    pub shape: Vec<usize>,
    pub expected: usize,
    pub actual: usize,
}

/// Dense row-major n-dimensional array of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeError {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional tensor.
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Two-dimensional tensor from equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ShapeError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(vec![rows.len(), width], data)
    }

    /// Tensor of zeros with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Size of the last axis; a rank-0 tensor is one row of width one.
    pub fn row_width(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Iterate over slices of the last axis.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.row_width().max(1))
    }

    /// Elementwise closeness with identical shapes.
    pub fn all_close(&self, other: &Tensor, tolerance: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Whether every row along the last axis is a probability vector.
    pub fn is_probability_rows(&self) -> bool {
        !self.data.is_empty()
            && self.rows().all(|row| {
                row.iter().all(|v| (0.0..=1.0 + AGREEMENT_TOLERANCE).contains(v))
                    && (row.iter().sum::<f64>() - 1.0).abs() <= 1e-3
            })
    }

    /// Index of the largest value in every row; ties resolve to the lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.rows()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
                        if *v > best.1 {
                            (i, *v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Population standard deviation over all elements.
    pub fn std(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.data.len() as f64;
        var.sqrt()
    }
}

/// Output of a single model for one prediction round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prediction {
    /// A single numeric value.
    Scalar { value: f64 },
    /// An array of values, typically class probabilities per sample.
    Tensor { tensor: Tensor },
    /// A Gaussian summary of a numeric prediction.
    Distribution { mean: f64, std: f64 },
    /// Anything else, compared by its textual form.
    Label { value: String },
}

impl Prediction {
    pub fn scalar(value: f64) -> Self {
        Self::Scalar { value }
    }

    pub fn tensor(tensor: Tensor) -> Self {
        Self::Tensor { tensor }
    }

    pub fn label(value: impl Into<String>) -> Self {
        Self::Label {
            value: value.into(),
        }
    }

    pub fn distribution(mean: f64, std: f64) -> Self {
        Self::Distribution { mean, std }
    }

    /// Numeric view: scalars and distribution means.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar { value } => Some(*value),
            Self::Distribution { mean, .. } => Some(*mean),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Tensor { tensor } => Some(tensor),
            _ => None,
        }
    }

    /// Flattened numeric features, used as stacking meta-model input.
    pub fn flatten(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar { value } => Some(vec![*value]),
            Self::Distribution { mean, .. } => Some(vec![*mean]),
            Self::Tensor { tensor } => Some(tensor.data().to_vec()),
            Self::Label { value } => value.trim().parse::<f64>().ok().map(|v| vec![v]),
        }
    }

    /// Self-reported confidence in `[0, 1]`.
    ///
    /// Probability tensors report the mean of their row maxima, distributions
    /// shrink with their spread, everything else is fully confident.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Tensor { tensor } if tensor.is_probability_rows() => {
                let rows: Vec<f64> = tensor
                    .rows()
                    .map(|row| row.iter().copied().fold(0.0, f64::max))
                    .collect();
                (rows.iter().sum::<f64>() / rows.len() as f64).clamp(0.0, 1.0)
            }
            Self::Distribution { std, .. } => 1.0 / (1.0 + std.abs()),
            _ => 1.0,
        }
    }

    /// Agreement predicate shared by voting and ensemble metrics.
    ///
    /// Numbers agree within [`AGREEMENT_TOLERANCE`]; tensors must share a
    /// shape and be elementwise close; anything else compares by text.
    pub fn agrees_with(&self, other: &Prediction) -> bool {
        if let (Some(a), Some(b)) = (self.as_scalar(), other.as_scalar()) {
            return (a - b).abs() <= AGREEMENT_TOLERANCE;
        }
        if let (Some(a), Some(b)) = (self.as_tensor(), other.as_tensor()) {
            return a.all_close(b, AGREEMENT_TOLERANCE);
        }
        self.to_string() == other.to_string()
    }

    /// Fraction of rows whose predicted class matches, in `[0, 1]`.
    ///
    /// Only equal-shape class-probability tensors are graded; everything else
    /// is 1.0 or 0.0 per [`agrees_with`](Self::agrees_with). Consensus and
    /// diversity never use this.
    pub fn class_agreement(&self, other: &Prediction) -> f64 {
        if let (Some(a), Some(b)) = (self.as_tensor(), other.as_tensor()) {
            if a.shape() == b.shape()
                && a.ndim() >= 2
                && a.is_probability_rows()
                && b.is_probability_rows()
            {
                let (la, lb) = (a.argmax_rows(), b.argmax_rows());
                let same = la.iter().zip(&lb).filter(|(x, y)| x == y).count();
                return same as f64 / la.len().max(1) as f64;
            }
        }
        if self.agrees_with(other) {
            1.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar { value } => write!(f, "{}", value),
            Self::Tensor { tensor } => write!(f, "tensor{:?}{:?}", tensor.shape(), tensor.data()),
            Self::Distribution { mean, std } => write!(f, "N({}, {})", mean, std),
            Self::Label { value } => write!(f, "{}", value),
        }
    }
}
