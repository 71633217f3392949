//! Model seam: supported model kinds, the `Model` capability trait, and the
//! backend that maps a kind plus hyperparameters onto a concrete estimator.
//!
//! Everything library-specific lives behind [`ModelBackend`]. The crate ships a
//! [`BuiltinBackend`] of small pure-Rust estimators so an ensemble can run end
//! to end without external frameworks; the gradient-boosting libraries are
//! reported as unavailable.

pub mod centroid;
pub mod dataset;
pub mod linalg;
pub mod linear;
pub mod mlp;
pub mod prediction;
pub mod scoring;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use centroid::{BaggedCentroids, CentroidClassifier};
pub use dataset::{Dataset, Matrix};
pub use linear::{LinearRegressor, SoftmaxRegression};
pub use mlp::Mlp;
pub use prediction::{Prediction, ShapeError, Tensor, AGREEMENT_TOLERANCE};
pub use scoring::{
    classification_scores, predicted_labels, regression_scores, roc_auc_ovr, ClassificationScores,
    RegressionScores,
};

/// Free-form hyperparameters keyed by name.
pub type Hyperparameters = BTreeMap<String, serde_json::Value>;

/// Error type for model construction, fitting and prediction
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Unsupported model type: {0}")]
    Unsupported(String),

    #[error("Model library unavailable for {0}")]
    Unavailable(String),

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Singular system while solving least squares")]
    Singular,
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Supported algorithm families.
///
/// Parsing never fails: unknown names become [`ModelKind::Generic`] with a
/// warning, and the builtin backend refuses to construct a generic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelKind {
    RandomForest,
    GradientBoost,
    NeuralNetwork,
    Svm,
    LogisticRegression,
    LinearRegression,
    XgBoost,
    LightGbm,
    CatBoost,
    Generic,
}

impl ModelKind {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RandomForest => "random_forest",
            Self::GradientBoost => "gradient_boost",
            Self::NeuralNetwork => "neural_network",
            Self::Svm => "svm",
            Self::LogisticRegression => "logistic_regression",
            Self::LinearRegression => "linear_regression",
            Self::XgBoost => "xgboost",
            Self::LightGbm => "lightgbm",
            Self::CatBoost => "catboost",
            Self::Generic => "generic",
        }
    }

    /// Default five-model roster used when a config lists no models.
    pub fn default_roster() -> &'static [ModelKind] {
        &[
            ModelKind::RandomForest,
            ModelKind::GradientBoost,
            ModelKind::NeuralNetwork,
            ModelKind::Svm,
            ModelKind::LogisticRegression,
        ]
    }

    /// Parse without logging; `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "random_forest" | "rf" => Self::RandomForest,
            "gradient_boost" | "gradient_boosting" | "gbm" => Self::GradientBoost,
            "neural_network" | "mlp" | "nn" => Self::NeuralNetwork,
            "svm" | "svc" => Self::Svm,
            "logistic_regression" | "logistic" => Self::LogisticRegression,
            "linear_regression" | "linear" => Self::LinearRegression,
            "xgboost" => Self::XgBoost,
            "lightgbm" => Self::LightGbm,
            "catboost" => Self::CatBoost,
            "generic" => Self::Generic,
            _ => return None,
        };
        Some(kind)
    }
}

impl From<&str> for ModelKind {
    fn from(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            warn!(model_type = name, "Unknown model type, falling back to generic");
            Self::Generic
        })
    }
}

impl From<String> for ModelKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trainable predictor. Implementations run on the blocking pool, so they
/// may do CPU-heavy work synchronously.
pub trait Model: Send {
    /// Short estimator name for logs.
    fn name(&self) -> &'static str;

    /// Fit on feature rows `x` and targets `y`.
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ModelResult<()>;

    /// Predict for feature rows `x`.
    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction>;
}

/// Constructs concrete models from a kind and its hyperparameters.
pub trait ModelBackend: Send + Sync {
    fn build(&self, kind: ModelKind, hyperparameters: &Hyperparameters) -> ModelResult<Box<dyn Model>>;
}

/// Pure-Rust estimators bundled with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinBackend;

impl ModelBackend for BuiltinBackend {
    fn build(&self, kind: ModelKind, hp: &Hyperparameters) -> ModelResult<Box<dyn Model>> {
        let seed = hp_u64(hp, "random_state", 42);
        let model: Box<dyn Model> = match kind {
            ModelKind::LogisticRegression => Box::new(SoftmaxRegression::new(
                hp_f64(hp, "learning_rate", 0.1),
                hp_usize(hp, "max_iter", 200),
                hp_f64(hp, "l2", 1e-3),
            )),
            ModelKind::GradientBoost => Box::new(SoftmaxRegression::new(
                hp_f64(hp, "learning_rate", 0.05),
                hp_usize(hp, "n_estimators", 300),
                0.0,
            )),
            ModelKind::NeuralNetwork => Box::new(Mlp::new(
                hp_usize(hp, "hidden_units", 16),
                hp_f64(hp, "learning_rate", 0.05),
                hp_usize(hp, "max_iter", 300),
                seed,
            )),
            ModelKind::Svm => Box::new(CentroidClassifier::new(hp_f64(hp, "gamma", 1.0))),
            ModelKind::RandomForest => Box::new(BaggedCentroids::new(
                hp_usize(hp, "n_estimators", 10),
                hp_f64(hp, "max_features", 0.7),
                seed,
            )),
            ModelKind::LinearRegression => Box::new(LinearRegressor::new(hp_f64(hp, "alpha", 0.0))),
            ModelKind::XgBoost | ModelKind::LightGbm | ModelKind::CatBoost => {
                return Err(ModelError::Unavailable(kind.to_string()))
            }
            ModelKind::Generic => return Err(ModelError::Unsupported(kind.to_string())),
        };
        Ok(model)
    }
}

/// Read a float hyperparameter, accepting integers too.
pub fn hp_f64(hp: &Hyperparameters, key: &str, default: f64) -> f64 {
    hp.get(key).and_then(serde_json::Value::as_f64).unwrap_or(default)
}

pub fn hp_usize(hp: &Hyperparameters, key: &str, default: usize) -> usize {
    hp.get(key)
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn hp_u64(hp: &Hyperparameters, key: &str, default: u64) -> u64 {
    hp.get(key).and_then(serde_json::Value::as_u64).unwrap_or(default)
}

/// Numerically stable softmax of one row, in place.
pub(crate) fn softmax_in_place(row: &mut [f64]) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

pub(crate) fn check_fit_input(x: &[Vec<f64>], y: &[f64]) -> ModelResult<usize> {
    if x.is_empty() {
        return Err(ModelError::InvalidInput("no training rows".to_string()));
    }
    if x.len() != y.len() {
        return Err(ModelError::InvalidInput(format!(
            "{} rows but {} targets",
            x.len(),
            y.len()
        )));
    }
    Ok(x[0].len())
}

pub(crate) fn check_width(x: &[Vec<f64>], expected: usize) -> ModelResult<()> {
    match x.iter().find(|row| row.len() != expected) {
        Some(row) => Err(ModelError::InvalidInput(format!(
            "expected {} features, got {}",
            expected,
            row.len()
        ))),
        None => Ok(()),
    }
}
