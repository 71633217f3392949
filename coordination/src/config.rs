//! Ensemble configuration
//!
//! Loaded from TOML with every field optional, then overridden from the
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `ENSEMBLE_MAX_PARALLEL` | `max_parallel` |
//! | `ENSEMBLE_TIMEOUT_SECS` | `timeout_seconds` |
//! | `ENSEMBLE_VOTING_STRATEGY` | `voting_strategy` |
//!
//! Unparseable overrides are logged and ignored.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ensemble::agent::ModelConfig;
use crate::ensemble::coordinator::CoordinatorConfig;
use crate::ensemble::voting::VotingMethod;
use crate::models::{Hyperparameters, ModelKind};

pub const ENV_MAX_PARALLEL: &str = "ENSEMBLE_MAX_PARALLEL";
pub const ENV_TIMEOUT_SECS: &str = "ENSEMBLE_TIMEOUT_SECS";
pub const ENV_VOTING_STRATEGY: &str = "ENSEMBLE_VOTING_STRATEGY";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One model in the ensemble. Unset fields inherit the ensemble defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Agent id; defaults to `<model_type>_<index>`
    #[serde(default)]
    pub id: Option<String>,
    pub model_type: ModelKind,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub gpu_enabled: Option<bool>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

impl ModelSpec {
    pub fn new(model_type: ModelKind) -> Self {
        Self {
            id: None,
            model_type,
            hyperparameters: Hyperparameters::new(),
            capabilities: BTreeSet::new(),
            gpu_enabled: None,
            timeout_seconds: None,
            retry_attempts: None,
            max_memory_mb: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Top-level ensemble configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Explicit models; when empty the default roster fills `ensemble_size`
    pub models: Vec<ModelSpec>,
    pub voting_strategy: VotingMethod,
    pub max_parallel: usize,
    /// Per-call timeout for model operations
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub max_memory_mb: u64,
    pub gpu_enabled: bool,
    /// Accepted for compatibility; runs are always single-process
    pub distributed: bool,
    /// Consensus strength below this is flagged in the result
    pub consensus_threshold: f64,
    /// Metric name to threshold
    pub performance_targets: BTreeMap<String, f64>,
    pub ensemble_size: usize,
    /// Share of the dataset held out for prediction and scoring
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let model = ModelConfig::default();
        Self {
            models: Vec::new(),
            voting_strategy: VotingMethod::Weighted,
            max_parallel: 4,
            timeout_seconds: model.timeout_seconds,
            retry_attempts: model.retry_attempts,
            max_memory_mb: model.max_memory_mb,
            gpu_enabled: false,
            distributed: false,
            consensus_threshold: 0.5,
            performance_targets: BTreeMap::new(),
            ensemble_size: ModelKind::default_roster().len(),
            test_fraction: 0.25,
            seed: 42,
        }
    }
}

impl EnsembleConfig {
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.as_ref().display(), models = config.model_count(), "Config loaded");
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_MAX_PARALLEL) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_parallel = n,
                _ => warn!(var = ENV_MAX_PARALLEL, value = %raw, "Ignoring invalid override"),
            }
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.timeout_seconds = secs,
                _ => warn!(var = ENV_TIMEOUT_SECS, value = %raw, "Ignoring invalid override"),
            }
        }
        if let Some(raw) = lookup(ENV_VOTING_STRATEGY) {
            match VotingMethod::parse(&raw) {
                Some(method) => self.voting_strategy = method,
                None => warn!(var = ENV_VOTING_STRATEGY, value = %raw, "Ignoring invalid override"),
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid("max_parallel must be at least 1".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeout_seconds must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(ConfigError::Invalid(format!(
                "consensus_threshold {} outside [0, 1]",
                self.consensus_threshold
            )));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "test_fraction {} outside (0, 1)",
                self.test_fraction
            )));
        }
        if self.models.is_empty() && self.ensemble_size == 0 {
            return Err(ConfigError::Invalid("ensemble_size must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        for (id, _) in self.resolved_models() {
            if !seen.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate model id: {}", id)));
            }
        }
        if self.distributed {
            warn!("Distributed execution is not supported; running in-process");
        }
        Ok(())
    }

    pub fn model_count(&self) -> usize {
        if self.models.is_empty() {
            self.ensemble_size
        } else {
            self.models.len()
        }
    }

    /// Agent ids and configs for every model in the ensemble.
    ///
    /// With no explicit models the default roster is cycled up to
    /// `ensemble_size`.
    pub fn resolved_models(&self) -> Vec<(String, ModelConfig)> {
        if self.models.is_empty() {
            return ModelKind::default_roster()
                .iter()
                .cycle()
                .take(self.ensemble_size)
                .enumerate()
                .map(|(i, kind)| (format!("{}_{}", kind, i), self.model_config(&ModelSpec::new(*kind))))
                .collect();
        }
        self.models
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let id = spec
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", spec.model_type, i));
                (id, self.model_config(spec))
            })
            .collect()
    }

    fn model_config(&self, spec: &ModelSpec) -> ModelConfig {
        ModelConfig {
            model_type: spec.model_type,
            hyperparameters: spec.hyperparameters.clone(),
            capabilities: spec.capabilities.clone(),
            gpu_enabled: spec.gpu_enabled.unwrap_or(self.gpu_enabled),
            max_memory_mb: spec.max_memory_mb.unwrap_or(self.max_memory_mb),
            timeout_seconds: spec.timeout_seconds.unwrap_or(self.timeout_seconds),
            retry_attempts: spec.retry_attempts.unwrap_or(self.retry_attempts),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_parallel: self.max_parallel.max(1),
            timeout_seconds: self.timeout_seconds,
            retry_attempts: self.retry_attempts,
            max_memory_mb: self.max_memory_mb,
        }
    }
}
