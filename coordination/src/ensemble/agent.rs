//! Model agent - one predictive model and its lifecycle
//!
//! An agent owns a model built through a [`ModelBackend`], tracks its status,
//! and runs train/predict calls on the blocking pool under a per-call timeout.
//!
//! ```text
//! Initializing ──▶ Ready ⇄ Training
//!      │             ⇅
//!      ▼          Predicting
//!    Error ◀── (any failure)        any ──▶ Terminated
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::benchmark::resources::current_process_memory_mb;
use crate::events::AgentOperation;
use crate::models::{
    classification_scores, dataset::labels_of, Hyperparameters, Matrix, Model,
    ModelBackend, ModelError, ModelKind, Prediction,
};
use crate::perf_control::{retry_with_backoff, RetryPolicy};

/// Concurrency slot held for the full life of a model call.
///
/// Every blocking call keeps a clone, so the slot is only returned once the
/// caller is done and no abandoned call is still running.
pub type CallPermit = Arc<OwnedSemaphorePermit>;

/// Error type for agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent {agent_id} is {actual}, expected {expected}")]
    InvalidState {
        agent_id: String,
        expected: AgentStatus,
        actual: AgentStatus,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: AgentOperation,
        seconds: u64,
    },

    #[error("Model task aborted: {0}")]
    Aborted(String),
}

impl AgentError {
    /// Only model-level failures are worth retrying; timeouts and aborts lose
    /// the model.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Model(ModelError::InvalidInput(_) | ModelError::Singular)
        )
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Lifecycle status of a model agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AgentStatus {
    Initializing = 0,
    Ready = 1,
    Training = 2,
    Predicting = 3,
    Error = 4,
    Terminated = 5,
}

impl AgentStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Ready,
            2 => Self::Training,
            3 => Self::Predicting,
            4 => Self::Error,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Training => write!(f, "training"),
            Self::Predicting => write!(f, "predicting"),
            Self::Error => write!(f, "error"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Lock-free status shared between an agent and its coordinator, so status
/// reads never wait on a long-running model call.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: AgentStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> AgentStatus {
        AgentStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: AgentStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Immutable configuration of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_type: ModelKind,
    pub hyperparameters: Hyperparameters,
    pub capabilities: BTreeSet<String>,
    pub gpu_enabled: bool,
    /// Soft limit; exceeding it is logged, not enforced
    pub max_memory_mb: u64,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl ModelConfig {
    pub fn new(model_type: ModelKind) -> Self {
        Self {
            model_type,
            ..Self::default()
        }
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelKind::Generic,
            hyperparameters: Hyperparameters::new(),
            capabilities: BTreeSet::new(),
            gpu_enabled: false,
            max_memory_mb: 2048,
            timeout_seconds: 300,
            retry_attempts: 3,
        }
    }
}

/// Measured performance of one agent; `None` until measured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    /// Seconds
    pub training_time: Option<f64>,
    /// Seconds
    pub prediction_time: Option<f64>,
    pub memory_usage_mb: Option<f64>,
    pub cpu_utilization: Option<f64>,
}

impl PerformanceMetrics {
    /// Snapshot with unmeasured values reported as 0.0
    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            accuracy: self.accuracy.unwrap_or(0.0),
            precision: self.precision.unwrap_or(0.0),
            recall: self.recall.unwrap_or(0.0),
            f1_score: self.f1_score.unwrap_or(0.0),
            training_time: self.training_time.unwrap_or(0.0),
            prediction_time: self.prediction_time.unwrap_or(0.0),
            memory_usage_mb: self.memory_usage_mb.unwrap_or(0.0),
            cpu_utilization: self.cpu_utilization.unwrap_or(0.0),
        }
    }
}

/// Plain-number view of [`PerformanceMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub training_time: f64,
    pub prediction_time: f64,
    pub memory_usage_mb: f64,
    pub cpu_utilization: f64,
}

/// One model and its lifecycle
pub struct ModelAgent {
    agent_id: String,
    config: ModelConfig,
    backend: Arc<dyn ModelBackend>,
    status: Arc<StatusCell>,
    model: Option<Box<dyn Model>>,
    metrics: PerformanceMetrics,
}

impl ModelAgent {
    /// Create an agent in `Initializing`; call [`initialize`](Self::initialize)
    /// before use.
    pub fn new(agent_id: impl Into<String>, config: ModelConfig, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            backend,
            status: Arc::new(StatusCell::new(AgentStatus::Initializing)),
            model: None,
            metrics: PerformanceMetrics::default(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn status(&self) -> AgentStatus {
        self.status.get()
    }

    /// Handle for reading status without holding the agent
    pub fn status_handle(&self) -> Arc<StatusCell> {
        self.status.clone()
    }

    /// Build the model. Unsupported kinds and missing libraries leave the
    /// agent in `Error`.
    pub fn initialize(&mut self) -> AgentResult<()> {
        self.expect_status(AgentStatus::Initializing)?;
        match self
            .backend
            .build(self.config.model_type, &self.config.hyperparameters)
        {
            Ok(model) => {
                debug!(agent_id = %self.agent_id, estimator = model.name(), "Model built");
                self.model = Some(model);
                self.status.set(AgentStatus::Ready);
                info!(agent_id = %self.agent_id, model_type = %self.config.model_type, "Agent initialized");
                Ok(())
            }
            Err(e) => {
                self.fail(AgentOperation::Initialize, &e);
                Err(e.into())
            }
        }
    }

    /// Fit the model, retrying model errors per `retry_attempts`.
    ///
    /// On success the agent scores itself on the training data and records
    /// training time and memory growth.
    pub async fn train(&mut self, x: Arc<Matrix>, y: Arc<Vec<f64>>) -> AgentResult<()> {
        self.train_holding(x, y, None).await
    }

    /// [`train`](Self::train) while holding `permit` until every model call,
    /// including one abandoned on timeout, has returned.
    pub async fn train_holding(
        &mut self,
        x: Arc<Matrix>,
        y: Arc<Vec<f64>>,
        permit: Option<CallPermit>,
    ) -> AgentResult<()> {
        self.expect_status(AgentStatus::Ready)?;
        self.status.set(AgentStatus::Training);

        let memory_before = current_process_memory_mb();
        let start = Instant::now();

        let policy = RetryPolicy::for_model_calls(self.config.retry_attempts);
        let limit = self.config.timeout();
        let kind = self.config.model_type;
        let hyperparameters = self.config.hyperparameters.clone();
        let backend = self.backend.clone();
        let agent_id = self.agent_id.clone();
        let mut current = self.model.take();

        let outcome = retry_with_backoff(&policy, AgentError::is_retryable, |attempt| {
            // Later attempts start from a fresh model.
            let model = match current.take() {
                Some(model) => Ok(model),
                None => backend.build(kind, &hyperparameters),
            };
            let (x, y) = (x.clone(), y.clone());
            let agent_id = agent_id.clone();
            let permit = permit.clone();
            async move {
                if attempt > 0 {
                    debug!(agent_id = %agent_id, attempt, "Retrying training");
                }
                run_blocking(model?, limit, AgentOperation::Train, permit, move |m| {
                    m.fit(&x, &y)?;
                    m.predict(&x)
                })
                .await
            }
        })
        .await;

        match outcome {
            Ok((model, fitted)) => {
                self.model = Some(model);
                let elapsed = start.elapsed().as_secs_f64();
                self.metrics.training_time = Some(elapsed);
                self.record_fit_scores(&fitted, &y);
                self.record_memory_growth(memory_before);
                self.status.set(AgentStatus::Ready);
                info!(agent_id = %self.agent_id, training_time = elapsed, "Training complete");
                Ok(())
            }
            Err(e) => {
                self.fail(AgentOperation::Train, &e);
                Err(e)
            }
        }
    }

    /// Predict with the fitted model.
    pub async fn predict(&mut self, x: Arc<Matrix>) -> AgentResult<Prediction> {
        self.predict_holding(x, None).await
    }

    /// [`predict`](Self::predict) while holding `permit` until the model call
    /// returns.
    pub async fn predict_holding(&mut self, x: Arc<Matrix>, permit: Option<CallPermit>) -> AgentResult<Prediction> {
        self.expect_status(AgentStatus::Ready)?;
        let model = self.model.take().ok_or(ModelError::NotFitted)?;
        self.status.set(AgentStatus::Predicting);

        let start = Instant::now();
        let limit = self.config.timeout();
        let outcome = run_blocking(model, limit, AgentOperation::Predict, permit, move |m| {
            m.predict(&x)
        })
        .await;

        match outcome {
            Ok((model, prediction)) => {
                self.model = Some(model);
                let elapsed = start.elapsed().as_secs_f64();
                self.metrics.prediction_time = Some(elapsed);
                self.status.set(AgentStatus::Ready);
                debug!(agent_id = %self.agent_id, prediction_time = elapsed, "Prediction complete");
                Ok(prediction)
            }
            Err(e) => {
                self.fail(AgentOperation::Predict, &e);
                Err(e)
            }
        }
    }

    pub fn get_performance_metrics(&self) -> PerformanceSnapshot {
        self.metrics.snapshot()
    }

    /// Raw metrics, with unmeasured values still `None`
    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Release the model. Idempotent; the agent ends `Terminated`.
    pub fn cleanup(&mut self) {
        if self.status() == AgentStatus::Terminated {
            return;
        }
        self.model = None;
        self.status.set(AgentStatus::Terminated);
        debug!(agent_id = %self.agent_id, "Agent terminated");
    }

    fn expect_status(&self, expected: AgentStatus) -> AgentResult<()> {
        let actual = self.status();
        if actual != expected {
            return Err(AgentError::InvalidState {
                agent_id: self.agent_id.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn fail(&self, operation: AgentOperation, error: &dyn std::fmt::Display) {
        warn!(agent_id = %self.agent_id, %operation, error = %error, "Agent operation failed");
        if self.status() != AgentStatus::Terminated {
            self.status.set(AgentStatus::Error);
        }
    }

    fn record_fit_scores(&mut self, fitted: &Prediction, y: &[f64]) {
        // Only class-probability outputs are scored.
        let Some(tensor) = fitted.as_tensor().filter(|t| t.ndim() >= 2) else {
            return;
        };
        let scores = classification_scores(&labels_of(y), &tensor.argmax_rows());
        self.metrics.accuracy = Some(scores.accuracy);
        self.metrics.precision = Some(scores.precision);
        self.metrics.recall = Some(scores.recall);
        self.metrics.f1_score = Some(scores.f1);
    }

    fn record_memory_growth(&mut self, before: Option<f64>) {
        let (Some(before), Some(after)) = (before, current_process_memory_mb()) else {
            return;
        };
        let grown = (after - before).max(0.0);
        self.metrics.memory_usage_mb = Some(grown);
        if grown > self.config.max_memory_mb as f64 {
            warn!(
                agent_id = %self.agent_id,
                memory_mb = grown,
                limit_mb = self.config.max_memory_mb,
                "Training exceeded memory limit"
            );
        }
    }
}

impl std::fmt::Debug for ModelAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAgent")
            .field("agent_id", &self.agent_id)
            .field("model_type", &self.config.model_type)
            .field("status", &self.status())
            .finish()
    }
}

/// Run `f` against `model` on the blocking pool, handing the model back on
/// success. A timeout or panic loses the model.
///
/// `permit` moves into the blocking closure: a call abandoned on timeout keeps
/// its slot until it actually finishes.
async fn run_blocking<T, F>(
    mut model: Box<dyn Model>,
    limit: Duration,
    operation: AgentOperation,
    permit: Option<CallPermit>,
    f: F,
) -> AgentResult<(Box<dyn Model>, T)>
where
    F: FnOnce(&mut dyn Model) -> Result<T, ModelError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        f(model.as_mut()).map(|value| (model, value))
    });
    match tokio::time::timeout(limit, handle).await {
        Err(_) => Err(AgentError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
        Ok(Err(join_error)) => Err(AgentError::Aborted(join_error.to_string())),
        Ok(Ok(result)) => result.map_err(AgentError::from),
    }
}
