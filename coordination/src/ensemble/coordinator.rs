//! Model coordinator - bounded parallel fan-out over model agents
//!
//! The coordinator owns a registry of [`ModelAgent`]s and runs train/predict
//! across them concurrently, gated by a semaphore of `max_parallel` permits.
//! A failing or panicking agent records a failure without affecting its
//! siblings.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::events::{AgentOperation, EnsembleEvent, SharedEventBus};
use crate::models::{BuiltinBackend, Hyperparameters, Matrix, ModelBackend, ModelKind, Prediction};

use super::agent::{
    AgentError, AgentResult, AgentStatus, CallPermit, ModelAgent, ModelConfig, PerformanceSnapshot, StatusCell,
};

/// Error type for coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent {agent_id} failed to initialize: {source}")]
    InitializationFailed {
        agent_id: String,
        #[source]
        source: AgentError,
    },

    #[error("Coordinator is busy with {0} in-flight operation(s)")]
    Busy(usize),
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Shared reference to ModelCoordinator
pub type SharedModelCoordinator = Arc<ModelCoordinator>;

/// Configuration for the model coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum agents running a model call at once
    pub max_parallel: usize,
    /// Per-call timeout applied to agents spawned by id and kind
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub max_memory_mb: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let defaults = ModelConfig::default();
        Self {
            max_parallel: 4,
            timeout_seconds: defaults.timeout_seconds,
            retry_attempts: defaults.retry_attempts,
            max_memory_mb: defaults.max_memory_mb,
        }
    }
}

/// Public description of a registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub model_type: ModelKind,
    pub capabilities: BTreeSet<String>,
    pub gpu_enabled: bool,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

/// One registry entry. Status is readable without the agent lock.
struct AgentSlot {
    status: Arc<StatusCell>,
    agent: Mutex<ModelAgent>,
}

/// Work item fanned out to every agent
#[derive(Clone)]
enum Job {
    Train(Arc<Matrix>, Arc<Vec<f64>>),
    Predict(Arc<Matrix>),
}

impl Job {
    fn operation(&self) -> AgentOperation {
        match self {
            Job::Train(..) => AgentOperation::Train,
            Job::Predict(_) => AgentOperation::Predict,
        }
    }

    async fn run(self, agent: &mut ModelAgent, permit: CallPermit) -> AgentResult<Option<Prediction>> {
        match self {
            Job::Train(x, y) => agent.train_holding(x, y, Some(permit)).await.map(|_| None),
            Job::Predict(x) => agent.predict_holding(x, Some(permit)).await.map(Some),
        }
    }
}

/// Decrements the in-flight counter when a fan-out ends, even on panic.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns model agents and runs them in parallel under a concurrency cap
pub struct ModelCoordinator {
    config: CoordinatorConfig,
    backend: Arc<dyn ModelBackend>,
    event_bus: SharedEventBus,
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
}

impl ModelCoordinator {
    /// Create a coordinator backed by the builtin estimators
    pub fn new(config: CoordinatorConfig, event_bus: SharedEventBus) -> Self {
        Self::with_backend(config, event_bus, Arc::new(BuiltinBackend))
    }

    /// Create a coordinator with a custom model backend
    pub fn with_backend(
        config: CoordinatorConfig,
        event_bus: SharedEventBus,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let permits = config.max_parallel.max(1);
        Self {
            config,
            backend,
            event_bus,
            agents: RwLock::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(permits)),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a shared reference to this coordinator
    pub fn shared(self) -> SharedModelCoordinator {
        Arc::new(self)
    }

    pub fn max_parallel(&self) -> usize {
        self.config.max_parallel.max(1)
    }

    // =========================================================================
    // Agent Registry
    // =========================================================================

    /// Create, initialize and register an agent using the coordinator's
    /// timeout, retry and memory defaults.
    pub async fn spawn_agent(
        &self,
        agent_id: &str,
        model_type: ModelKind,
        capabilities: BTreeSet<String>,
        hyperparameters: Hyperparameters,
        gpu_enabled: bool,
    ) -> CoordinatorResult<AgentInfo> {
        let config = ModelConfig {
            model_type,
            hyperparameters,
            capabilities,
            gpu_enabled,
            max_memory_mb: self.config.max_memory_mb,
            timeout_seconds: self.config.timeout_seconds,
            retry_attempts: self.config.retry_attempts,
        };
        self.spawn_agent_with_config(agent_id, config).await
    }

    /// Create, initialize and register an agent from a full config.
    ///
    /// An agent that fails to initialize is not registered.
    pub async fn spawn_agent_with_config(
        &self,
        agent_id: &str,
        config: ModelConfig,
    ) -> CoordinatorResult<AgentInfo> {
        self.ensure_idle()?;

        let mut agents = self.agents.write().await;
        if agents.contains_key(agent_id) {
            return Err(CoordinatorError::DuplicateAgent(agent_id.to_string()));
        }

        let mut agent = ModelAgent::new(agent_id, config, self.backend.clone());
        if let Err(e) = agent.initialize() {
            self.event_bus.publish(EnsembleEvent::AgentFailed {
                agent_id: agent_id.to_string(),
                operation: AgentOperation::Initialize,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            return Err(CoordinatorError::InitializationFailed {
                agent_id: agent_id.to_string(),
                source: e,
            });
        }

        let info = AgentInfo {
            agent_id: agent_id.to_string(),
            model_type: agent.config().model_type,
            capabilities: agent.config().capabilities.clone(),
            gpu_enabled: agent.config().gpu_enabled,
            status: agent.status(),
            created_at: Utc::now(),
        };
        let slot = AgentSlot {
            status: agent.status_handle(),
            agent: Mutex::new(agent),
        };
        agents.insert(agent_id.to_string(), Arc::new(slot));

        self.event_bus.publish(EnsembleEvent::AgentSpawned {
            agent_id: info.agent_id.clone(),
            model_type: info.model_type,
            timestamp: info.created_at,
        });
        info!(agent_id, model_type = %info.model_type, "Agent spawned");

        Ok(info)
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Current status of every agent. Never waits on a running model call.
    pub async fn get_agent_statuses(&self) -> HashMap<String, AgentStatus> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.status.get()))
            .collect()
    }

    /// Performance snapshot of every agent.
    pub async fn get_agent_performances(&self) -> HashMap<String, PerformanceSnapshot> {
        let slots = self.snapshot_slots().await;
        let mut performances = HashMap::with_capacity(slots.len());
        for (id, slot) in slots {
            let agent = slot.agent.lock().await;
            performances.insert(id, agent.get_performance_metrics());
        }
        performances
    }

    // =========================================================================
    // Parallel Execution
    // =========================================================================

    /// Train every agent on `(x, y)`; `true` per agent that succeeded.
    pub async fn train_agents_parallel(
        &self,
        x: Arc<Matrix>,
        y: Arc<Vec<f64>>,
    ) -> HashMap<String, bool> {
        self.fan_out(Job::Train(x, y))
            .await
            .into_iter()
            .map(|(id, result)| (id, result.is_ok()))
            .collect()
    }

    /// Predict with every agent; `None` per agent that failed.
    pub async fn predict_agents_parallel(&self, x: Arc<Matrix>) -> HashMap<String, Option<Prediction>> {
        self.fan_out(Job::Predict(x))
            .await
            .into_iter()
            .map(|(id, result)| (id, result.ok().flatten()))
            .collect()
    }

    async fn fan_out(&self, job: Job) -> HashMap<String, AgentResult<Option<Prediction>>> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let operation = job.operation();
        let start = Instant::now();
        let slots = self.snapshot_slots().await;

        // Tasks that never report back (panic, abort) keep this default.
        let mut results: HashMap<String, AgentResult<Option<Prediction>>> = slots
            .iter()
            .map(|(id, _)| {
                (
                    id.clone(),
                    Err(AgentError::Aborted(format!("{} task did not complete", operation))),
                )
            })
            .collect();

        let mut join_set: JoinSet<(String, AgentResult<Option<Prediction>>)> = JoinSet::new();
        for (id, slot) in slots {
            let sem = self.semaphore.clone();
            let job = job.clone();
            join_set.spawn(async move {
                let permit = match sem.acquire_owned().await {
                    Ok(permit) => Arc::new(permit),
                    Err(_) => return (id, Err(AgentError::Aborted("semaphore closed".to_string()))),
                };
                let mut agent = slot.agent.lock().await;
                let result = job.run(&mut agent, permit).await;
                (id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    debug!(agent_id = %id, %operation, ok = result.is_ok(), "Agent task finished");
                    results.insert(id, result);
                }
                Err(e) => warn!(%operation, error = %e, "Agent task panicked"),
            }
        }

        let mut failed = 0u32;
        for (id, result) in &results {
            if let Err(e) = result {
                failed += 1;
                self.event_bus.publish(EnsembleEvent::AgentFailed {
                    agent_id: id.clone(),
                    operation,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        let succeeded = results.len() as u32 - failed;
        let duration_ms = start.elapsed().as_millis() as u64;
        self.event_bus.publish(EnsembleEvent::FanOutCompleted {
            operation,
            succeeded,
            failed,
            duration_ms,
            timestamp: Utc::now(),
        });
        info!(%operation, succeeded, failed, duration_ms, "Parallel {} complete", operation);

        results
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Terminate every agent concurrently and clear the registry.
    ///
    /// Returns the number of agents cleaned up.
    pub async fn cleanup(&self) -> CoordinatorResult<usize> {
        self.ensure_idle()?;

        let slots: Vec<(String, Arc<AgentSlot>)> = self.agents.write().await.drain().collect();
        let count = slots.len();

        let cleanups = slots.into_iter().map(|(id, slot)| async move {
            slot.agent.lock().await.cleanup();
            id
        });
        for id in futures::future::join_all(cleanups).await {
            self.event_bus.publish(EnsembleEvent::AgentTerminated {
                agent_id: id,
                timestamp: Utc::now(),
            });
        }

        info!(agents = count, "Coordinator cleaned up");
        Ok(count)
    }

    fn ensure_idle(&self) -> CoordinatorResult<()> {
        match self.in_flight.load(Ordering::SeqCst) {
            0 => Ok(()),
            n => Err(CoordinatorError::Busy(n)),
        }
    }

    async fn snapshot_slots(&self) -> Vec<(String, Arc<AgentSlot>)> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }
}
