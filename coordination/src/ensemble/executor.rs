//! Ensemble executor - end-to-end benchmark of one ensemble on one dataset
//!
//! A run moves through four timed phases:
//!
//! 1. **Initialization**: spawn every configured model concurrently and
//!    train the survivors on the training split.
//! 2. **Prediction**: predict the held-out split in parallel.
//! 3. **Consensus**: combine the successful predictions with the configured
//!    voting strategy.
//! 4. **Analysis**: metrics, targets, resource usage and per-model snapshots.
//!
//! Models that fail in any phase are dropped from later phases. A run only
//! fails when no model survives a phase, and even then the failure is
//! reported inside the [`BenchmarkResult`] rather than as an `Err`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::benchmark::{
    evaluate_targets, summarize_targets, BenchmarkResult, ConsensusDetails, PerformanceTracker, PhaseTiming,
    TrackerError,
};
use crate::config::EnsembleConfig;
use crate::events::{BenchmarkPhase, EnsembleEvent, SessionEndReason, SharedEventBus};
use crate::models::{Dataset, ModelBackend, ModelError, Prediction};

use super::consensus::agreement_matrix;
use super::coordinator::{CoordinatorError, ModelCoordinator, SharedModelCoordinator};
use super::voting::{build_strategy, class_agreement, VotingError, VotingMethod, VotingStrategy, WeightedVoting};

/// Error type for a benchmark run
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Invalid dataset: {0}")]
    Dataset(#[from] ModelError),

    #[error("All models failed to initialize")]
    AllInitializationFailed,

    #[error("All models failed to predict")]
    AllPredictionsFailed,

    #[error("Consensus failed: {0}")]
    Voting(#[from] VotingError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Runs ensemble benchmarks against a coordinator and a tracker
pub struct EnsembleExecutor {
    config: EnsembleConfig,
    coordinator: SharedModelCoordinator,
    tracker: PerformanceTracker,
    event_bus: SharedEventBus,
    strategy: Option<Box<dyn VotingStrategy>>,
}

impl EnsembleExecutor {
    /// Executor over the builtin estimators
    pub fn new(config: EnsembleConfig, event_bus: SharedEventBus) -> Self {
        let coordinator = ModelCoordinator::new(config.coordinator_config(), event_bus.clone()).shared();
        Self::with_coordinator(config, event_bus, coordinator)
    }

    /// Executor over a custom model backend
    pub fn with_backend(config: EnsembleConfig, event_bus: SharedEventBus, backend: Arc<dyn ModelBackend>) -> Self {
        let coordinator =
            ModelCoordinator::with_backend(config.coordinator_config(), event_bus.clone(), backend).shared();
        Self::with_coordinator(config, event_bus, coordinator)
    }

    pub fn with_coordinator(
        config: EnsembleConfig,
        event_bus: SharedEventBus,
        coordinator: SharedModelCoordinator,
    ) -> Self {
        Self {
            tracker: PerformanceTracker::new(event_bus.clone()),
            config,
            coordinator,
            event_bus,
            strategy: None,
        }
    }

    /// Vote with `strategy` instead of one built from the configured name,
    /// e.g. a stacking ensemble with a trained meta-model.
    pub fn with_voting_strategy(mut self, strategy: Box<dyn VotingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SharedModelCoordinator {
        &self.coordinator
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PerformanceTracker {
        &mut self.tracker
    }

    /// Run one benchmark. Never returns an error: failures come back as a
    /// result with `success == false`.
    pub async fn execute_ensemble_benchmark(&mut self, task_name: &str, dataset: &Dataset) -> BenchmarkResult {
        let start = Instant::now();
        info!(
            task_name,
            samples = dataset.n_samples(),
            models = self.config.model_count(),
            strategy = %self.config.voting_strategy,
            "Starting ensemble benchmark"
        );

        let owns_session = !self.tracker.is_active();
        if owns_session {
            if let Err(e) = self.tracker.start_tracking_session() {
                warn!(task_name, error = %e, "Could not start tracking session");
            }
        }

        let outcome = self.run_phases(task_name, dataset, start).await;
        let result = match outcome {
            Ok(result) => {
                self.event_bus.publish(EnsembleEvent::BenchmarkCompleted {
                    task_name: task_name.to_string(),
                    ensemble_size: result.ensemble_size as u32,
                    execution_time_ms: (result.execution_time * 1000.0) as u64,
                    timestamp: Utc::now(),
                });
                info!(
                    task_name,
                    execution_time = result.execution_time,
                    accuracy = result.metrics.accuracy,
                    consensus_strength = result.metrics.consensus_strength,
                    "Ensemble benchmark complete"
                );
                result
            }
            Err(e) => {
                error!(task_name, error = %e, "Ensemble benchmark failed");
                self.event_bus.publish(EnsembleEvent::BenchmarkFailed {
                    task_name: task_name.to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                BenchmarkResult::failed(task_name, start.elapsed().as_secs_f64(), e.to_string())
            }
        };

        if owns_session && self.tracker.is_active() {
            let reason = if result.success {
                SessionEndReason::Completed
            } else {
                SessionEndReason::Error(result.error_message.clone().unwrap_or_default())
            };
            if let Err(e) = self.tracker.end_tracking_session(reason).await {
                warn!(task_name, error = %e, "Could not end tracking session");
            }
        }

        self.tracker.save_benchmark_result(result.clone());
        result
    }

    async fn run_phases(&mut self, task_name: &str, dataset: &Dataset, start: Instant) -> ExecutorResult<BenchmarkResult> {
        // Agents from a previous run would collide on id.
        if !self.coordinator.is_empty().await {
            self.coordinator.cleanup().await?;
        }

        let (train, test) = dataset.train_test_split(self.config.test_fraction, self.config.seed)?;
        let mut timing = PhaseTiming::default();

        // Phase 1: Initialization
        let phase_start = Instant::now();
        let ensemble_size = self.spawn_models().await?;
        let training_start = Instant::now();
        let trained = self
            .coordinator
            .train_agents_parallel(Arc::new(train.features().clone()), Arc::new(train.targets().to_vec()))
            .await;
        timing.training_time = training_start.elapsed().as_secs_f64();
        for (id, ok) in &trained {
            if !ok {
                self.tracker.record_model_error(id, "training failed");
            }
        }
        if !trained.values().any(|ok| *ok) {
            return Err(ExecutorError::AllInitializationFailed);
        }
        timing.init_time = phase_start.elapsed().as_secs_f64();
        self.phase_completed(task_name, BenchmarkPhase::Initialization, timing.init_time);

        // Phase 2: Prediction
        let phase_start = Instant::now();
        let mut outputs: Vec<(String, Prediction)> = self
            .coordinator
            .predict_agents_parallel(Arc::new(test.features().clone()))
            .await
            .into_iter()
            .filter_map(|(id, prediction)| match prediction {
                Some(p) => Some((id, p)),
                None => {
                    if trained.get(&id).copied().unwrap_or(false) {
                        self.tracker.record_model_error(&id, "prediction failed");
                    }
                    None
                }
            })
            .collect();
        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        if outputs.is_empty() {
            return Err(ExecutorError::AllPredictionsFailed);
        }
        timing.prediction_time = phase_start.elapsed().as_secs_f64();
        self.phase_completed(task_name, BenchmarkPhase::Prediction, timing.prediction_time);

        let performances = self.coordinator.get_agent_performances().await;
        for (id, prediction) in &outputs {
            if let Some(perf) = performances.get(id) {
                self.tracker.record_training_time(id, perf.training_time);
                self.tracker.record_prediction_time(id, perf.prediction_time);
                self.tracker.record_model_accuracy(id, perf.accuracy);
            }
            self.tracker.record_prediction_confidence(id, prediction.confidence());
        }

        // Phase 3: Consensus
        let phase_start = Instant::now();
        let (ids, predictions): (Vec<String>, Vec<Prediction>) = outputs.into_iter().unzip();
        let scores: Vec<f64> = ids
            .iter()
            .map(|id| performances.get(id).map(|p| p.accuracy).unwrap_or(0.0))
            .collect();
        let configured;
        let strategy: &dyn VotingStrategy = match &self.strategy {
            Some(custom) => custom.as_ref(),
            None => {
                configured = configured_strategy(self.config.voting_strategy, scores);
                configured.as_ref()
            }
        };
        let vote = strategy.vote_with_details(&predictions)?;
        if let Some(reason) = &vote.fallback_reason {
            self.event_bus.publish(EnsembleEvent::VotingFallback {
                strategy: strategy.method(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
        }

        let below_threshold = vote.consensus_strength < self.config.consensus_threshold;
        if below_threshold {
            warn!(
                task_name,
                consensus_strength = vote.consensus_strength,
                threshold = self.config.consensus_threshold,
                "Consensus below threshold"
            );
        }
        let consensus = ConsensusDetails {
            strategy: strategy.method(),
            consensus_strength: vote.consensus_strength,
            agreement_matrix: agreement_matrix(&predictions),
            class_agreement: class_agreement(&vote.prediction, &predictions),
            confidence_scores: predictions.iter().map(Prediction::confidence).collect(),
            weights: vote.weights.clone(),
            participating_models: ids.clone(),
            below_threshold,
            fallback_reason: vote.fallback_reason.clone(),
        };
        self.event_bus.publish(EnsembleEvent::ConsensusReached {
            task_name: task_name.to_string(),
            strategy: strategy.method(),
            consensus_strength: vote.consensus_strength,
            participating_models: ids.clone(),
            timestamp: Utc::now(),
        });
        timing.consensus_time = phase_start.elapsed().as_secs_f64();
        self.phase_completed(task_name, BenchmarkPhase::Consensus, timing.consensus_time);

        // Phase 4: Analysis
        let phase_start = Instant::now();
        timing.total_time = start.elapsed().as_secs_f64();
        let metrics = self.tracker.calculate_ensemble_metrics(
            &predictions,
            &vote.prediction,
            &timing,
            Some(test.targets()),
            ensemble_size,
        );

        let target_results = evaluate_targets(&metrics, &self.config.performance_targets);
        if target_results.iter().any(|t| !t.met) {
            warn!(task_name, "Performance targets missed:\n{}", summarize_targets(&target_results));
        }

        let resource_usage = self.tracker.resource_usage();
        let model_performances: BTreeMap<_, _> = performances.into_iter().collect();
        self.phase_completed(task_name, BenchmarkPhase::Analysis, phase_start.elapsed().as_secs_f64());

        Ok(BenchmarkResult {
            task_name: task_name.to_string(),
            ensemble_size,
            metrics,
            final_output: Some(vote.prediction),
            execution_time: start.elapsed().as_secs_f64(),
            model_performances,
            consensus_details: Some(consensus),
            resource_usage,
            target_results,
            success: true,
            error_message: None,
            timestamp: Utc::now(),
        })
    }

    /// Spawn every configured model concurrently. Returns how many agents
    /// initialized, which is the ensemble size.
    async fn spawn_models(&mut self) -> ExecutorResult<usize> {
        let models = self.config.resolved_models();
        for (id, config) in &models {
            self.tracker.register_model(id.clone(), config.model_type);
        }

        let coordinator = &self.coordinator;
        let spawns = models.iter().map(|(id, config)| async move {
            (id, coordinator.spawn_agent_with_config(id, config.clone()).await)
        });
        let mut spawned = 0;
        for (id, outcome) in futures::future::join_all(spawns).await {
            match outcome {
                Ok(_) => spawned += 1,
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "Model excluded from ensemble");
                    self.tracker.record_model_error(id, e.to_string());
                }
            }
        }
        debug!(spawned, configured = models.len(), "Models spawned");

        if spawned == 0 {
            return Err(ExecutorError::AllInitializationFailed);
        }
        Ok(spawned)
    }

    fn phase_completed(&self, task_name: &str, phase: BenchmarkPhase, seconds: f64) {
        debug!(task_name, %phase, seconds, "Phase completed");
        self.event_bus.publish(EnsembleEvent::PhaseCompleted {
            task_name: task_name.to_string(),
            phase,
            duration_ms: (seconds * 1000.0) as u64,
            timestamp: Utc::now(),
        });
    }

    /// Release every agent and close any open tracking session.
    pub async fn cleanup(&mut self) -> ExecutorResult<usize> {
        let released = self.coordinator.cleanup().await?;
        if self.tracker.is_active() {
            self.tracker.end_tracking_session(SessionEndReason::Cancelled).await?;
        }
        info!(released, "Executor cleaned up");
        Ok(released)
    }
}

/// Weighted voting is driven by each model's training accuracy.
fn configured_strategy(method: VotingMethod, scores: Vec<f64>) -> Box<dyn VotingStrategy> {
    match method {
        VotingMethod::Weighted => Box::new(WeightedVoting::by_performance(scores)),
        method => build_strategy(method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSpec;
    use crate::events::EventBus;
    use crate::models::ModelKind;

    fn dataset() -> Dataset {
        Dataset::make_classification(80, 5, 3, 11).unwrap()
    }

    #[tokio::test]
    async fn test_single_model_run() {
        let config = EnsembleConfig {
            models: vec![ModelSpec::new(ModelKind::LogisticRegression)],
            voting_strategy: VotingMethod::Majority,
            ..Default::default()
        };
        let mut executor = EnsembleExecutor::new(config, EventBus::new().shared());
        let result = executor.execute_ensemble_benchmark("single", &dataset()).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.ensemble_size, 1);
        let details = result.consensus_details.unwrap();
        assert_eq!(details.agreement_matrix, vec![vec![1.0]]);
        assert_eq!(details.consensus_strength, 1.0);
        assert!(!details.below_threshold);
        assert_eq!(result.metrics.model_diversity, 0.0);
    }

    #[tokio::test]
    async fn test_rerun_replaces_agents() {
        let config = EnsembleConfig {
            ensemble_size: 2,
            ..Default::default()
        };
        let mut executor = EnsembleExecutor::new(config, EventBus::new().shared());
        let data = dataset();
        assert!(executor.execute_ensemble_benchmark("first", &data).await.success);
        assert!(executor.execute_ensemble_benchmark("second", &data).await.success);
        assert_eq!(executor.tracker().benchmark_results().len(), 2);

        assert_eq!(executor.cleanup().await.unwrap(), 2);
        assert!(executor.coordinator().is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_models_are_excluded() {
        let config = EnsembleConfig {
            models: vec![
                ModelSpec::new(ModelKind::XgBoost),
                ModelSpec::new(ModelKind::Svm),
            ],
            ..Default::default()
        };
        let mut executor = EnsembleExecutor::new(config, EventBus::new().shared());
        let result = executor.execute_ensemble_benchmark("partial", &dataset()).await;

        assert!(result.success);
        assert_eq!(result.ensemble_size, 1);
        assert_eq!(result.metrics.ensemble_size, 1);
        assert_eq!(result.metrics.successful_predictions, 1);
        assert_eq!(result.metrics.error_rate, 0.0);
        assert_eq!(executor.coordinator().len().await, 1);
        assert_eq!(result.consensus_details.unwrap().participating_models, vec!["svm_1"]);
        let record = executor.tracker().model_record("xgboost_0").unwrap();
        assert_eq!(record.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_dataset_is_reported() {
        let tiny = Dataset::new(vec![vec![1.0, 2.0]], vec![0.0]).unwrap();
        let mut executor = EnsembleExecutor::new(EnsembleConfig::default(), EventBus::new().shared());
        let result = executor.execute_ensemble_benchmark("tiny", &tiny).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Invalid dataset"));
    }
}
