//! End-to-end ensemble benchmark tests
//!
//! Runs the executor against the builtin estimators on synthetic data and
//! checks the resulting BenchmarkResult, the published events and the
//! exported metrics.

use std::collections::BTreeMap;

use mle_ensemble::benchmark::MetricsExport;
use mle_ensemble::config::{EnsembleConfig, ModelSpec};
use mle_ensemble::ensemble::{EnsembleExecutor, VotingMethod};
use mle_ensemble::events::{BenchmarkPhase, EnsembleEvent, EventBus, EventBusExt, EventFilter};
use mle_ensemble::models::{Dataset, ModelKind};
use tokio::sync::broadcast::Receiver;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn blobs() -> Dataset {
    Dataset::make_classification(200, 5, 3, 42).unwrap()
}

fn drain(rx: &mut Receiver<EnsembleEvent>) -> Vec<EnsembleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn five_model_weighted_ensemble() {
    init_tracing();
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let config = EnsembleConfig {
        voting_strategy: VotingMethod::Weighted,
        ..Default::default()
    };
    let mut executor = EnsembleExecutor::new(config, bus);

    let result = executor.execute_ensemble_benchmark("blobs", &blobs()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.ensemble_size, 5);
    assert_eq!(result.metrics.successful_predictions, 5);
    assert_eq!(result.metrics.error_rate, 0.0);
    assert!(result.metrics.accuracy > 0.5, "accuracy {}", result.metrics.accuracy);
    assert!((0.0..=1.0).contains(&result.metrics.consensus_strength));
    assert!((0.0..=1.0).contains(&result.metrics.model_diversity));
    assert!(result.metrics.total_time >= result.metrics.init_time);
    assert_eq!(result.model_performances.len(), 5);
    assert!(result.final_output.is_some());

    let details = result.consensus_details.as_ref().unwrap();
    assert_eq!(details.strategy, VotingMethod::Weighted);
    assert_eq!(details.participating_models.len(), 5);
    assert_eq!(details.agreement_matrix.len(), 5);
    for (i, row) in details.agreement_matrix.iter().enumerate() {
        assert_eq!(row[i], 1.0);
    }
    let weight_sum: f64 = details.weights.iter().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
    assert!(details.fallback_reason.is_none());

    let sections = result.metrics.to_sections();
    let groups: Vec<&String> = sections.as_object().unwrap().keys().collect();
    assert_eq!(groups.len(), 5);

    let events = drain(&mut rx);
    let phases: Vec<BenchmarkPhase> = events
        .iter()
        .filter_map(|e| match e {
            EnsembleEvent::PhaseCompleted { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            BenchmarkPhase::Initialization,
            BenchmarkPhase::Prediction,
            BenchmarkPhase::Consensus,
            BenchmarkPhase::Analysis,
        ]
    );
    assert!(events.iter().any(|e| e.event_type() == "consensus_reached"));
    assert!(events.iter().any(|e| e.event_type() == "benchmark_completed"));
    assert_eq!(events.iter().filter(|e| e.event_type() == "agent_spawned").count(), 5);

    executor.cleanup().await.unwrap();
}

#[tokio::test]
async fn all_models_failing_reports_failure() {
    init_tracing();
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let config = EnsembleConfig {
        models: vec![
            ModelSpec::new(ModelKind::XgBoost),
            ModelSpec::new(ModelKind::LightGbm),
            ModelSpec::new(ModelKind::CatBoost),
        ],
        ..Default::default()
    };
    let mut executor = EnsembleExecutor::new(config, bus);

    let result = executor.execute_ensemble_benchmark("unavailable", &blobs()).await;

    assert!(!result.success);
    assert_eq!(result.ensemble_size, 0);
    assert_eq!(result.metrics.accuracy, 0.0);
    assert_eq!(result.metrics.successful_predictions, 0);
    assert!(result.final_output.is_none());
    assert!(result.consensus_details.is_none());
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("All models failed to initialize"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| e.event_type() == "benchmark_failed"));
    assert_eq!(events.iter().filter(|e| e.event_type() == "agent_failed").count(), 3);
    assert!(executor.coordinator().is_empty().await);
}

#[tokio::test]
async fn unknown_model_types_from_toml_are_excluded() {
    init_tracing();
    let raw = r#"
        voting_strategy = "weighted"

        [[models]]
        model_type = "quantum_annealer"

        [[models]]
        model_type = "xgboost"

        [[models]]
        model_type = "deep_forest_v9"

        [[models]]
        model_type = "lightgbm"

        [[models]]
        model_type = "catboost"
    "#;
    let config = EnsembleConfig::from_toml_str(raw).unwrap();
    assert_eq!(config.models.len(), 5);
    assert_eq!(config.models[0].model_type, ModelKind::Generic);
    assert_eq!(config.models[2].model_type, ModelKind::Generic);

    let bus = EventBus::new().shared();
    let mut failures = bus.subscribe_filtered(EventFilter::new().types(vec!["agent_failed"]));
    let mut executor = EnsembleExecutor::new(config, bus);
    let result = executor.execute_ensemble_benchmark("unknown", &blobs()).await;

    assert!(!result.success);
    assert_eq!(result.ensemble_size, 0);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("All models failed to initialize"));
    assert_eq!(failures.drain().len(), 5);
    assert!(executor.coordinator().is_empty().await);
}

#[tokio::test]
async fn untrained_stacking_falls_back_to_weighted() {
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let config = EnsembleConfig {
        voting_strategy: VotingMethod::Stacking,
        ensemble_size: 3,
        ..Default::default()
    };
    let mut executor = EnsembleExecutor::new(config, bus);

    let result = executor.execute_ensemble_benchmark("stacking", &blobs()).await;

    assert!(result.success, "{:?}", result.error_message);
    let details = result.consensus_details.unwrap();
    assert_eq!(details.strategy, VotingMethod::Stacking);
    assert!(details.fallback_reason.is_some());

    let fallback = drain(&mut rx).into_iter().find_map(|e| match e {
        EnsembleEvent::VotingFallback { strategy, .. } => Some(strategy),
        _ => None,
    });
    assert_eq!(fallback, Some(VotingMethod::Stacking));
}

#[tokio::test]
async fn targets_are_reported_without_failing_the_run() {
    let config = EnsembleConfig {
        voting_strategy: VotingMethod::Majority,
        ensemble_size: 2,
        performance_targets: BTreeMap::from([
            ("accuracy".to_string(), 0.0),
            ("total_time".to_string(), 0.0),
        ]),
        ..Default::default()
    };
    let mut executor = EnsembleExecutor::new(config, EventBus::new().shared());

    let result = executor.execute_ensemble_benchmark("targets", &blobs()).await;

    assert!(result.success);
    assert_eq!(result.target_results.len(), 2);
    let missed: Vec<&str> = result.missed_targets().map(|t| t.metric.as_str()).collect();
    assert_eq!(missed, vec!["total_time"]);
}

#[tokio::test]
async fn exported_metrics_include_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    let config = EnsembleConfig {
        voting_strategy: VotingMethod::Bayesian,
        ensemble_size: 3,
        ..Default::default()
    };
    let mut executor = EnsembleExecutor::new(config, EventBus::new().shared());

    let result = executor.execute_ensemble_benchmark("export", &blobs()).await;
    assert!(result.success);
    executor.tracker_mut().export_metrics_to_file(&path).unwrap();

    let export: MetricsExport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(export.benchmark_results.len(), 1);
    assert_eq!(export.summary.successful_benchmarks, 1);
    assert_eq!(export.models.len(), 3);
    assert!(export.models.values().all(|m| !m.training_times.is_empty()));
}
