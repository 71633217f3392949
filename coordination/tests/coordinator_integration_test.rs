//! Integration tests for the ModelCoordinator
//!
//! Drives the coordinator with an instrumented backend that records how many
//! model calls run at once, can slow fits down, and can be told to fail
//! individual agents.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mle_ensemble::ensemble::{AgentStatus, CoordinatorConfig, ModelCoordinator};
use mle_ensemble::events::{AgentOperation, EnsembleEvent, EventBus};
use mle_ensemble::models::{
    Hyperparameters, Matrix, Model, ModelBackend, ModelError, ModelKind, ModelResult, Prediction, Tensor,
};

/// Tracks concurrent and peak model calls
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GaugedModel {
    gauge: Arc<Gauge>,
    fit_millis: u64,
    fail_predict: bool,
}

impl Model for GaugedModel {
    fn name(&self) -> &'static str {
        "gauged"
    }

    fn fit(&mut self, _x: &[Vec<f64>], _y: &[f64]) -> ModelResult<()> {
        self.gauge.enter();
        std::thread::sleep(Duration::from_millis(self.fit_millis));
        self.gauge.exit();
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> ModelResult<Prediction> {
        self.gauge.enter();
        std::thread::sleep(Duration::from_millis(25));
        self.gauge.exit();
        if self.fail_predict {
            return Err(ModelError::InvalidInput("told to fail".to_string()));
        }
        let rows: Vec<Vec<f64>> = x
            .iter()
            .map(|row| if row[0] >= 0.0 { vec![0.9, 0.1] } else { vec![0.2, 0.8] })
            .collect();
        Ok(Prediction::tensor(Tensor::from_rows(&rows)?))
    }
}

struct GaugedBackend {
    gauge: Arc<Gauge>,
}

impl ModelBackend for GaugedBackend {
    fn build(&self, _kind: ModelKind, hp: &Hyperparameters) -> ModelResult<Box<dyn Model>> {
        Ok(Box::new(GaugedModel {
            gauge: self.gauge.clone(),
            fit_millis: hp.get("fit_millis").and_then(|v| v.as_u64()).unwrap_or(25),
            fail_predict: hp.get("fail_predict") == Some(&serde_json::json!(true)),
        }))
    }
}

fn gauged_coordinator(max_parallel: usize) -> (ModelCoordinator, Arc<Gauge>, Arc<EventBus>) {
    gauged_coordinator_with(CoordinatorConfig {
        max_parallel,
        ..Default::default()
    })
}

fn gauged_coordinator_with(config: CoordinatorConfig) -> (ModelCoordinator, Arc<Gauge>, Arc<EventBus>) {
    let gauge = Arc::new(Gauge::default());
    let bus = EventBus::new().shared();
    let coordinator = ModelCoordinator::with_backend(
        config,
        bus.clone(),
        Arc::new(GaugedBackend { gauge: gauge.clone() }),
    );
    (coordinator, gauge, bus)
}

fn data() -> (Arc<Matrix>, Arc<Vec<f64>>) {
    let x: Matrix = (0..12).map(|i| vec![i as f64 - 6.0, 1.0]).collect();
    let y: Vec<f64> = x.iter().map(|row| if row[0] >= 0.0 { 0.0 } else { 1.0 }).collect();
    (Arc::new(x), Arc::new(y))
}

async fn spawn(coordinator: &ModelCoordinator, id: &str, fail_predict: bool) {
    let mut hp = Hyperparameters::new();
    if fail_predict {
        hp.insert("fail_predict".to_string(), serde_json::json!(true));
    }
    coordinator
        .spawn_agent(id, ModelKind::LinearRegression, BTreeSet::new(), hp, false)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_max_parallel() {
    let (coordinator, gauge, _bus) = gauged_coordinator(3);
    for i in 0..8 {
        spawn(&coordinator, &format!("agent-{}", i), false).await;
    }
    let (x, y) = data();

    let trained = coordinator.train_agents_parallel(x.clone(), y).await;
    assert_eq!(trained.len(), 8);
    assert!(trained.values().all(|ok| *ok));

    let predictions = coordinator.predict_agents_parallel(x).await;
    assert!(predictions.values().all(Option::is_some));

    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_permit_serializes_calls() {
    let (coordinator, gauge, _bus) = gauged_coordinator(1);
    for i in 0..4 {
        spawn(&coordinator, &format!("agent-{}", i), false).await;
    }
    let (x, y) = data();
    coordinator.train_agents_parallel(x, y).await;
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_fits_still_count_against_max_parallel() {
    let (coordinator, gauge, _bus) = gauged_coordinator_with(CoordinatorConfig {
        max_parallel: 1,
        timeout_seconds: 1,
        retry_attempts: 0,
        ..Default::default()
    });
    for i in 0..3 {
        let mut hp = Hyperparameters::new();
        hp.insert("fit_millis".to_string(), serde_json::json!(1500));
        coordinator
            .spawn_agent(&format!("slow-{}", i), ModelKind::LinearRegression, BTreeSet::new(), hp, false)
            .await
            .unwrap();
    }
    let (x, y) = data();

    let trained = coordinator.train_agents_parallel(x, y).await;
    assert!(trained.values().all(|ok| !*ok));

    // let the last abandoned fit finish
    tokio::time::sleep(Duration::from_millis(1700)).await;
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_agent_does_not_affect_siblings() {
    let (coordinator, _gauge, bus) = gauged_coordinator(4);
    let mut rx = bus.subscribe();
    spawn(&coordinator, "good-a", false).await;
    spawn(&coordinator, "flaky", true).await;
    spawn(&coordinator, "good-b", false).await;
    let (x, y) = data();

    coordinator.train_agents_parallel(x.clone(), y).await;
    let predictions = coordinator.predict_agents_parallel(x).await;

    assert!(predictions["good-a"].is_some());
    assert!(predictions["good-b"].is_some());
    assert!(predictions["flaky"].is_none());

    let statuses = coordinator.get_agent_statuses().await;
    assert_eq!(statuses["good-a"], AgentStatus::Ready);
    assert_eq!(statuses["good-b"], AgentStatus::Ready);
    assert_eq!(statuses["flaky"], AgentStatus::Error);

    let performances = coordinator.get_agent_performances().await;
    assert_eq!(performances["good-a"].accuracy, 1.0);

    let mut predict_failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EnsembleEvent::AgentFailed {
            agent_id,
            operation: AgentOperation::Predict,
            ..
        } = event
        {
            predict_failures.push(agent_id);
        }
    }
    assert_eq!(predict_failures, vec!["flaky".to_string()]);
}

#[tokio::test]
async fn cleanup_terminates_all_agents() {
    let (coordinator, _gauge, _bus) = gauged_coordinator(2);
    spawn(&coordinator, "a", false).await;
    spawn(&coordinator, "b", true).await;

    assert_eq!(coordinator.cleanup().await.unwrap(), 2);
    assert!(coordinator.is_empty().await);
    assert_eq!(coordinator.cleanup().await.unwrap(), 0);
}
