//! Session-scoped performance tracking
//!
//! A [`PerformanceTracker`] records per-model timings, accuracies, errors and
//! confidences, keeps the results of finished benchmarks, and while a session
//! is open runs a background task that samples process and system resources.
//!
//! The sampler is the only producer of [`ResourceSample`]s. It hands them over
//! an unbounded channel which the tracker drains whenever it needs the history,
//! so no lock is shared between the two.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EnsembleEvent, SessionEndReason, SharedEventBus};
use crate::models::{ModelKind, Prediction};
use crate::perf_control::RetryPolicy;

use super::metrics::{assemble_metrics, BenchmarkResult, EnsembleMetrics, PhaseTiming, ResourceUsage};
use super::resources::{ResourceProbe, ResourceSample, SystemProbe};
use super::targets::MetricDirection;

/// Default interval between resource samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Error type for tracker operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracking session {0} is already active")]
    SessionActive(String),

    #[error("No tracking session is active")]
    NoSession,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

// ============================================================================
// Records
// ============================================================================

/// Everything recorded for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub model_type: ModelKind,
    pub registered_at: DateTime<Utc>,
    /// Seconds per training run
    pub training_times: Vec<f64>,
    /// Seconds per prediction call
    pub prediction_times: Vec<f64>,
    pub accuracies: Vec<f64>,
    pub confidences: Vec<f64>,
    pub errors: Vec<String>,
}

impl ModelRecord {
    fn new(model_id: String, model_type: ModelKind) -> Self {
        Self {
            model_id,
            model_type,
            registered_at: Utc::now(),
            training_times: Vec::new(),
            prediction_times: Vec::new(),
            accuracies: Vec::new(),
            confidences: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Aggregate value for `metric`, if anything was recorded for it.
    ///
    /// Accuracy reports the most recent measurement; timings and confidence
    /// report means.
    pub fn metric(&self, metric: &str) -> Option<f64> {
        match metric {
            "accuracy" => self.accuracies.last().copied(),
            "training_time" => mean(&self.training_times),
            "prediction_time" => mean(&self.prediction_times),
            "confidence" | "prediction_confidence" => mean(&self.confidences),
            "error_count" => Some(self.errors.len() as f64),
            _ => None,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Aggregated view of the current or last session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub session_id: Option<String>,
    pub session_active: bool,
    /// Seconds since the session started
    pub session_duration: f64,
    pub models_tracked: usize,
    pub benchmarks_run: usize,
    pub successful_benchmarks: usize,
    pub mean_accuracy: Option<f64>,
    /// Seconds, over successful benchmarks
    pub mean_execution_time: Option<f64>,
    pub total_model_errors: usize,
    /// Best models by accuracy
    pub top_models: Vec<(String, f64)>,
    pub resource_usage: ResourceUsage,
}

/// Everything written by [`PerformanceTracker::export_metrics_to_file`]
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsExport {
    pub exported_at: DateTime<Utc>,
    pub summary: PerformanceSummary,
    pub models: BTreeMap<String, ModelRecord>,
    pub benchmark_results: Vec<BenchmarkResult>,
    pub resource_samples: Vec<ResourceSample>,
}

struct Session {
    id: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    sampler: Option<JoinHandle<()>>,
}

// ============================================================================
// Tracker
// ============================================================================

pub struct PerformanceTracker {
    bus: SharedEventBus,
    sample_interval: Duration,
    session: Option<Session>,
    last_session: Option<(String, DateTime<Utc>, DateTime<Utc>)>,
    models: BTreeMap<String, ModelRecord>,
    results: Vec<BenchmarkResult>,
    samples: Vec<ResourceSample>,
    sample_rx: Option<mpsc::UnboundedReceiver<ResourceSample>>,
}

impl PerformanceTracker {
    pub fn new(bus: SharedEventBus) -> Self {
        Self {
            bus,
            sample_interval: SAMPLE_INTERVAL,
            session: None,
            last_session: None,
            models: BTreeMap::new(),
            results: Vec::new(),
            samples: Vec::new(),
            sample_rx: None,
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// Open a session sampling the current process through `sysinfo`.
    ///
    /// If the platform cannot be probed the session still opens, without
    /// resource samples.
    pub fn start_tracking_session(&mut self) -> TrackerResult<String> {
        if let Some(session) = &self.session {
            return Err(TrackerError::SessionActive(session.id.clone()));
        }
        let probe = match SystemProbe::new() {
            Ok(probe) => Some(Box::new(probe) as Box<dyn ResourceProbe>),
            Err(e) => {
                warn!(error = %e, "Resource sampling disabled");
                None
            }
        };
        self.start_session(probe)
    }

    /// Open a session sampling through `probe`.
    pub fn start_tracking_session_with_probe(&mut self, probe: Box<dyn ResourceProbe>) -> TrackerResult<String> {
        self.start_session(Some(probe))
    }

    fn start_session(&mut self, probe: Option<Box<dyn ResourceProbe>>) -> TrackerResult<String> {
        if let Some(session) = &self.session {
            return Err(TrackerError::SessionActive(session.id.clone()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.samples.clear();

        let sampler = probe.map(|probe| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sample_rx = Some(rx);
            tokio::spawn(run_sampler(
                probe,
                self.sample_interval,
                tx,
                cancel.clone(),
                self.bus.clone(),
                id.clone(),
            ))
        });

        info!(session_id = %id, sampling = sampler.is_some(), "Tracking session started");
        self.bus.publish(EnsembleEvent::SessionStarted {
            session_id: id.clone(),
            timestamp: Utc::now(),
        });
        self.session = Some(Session {
            id: id.clone(),
            started_at: Utc::now(),
            cancel,
            sampler,
        });
        Ok(id)
    }

    /// Close the session, stop the sampler and summarise.
    pub async fn end_tracking_session(&mut self, reason: SessionEndReason) -> TrackerResult<PerformanceSummary> {
        let mut session = self.session.take().ok_or(TrackerError::NoSession)?;
        session.cancel.cancel();
        if let Some(handle) = session.sampler.take() {
            if let Err(e) = handle.await {
                warn!(session_id = %session.id, error = %e, "Resource sampler did not shut down cleanly");
            }
        }
        self.drain_samples();
        self.sample_rx = None;

        let ended_at = Utc::now();
        self.last_session = Some((session.id.clone(), session.started_at, ended_at));

        info!(
            session_id = %session.id,
            reason = %reason,
            models = self.models.len(),
            samples = self.samples.len(),
            "Tracking session ended"
        );
        self.bus.publish(EnsembleEvent::SessionEnded {
            session_id: session.id,
            reason,
            models_tracked: self.models.len() as u32,
            timestamp: ended_at,
        });
        Ok(self.get_performance_summary())
    }

    fn drain_samples(&mut self) {
        if let Some(rx) = self.sample_rx.as_mut() {
            while let Ok(sample) = rx.try_recv() {
                self.samples.push(sample);
            }
        }
    }

    /// Samples collected so far in this (or the last) session
    pub fn resource_samples(&mut self) -> &[ResourceSample] {
        self.drain_samples();
        &self.samples
    }

    /// Mean and peak usage over the collected samples
    pub fn resource_usage(&mut self) -> ResourceUsage {
        self.drain_samples();
        summarize_samples(&self.samples)
    }

    // ------------------------------------------------------------------------
    // Per-model records
    // ------------------------------------------------------------------------

    /// Start a record for `model_id`. Re-registering keeps existing data.
    pub fn register_model(&mut self, model_id: impl Into<String>, model_type: ModelKind) {
        let model_id = model_id.into();
        self.models
            .entry(model_id.clone())
            .or_insert_with(|| ModelRecord::new(model_id, model_type));
    }

    pub fn record_training_time(&mut self, model_id: &str, seconds: f64) {
        self.update(model_id, |r| r.training_times.push(seconds));
    }

    pub fn record_prediction_time(&mut self, model_id: &str, seconds: f64) {
        self.update(model_id, |r| r.prediction_times.push(seconds));
    }

    pub fn record_model_accuracy(&mut self, model_id: &str, accuracy: f64) {
        self.update(model_id, |r| r.accuracies.push(accuracy));
    }

    pub fn record_model_error(&mut self, model_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(model_id, |r| r.errors.push(error));
    }

    pub fn record_prediction_confidence(&mut self, model_id: &str, confidence: f64) {
        self.update(model_id, |r| r.confidences.push(confidence));
    }

    fn update(&mut self, model_id: &str, f: impl FnOnce(&mut ModelRecord)) {
        match self.models.get_mut(model_id) {
            Some(record) => f(record),
            None => debug!(model_id, "Ignoring record for unregistered model"),
        }
    }

    pub fn model_record(&self, model_id: &str) -> Option<&ModelRecord> {
        self.models.get(model_id)
    }

    // ------------------------------------------------------------------------
    // Ensemble metrics and reporting
    // ------------------------------------------------------------------------

    /// Full metrics for one run, with resource fields from the sampled history.
    pub fn calculate_ensemble_metrics(
        &mut self,
        predictions: &[Prediction],
        final_prediction: &Prediction,
        timing: &PhaseTiming,
        ground_truth: Option<&[f64]>,
        ensemble_size: usize,
    ) -> EnsembleMetrics {
        let usage = self.resource_usage();
        let mut metrics = assemble_metrics(predictions, final_prediction, timing, ground_truth, ensemble_size);
        metrics.memory_usage_mb = usage.memory_usage_mb;
        metrics.peak_memory_mb = usage.peak_memory_mb;
        metrics.cpu_utilization = usage.cpu_utilization;
        metrics.gpu_utilization = usage.gpu_utilization;
        metrics
    }

    pub fn save_benchmark_result(&mut self, result: BenchmarkResult) {
        debug!(task_name = %result.task_name, success = result.success, "Benchmark result saved");
        self.results.push(result);
    }

    pub fn benchmark_results(&self) -> &[BenchmarkResult] {
        &self.results
    }

    pub fn get_performance_summary(&mut self) -> PerformanceSummary {
        let usage = self.resource_usage();
        let (session_id, session_duration) = match (&self.session, &self.last_session) {
            (Some(s), _) => (Some(s.id.clone()), seconds_between(s.started_at, Utc::now())),
            (None, Some((id, start, end))) => (Some(id.clone()), seconds_between(*start, *end)),
            (None, None) => (None, 0.0),
        };

        let successful: Vec<&BenchmarkResult> = self.results.iter().filter(|r| r.success).collect();
        let accuracies: Vec<f64> = successful.iter().map(|r| r.metrics.accuracy).collect();
        let times: Vec<f64> = successful.iter().map(|r| r.execution_time).collect();

        PerformanceSummary {
            session_id,
            session_active: self.session.is_some(),
            session_duration,
            models_tracked: self.models.len(),
            benchmarks_run: self.results.len(),
            successful_benchmarks: successful.len(),
            mean_accuracy: mean(&accuracies),
            mean_execution_time: mean(&times),
            total_model_errors: self.models.values().map(|r| r.errors.len()).sum(),
            top_models: self.get_best_performing_models("accuracy", 5),
            resource_usage: usage,
        }
    }

    /// Up to `top_k` models ranked on `metric`, best first.
    ///
    /// Time and error metrics rank ascending, everything else descending.
    /// Models with nothing recorded for `metric` are left out.
    pub fn get_best_performing_models(&self, metric: &str, top_k: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .models
            .values()
            .filter_map(|r| r.metric(metric).map(|v| (r.model_id.clone(), v)))
            .filter(|(_, v)| v.is_finite())
            .collect();

        let direction = MetricDirection::for_metric(metric);
        ranked.sort_by(|a, b| {
            let order = match direction {
                MetricDirection::HigherIsBetter => b.1.total_cmp(&a.1),
                MetricDirection::LowerIsBetter => a.1.total_cmp(&b.1),
            };
            order.then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
    }

    /// Write summary, model records, results and samples to `path` as JSON.
    pub fn export_metrics_to_file(&mut self, path: &Path) -> TrackerResult<()> {
        let export = MetricsExport {
            exported_at: Utc::now(),
            summary: self.get_performance_summary(),
            models: self.models.clone(),
            benchmark_results: self.results.clone(),
            resource_samples: self.samples.clone(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
        info!(path = %path.display(), "Metrics exported");
        Ok(())
    }
}

impl Drop for PerformanceTracker {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

fn summarize_samples(samples: &[ResourceSample]) -> ResourceUsage {
    if samples.is_empty() {
        return ResourceUsage::default();
    }
    let n = samples.len() as f64;
    let gpu: Vec<f64> = samples.iter().filter_map(|s| s.gpu_percent).collect();
    ResourceUsage {
        memory_usage_mb: samples.iter().map(|s| s.process_memory_mb).sum::<f64>() / n,
        peak_memory_mb: samples.iter().map(|s| s.process_memory_mb).fold(0.0, f64::max),
        cpu_utilization: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
        gpu_utilization: mean(&gpu).unwrap_or(0.0),
        samples: samples.len(),
    }
}

async fn run_sampler(
    mut probe: Box<dyn ResourceProbe>,
    interval: Duration,
    tx: mpsc::UnboundedSender<ResourceSample>,
    cancel: CancellationToken,
    bus: SharedEventBus,
    session_id: String,
) {
    let policy = RetryPolicy::for_sampler();
    let mut failures: u32 = 0;

    loop {
        let delay = match probe.sample() {
            Ok(sample) => {
                failures = 0;
                if tx.send(sample).is_err() {
                    break;
                }
                interval
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let backoff = policy.backoff_duration(failures);
                warn!(
                    session_id = %session_id,
                    error = %e,
                    consecutive_failures = failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "Resource sampling failed"
                );
                bus.publish(EnsembleEvent::ResourceSamplingFailed {
                    session_id: session_id.clone(),
                    error: e.to_string(),
                    consecutive_failures: failures,
                    timestamp: Utc::now(),
                });
                backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(session_id = %session_id, "Resource sampler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::resources::ProbeError;
    use crate::events::EventBus;

    struct FakeProbe {
        memory: f64,
        fail_first: u32,
    }

    impl ResourceProbe for FakeProbe {
        fn sample(&mut self) -> Result<ResourceSample, ProbeError> {
            if self.fail_first > 0 {
                self.fail_first -= 1;
                return Err(ProbeError::Unsupported);
            }
            self.memory += 10.0;
            Ok(ResourceSample {
                timestamp: Utc::now(),
                process_memory_mb: self.memory,
                system_memory_percent: 50.0,
                cpu_percent: 20.0,
                gpu_percent: None,
            })
        }
    }

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::new(EventBus::new().shared())
    }

    #[test]
    fn test_unknown_model_records_are_ignored() {
        let mut tracker = tracker();
        tracker.record_training_time("ghost", 1.0);
        tracker.record_model_error("ghost", "boom");
        assert!(tracker.model_record("ghost").is_none());

        tracker.register_model("m1", ModelKind::RandomForest);
        tracker.record_training_time("m1", 2.0);
        tracker.record_training_time("m1", 4.0);
        tracker.record_model_accuracy("m1", 0.8);
        let record = tracker.model_record("m1").unwrap();
        assert_eq!(record.metric("training_time"), Some(3.0));
        assert_eq!(record.metric("accuracy"), Some(0.8));
        assert_eq!(record.metric("error_count"), Some(0.0));
    }

    #[test]
    fn test_best_models_respect_metric_direction() {
        let mut tracker = tracker();
        for (id, acc, time) in [("a", 0.7, 3.0), ("b", 0.9, 5.0), ("c", 0.8, 1.0)] {
            tracker.register_model(id, ModelKind::LinearRegression);
            tracker.record_model_accuracy(id, acc);
            tracker.record_training_time(id, time);
        }
        tracker.register_model("untrained", ModelKind::LinearRegression);

        let by_accuracy = tracker.get_best_performing_models("accuracy", 2);
        assert_eq!(by_accuracy, vec![("b".to_string(), 0.9), ("c".to_string(), 0.8)]);

        let by_time = tracker.get_best_performing_models("training_time", 10);
        let ids: Vec<&str> = by_time.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_session_lifecycle_collects_samples() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let mut tracker = PerformanceTracker::new(bus).with_sample_interval(Duration::from_millis(5));

        let id = tracker
            .start_tracking_session_with_probe(Box::new(FakeProbe {
                memory: 100.0,
                fail_first: 0,
            }))
            .unwrap();
        assert!(matches!(
            tracker.start_tracking_session(),
            Err(TrackerError::SessionActive(_))
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let summary = tracker.end_tracking_session(SessionEndReason::Completed).await.unwrap();
        assert_eq!(summary.session_id.as_deref(), Some(id.as_str()));
        assert!(!summary.session_active);
        assert!(summary.resource_usage.samples >= 1);
        assert!(summary.resource_usage.peak_memory_mb >= summary.resource_usage.memory_usage_mb);
        assert_eq!(summary.resource_usage.cpu_utilization, 20.0);

        assert_eq!(rx.recv().await.unwrap().event_type(), "session_started");
        assert_eq!(rx.recv().await.unwrap().event_type(), "session_ended");

        assert!(matches!(
            tracker.end_tracking_session(SessionEndReason::Completed).await,
            Err(TrackerError::NoSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_failures_back_off_and_recover() {
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let mut tracker = PerformanceTracker::new(bus);
        tracker
            .start_tracking_session_with_probe(Box::new(FakeProbe {
                memory: 0.0,
                fail_first: 2,
            }))
            .unwrap();

        // Failures back off 1s then 2s before the first good sample.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(tracker.resource_samples().len(), 1);
        tracker.end_tracking_session(SessionEndReason::Completed).await.unwrap();

        let mut failures = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EnsembleEvent::ResourceSamplingFailed {
                consecutive_failures, ..
            } = event
            {
                failures.push(consecutive_failures);
            }
        }
        assert_eq!(failures, vec![1, 2]);
    }

    #[test]
    fn test_export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("metrics.json");
        let mut tracker = tracker();
        tracker.register_model("m1", ModelKind::LinearRegression);
        tracker.save_benchmark_result(BenchmarkResult::failed("task", 0.1, "nope"));

        tracker.export_metrics_to_file(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let export: MetricsExport = serde_json::from_str(&raw).unwrap();
        assert_eq!(export.summary.benchmarks_run, 1);
        assert_eq!(export.summary.successful_benchmarks, 0);
        assert!(export.models.contains_key("m1"));
    }
}
