//! Benchmark Module
//!
//! Measures ensemble runs and keeps a record of them.
//!
//! # Architecture
//!
//! ```text
//! EnsembleExecutor ──► PerformanceTracker ◄── sampler task (sysinfo)
//!        │                    │
//!        ▼                    ▼
//!  assemble_metrics    model records, results
//!        │                    │
//!        └──────► BenchmarkResult ◄── evaluate_targets
//! ```

pub mod metrics;
pub mod resources;
pub mod targets;
pub mod tracker;

pub use metrics::{
    assemble_metrics, BenchmarkResult, ConsensusDetails, EnsembleMetrics, PhaseTiming, ResourceUsage,
};
pub use resources::{current_process_memory_mb, ProbeError, ResourceProbe, ResourceSample, SystemProbe};
pub use targets::{evaluate_targets, summarize_targets, MetricDirection, TargetResult};
pub use tracker::{
    MetricsExport, ModelRecord, PerformanceSummary, PerformanceTracker, TrackerError, TrackerResult,
    SAMPLE_INTERVAL,
};
