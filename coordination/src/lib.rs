//! MLE Ensemble Library
//!
//! This library provides:
//! - Model agents wrapping pluggable estimators behind a single backend seam
//! - A coordinator that trains and predicts across agents in parallel
//! - Voting strategies (majority, weighted, stacking, Bayesian averaging)
//! - An executor that benchmarks an ensemble end to end
//! - Performance tracking with background resource sampling
//!
//! # Features
//!
//! ## Ensemble
//! - `ModelCoordinator`: bounded-concurrency fan-out with per-agent failure isolation
//! - `VotingStrategy`: consensus over scalar, tensor and label predictions
//! - `EnsembleExecutor`: initialization, prediction, consensus and analysis phases
//!
//! ## Benchmark
//! - `PerformanceTracker`: per-model records, session summaries, JSON export
//! - `EnsembleMetrics`: timing, ensemble, performance, resources and quality sections
//! - Performance targets checked per metric direction
//!
//! # Usage
//!
//! ```bash
//! # Benchmark the default five-model roster on synthetic data
//! ensemble-bench
//!
//! # Use a config file and a different voting strategy
//! ensemble-bench --config ensemble.toml --strategy bayesian
//!
//! # Export tracker metrics
//! ensemble-bench --export metrics.json
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod benchmark;
pub mod config;
pub mod ensemble;
pub mod events;
pub mod models;
pub mod perf_control;

// Re-export key ensemble types
pub use ensemble::{
    EnsembleExecutor, ExecutorError, ModelAgent, ModelConfig, ModelCoordinator, SharedModelCoordinator,
    VotingMethod, VotingResult, VotingStrategy,
};

// Re-export key benchmark types
pub use benchmark::{BenchmarkResult, EnsembleMetrics, PerformanceTracker};

// Re-export key config types
pub use config::{ConfigError, EnsembleConfig, ModelSpec};

// Re-export key event types
pub use events::{EnsembleEvent, EventBus, SessionEndReason, SharedEventBus};

// Re-export key model types
pub use models::{Dataset, ModelBackend, ModelKind, Prediction, Tensor};

// Re-export retry policy
pub use perf_control::RetryPolicy;
