//! Ensemble coordination module
//!
//! Trains several models side by side and combines their predictions into a
//! single output.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    EnsembleExecutor                        │
//! │  • Splits data, times phases                               │
//! │  • Reports a BenchmarkResult, never an error               │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                    ModelCoordinator                        │
//! │  • Agent registry                                          │
//! │  • Semaphore-gated train/predict fan-out                   │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!     ┌───────────┐   ┌───────────┐   ┌───────────┐
//!     │ModelAgent │   │ModelAgent │   │ModelAgent │
//!     └───────────┘   └───────────┘   └───────────┘
//!                           │
//!                           ▼
//!     ┌───────────────────────────────────────────┐
//!     │  VotingStrategy: majority │ weighted │     │
//!     │             stacking │ bayesian           │
//!     └───────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mle_ensemble::config::EnsembleConfig;
//! use mle_ensemble::ensemble::EnsembleExecutor;
//! use mle_ensemble::events::EventBus;
//! use mle_ensemble::models::Dataset;
//!
//! let data = Dataset::make_classification(200, 8, 3, 42)?;
//! let mut executor = EnsembleExecutor::new(EnsembleConfig::default(), EventBus::new().shared());
//!
//! let result = executor.execute_ensemble_benchmark("blobs", &data).await;
//! println!("accuracy {:.3}", result.metrics.accuracy);
//!
//! executor.cleanup().await?;
//! ```

pub mod agent;
pub mod consensus;
pub mod coordinator;
pub mod executor;
pub mod voting;

pub use agent::{
    AgentError, AgentResult, AgentStatus, CallPermit, ModelAgent, ModelConfig, PerformanceMetrics,
    PerformanceSnapshot,
};
pub use consensus::{agreement_matrix, mean_pairwise_agreement, model_diversity, prediction_variance};
pub use coordinator::{
    AgentInfo, CoordinatorConfig, CoordinatorError, CoordinatorResult, ModelCoordinator, SharedModelCoordinator,
};
pub use executor::{EnsembleExecutor, ExecutorError, ExecutorResult};
pub use voting::{
    build_strategy, normalize_weights, BayesianAveraging, MajorityVoting, StackingEnsemble, VoteResult,
    VotingError, VotingMethod, VotingResult, VotingStrategy, WeightStrategy, WeightedVoting,
};
