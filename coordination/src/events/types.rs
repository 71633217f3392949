//! Event types for ensemble benchmarking
//!
//! Published on the [`EventBus`](super::EventBus) by the coordinator, executor
//! and performance tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::VotingMethod;
use crate::models::ModelKind;

/// Unique identifier for events
pub type EventId = String;

/// All ensemble benchmarking events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnsembleEvent {
    /// A tracking session started
    SessionStarted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A tracking session ended
    SessionEnded {
        session_id: String,
        reason: SessionEndReason,
        models_tracked: u32,
        timestamp: DateTime<Utc>,
    },

    /// An agent was initialized and registered
    AgentSpawned {
        agent_id: String,
        model_type: ModelKind,
        timestamp: DateTime<Utc>,
    },

    /// An agent operation failed
    AgentFailed {
        agent_id: String,
        operation: AgentOperation,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent was cleaned up
    AgentTerminated {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A parallel train or predict round finished
    FanOutCompleted {
        operation: AgentOperation,
        succeeded: u32,
        failed: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A voting strategy could not combine and used its fallback
    VotingFallback {
        strategy: VotingMethod,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The ensemble produced a final output
    ConsensusReached {
        task_name: String,
        strategy: VotingMethod,
        consensus_strength: f64,
        participating_models: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A benchmark phase finished
    PhaseCompleted {
        task_name: String,
        phase: BenchmarkPhase,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A benchmark run succeeded
    BenchmarkCompleted {
        task_name: String,
        ensemble_size: u32,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A benchmark run failed
    BenchmarkFailed {
        task_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The background resource sampler could not read system stats
    ResourceSamplingFailed {
        session_id: String,
        error: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },
}

impl EnsembleEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EnsembleEvent::SessionStarted { timestamp, .. } => *timestamp,
            EnsembleEvent::SessionEnded { timestamp, .. } => *timestamp,
            EnsembleEvent::AgentSpawned { timestamp, .. } => *timestamp,
            EnsembleEvent::AgentFailed { timestamp, .. } => *timestamp,
            EnsembleEvent::AgentTerminated { timestamp, .. } => *timestamp,
            EnsembleEvent::FanOutCompleted { timestamp, .. } => *timestamp,
            EnsembleEvent::VotingFallback { timestamp, .. } => *timestamp,
            EnsembleEvent::ConsensusReached { timestamp, .. } => *timestamp,
            EnsembleEvent::PhaseCompleted { timestamp, .. } => *timestamp,
            EnsembleEvent::BenchmarkCompleted { timestamp, .. } => *timestamp,
            EnsembleEvent::BenchmarkFailed { timestamp, .. } => *timestamp,
            EnsembleEvent::ResourceSamplingFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EnsembleEvent::SessionStarted { .. } => "session_started",
            EnsembleEvent::SessionEnded { .. } => "session_ended",
            EnsembleEvent::AgentSpawned { .. } => "agent_spawned",
            EnsembleEvent::AgentFailed { .. } => "agent_failed",
            EnsembleEvent::AgentTerminated { .. } => "agent_terminated",
            EnsembleEvent::FanOutCompleted { .. } => "fan_out_completed",
            EnsembleEvent::VotingFallback { .. } => "voting_fallback",
            EnsembleEvent::ConsensusReached { .. } => "consensus_reached",
            EnsembleEvent::PhaseCompleted { .. } => "phase_completed",
            EnsembleEvent::BenchmarkCompleted { .. } => "benchmark_completed",
            EnsembleEvent::BenchmarkFailed { .. } => "benchmark_failed",
            EnsembleEvent::ResourceSamplingFailed { .. } => "resource_sampling_failed",
        }
    }

    /// Get the session ID if this event is session-scoped
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EnsembleEvent::SessionStarted { session_id, .. } => Some(session_id),
            EnsembleEvent::SessionEnded { session_id, .. } => Some(session_id),
            EnsembleEvent::ResourceSamplingFailed { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Get the agent ID if this event concerns a single agent
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            EnsembleEvent::AgentSpawned { agent_id, .. } => Some(agent_id),
            EnsembleEvent::AgentFailed { agent_id, .. } => Some(agent_id),
            EnsembleEvent::AgentTerminated { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    /// Get the benchmark task name if this event is task-scoped
    pub fn task_name(&self) -> Option<&str> {
        match self {
            EnsembleEvent::ConsensusReached { task_name, .. } => Some(task_name),
            EnsembleEvent::PhaseCompleted { task_name, .. } => Some(task_name),
            EnsembleEvent::BenchmarkCompleted { task_name, .. } => Some(task_name),
            EnsembleEvent::BenchmarkFailed { task_name, .. } => Some(task_name),
            _ => None,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Agent operation an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOperation {
    Initialize,
    Train,
    Predict,
    Cleanup,
}

impl std::fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentOperation::Initialize => write!(f, "initialize"),
            AgentOperation::Train => write!(f, "train"),
            AgentOperation::Predict => write!(f, "predict"),
            AgentOperation::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Timed phase of a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkPhase {
    Initialization,
    Prediction,
    Consensus,
    Analysis,
}

impl std::fmt::Display for BenchmarkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchmarkPhase::Initialization => write!(f, "initialization"),
            BenchmarkPhase::Prediction => write!(f, "prediction"),
            BenchmarkPhase::Consensus => write!(f, "consensus"),
            BenchmarkPhase::Analysis => write!(f, "analysis"),
        }
    }
}

/// Reason for session ending
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Session ended normally
    Completed,
    /// Tracker was dropped or cancelled mid-session
    Cancelled,
    /// Error during processing
    Error(String),
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEndReason::Completed => write!(f, "completed"),
            SessionEndReason::Cancelled => write!(f, "cancelled"),
            SessionEndReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EnsembleEvent::AgentSpawned {
            agent_id: "agent-1".to_string(),
            model_type: ModelKind::RandomForest,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"agent_spawned\""));
        assert!(json.contains("\"model_type\":\"random_forest\""));
        let parsed: EnsembleEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type(), "agent_spawned");
    }

    #[test]
    fn test_event_accessors() {
        let event = EnsembleEvent::PhaseCompleted {
            task_name: "iris".to_string(),
            phase: BenchmarkPhase::Consensus,
            duration_ms: 12,
            timestamp: Utc::now(),
        };

        assert_eq!(event.task_name(), Some("iris"));
        assert_eq!(event.session_id(), None);
        assert_eq!(event.agent_id(), None);
        assert_eq!(event.event_type(), "phase_completed");
    }

    #[test]
    fn test_session_end_reason_display() {
        assert_eq!(SessionEndReason::Completed.to_string(), "completed");
        assert_eq!(
            SessionEndReason::Error("disk full".into()).to_string(),
            "error: disk full"
        );
    }
}
