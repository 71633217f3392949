//! Structured event sink for ensemble benchmarking
//!
//! Producers (coordinator, executor, tracker) publish [`EnsembleEvent`]s on a
//! shared [`EventBus`]; any number of subscribers receive them through a Tokio
//! broadcast channel.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mle_ensemble::events::{EventBus, EventBusExt, EventFilter};
//!
//! let bus = EventBus::new().shared();
//! let mut failures = bus.subscribe_filtered(EventFilter::new().types(vec!["agent_failed"]));
//!
//! let event = failures.recv().await?;
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{AgentOperation, BenchmarkPhase, EnsembleEvent, EventId, SessionEndReason};
