//! Event bus for ensemble benchmarking
//!
//! Pub/sub messaging over a Tokio broadcast channel. Publishing never blocks
//! and never fails for lack of subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::EnsembleEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<EnsembleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create an event bus with a custom channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EnsembleEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EnsembleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by session ID
    pub session_id: Option<String>,
    /// Filter by agent ID
    pub agent_id: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    ///
    /// Scope filters only reject events that carry a different scope; events
    /// without a session or agent pass through.
    pub fn matches(&self, event: &EnsembleEvent) -> bool {
        if let (Some(sid), Some(event_sid)) = (&self.session_id, event.session_id()) {
            if event_sid != sid {
                return false;
            }
        }

        if let (Some(aid), Some(event_aid)) = (&self.agent_id, event.agent_id()) {
            if event_aid != aid {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<EnsembleEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<EnsembleEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<EnsembleEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Drain every matching event already buffered, without waiting
    pub fn drain(&mut self) -> Vec<EnsembleEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => events.push(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AgentOperation, SessionEndReason};
    use crate::models::ModelKind;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(EnsembleEvent::SessionStarted {
            session_id: "test-session".to_string(),
            timestamp: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "session_started");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        bus.publish(EnsembleEvent::AgentTerminated {
            agent_id: "a".to_string(),
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EnsembleEvent::AgentSpawned {
            agent_id: "rf".to_string(),
            model_type: ModelKind::RandomForest,
            timestamp: Utc::now(),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();

        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .agent("agent-1")
            .types(vec!["agent_failed", "agent_terminated"]);

        let matching_event = EnsembleEvent::AgentFailed {
            agent_id: "agent-1".to_string(),
            operation: AgentOperation::Train,
            error: "boom".to_string(),
            timestamp: Utc::now(),
        };

        let non_matching_agent = EnsembleEvent::AgentTerminated {
            agent_id: "agent-2".to_string(),
            timestamp: Utc::now(),
        };

        let non_matching_type = EnsembleEvent::SessionEnded {
            session_id: "s".to_string(),
            reason: SessionEndReason::Completed,
            models_tracked: 0,
            timestamp: Utc::now(),
        };

        assert!(filter.matches(&matching_event));
        assert!(!filter.matches(&non_matching_agent));
        assert!(!filter.matches(&non_matching_type));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let filter = EventFilter::new().agent("target");
        let mut filtered = bus.subscribe_filtered(filter);

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(EnsembleEvent::AgentTerminated {
                agent_id: "other".to_string(),
                timestamp: Utc::now(),
            });
            publisher.publish(EnsembleEvent::AgentTerminated {
                agent_id: "target".to_string(),
                timestamp: Utc::now(),
            });
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.agent_id(), Some("target"));
    }
}
