//! Domain event system: decoupled notifications between bounded contexts.
//!
//! The orchestrator publishes events as requests complete or degrade; the
//! gateway, CLI and tests subscribe to observe them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn finished and was persisted to its session
    TurnCompleted {
        user_id: String,
        session_id: String,
        response_id: String,
        domains: Vec<String>,
        citation_count: usize,
        degraded: bool,
        timestamp: DateTime<Utc>,
    },

    /// One specialist failed or timed out and its contribution was dropped
    SpecialistDegraded {
        domain: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A request ended with a caller-visible error, or was cancelled
    RequestFailed {
        session_id: String,
        reason: String,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },

    /// The background sweep evicted idle sessions
    SessionsEvicted {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user rated a response
    FeedbackSubmitted {
        response_id: String,
        rating: u8,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
