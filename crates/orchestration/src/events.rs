//! Service lifecycle event hub
//!
//! The orchestrator announces registry-visible changes here; the control
//! plane's bidirectional channel replays them to connected dashboards.

use crate::subscription::{Publisher, Subscription, DEFAULT_DEPTH};
use serde::{Deserialize, Serialize};

/// A change to the set of live services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "service", rename_all = "lowercase")]
pub enum ServiceEvent {
    /// A service appeared (first launch this session)
    Add(String),
    /// A service's status, health or identity changed
    Update(String),
    /// A service was removed from the registry
    Remove(String),
}

impl ServiceEvent {
    /// The service the event is about
    pub fn service(&self) -> &str {
        match self {
            ServiceEvent::Add(name) | ServiceEvent::Update(name) | ServiceEvent::Remove(name) => {
                name
            }
        }
    }
}

/// Fan-out hub for [`ServiceEvent`]s
pub struct ServiceEvents {
    publisher: Publisher<ServiceEvent>,
}

impl ServiceEvents {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            publisher: Publisher::new(DEFAULT_DEPTH),
        }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> Subscription<ServiceEvent> {
        self.publisher.subscribe()
    }

    /// Publish an event to all subscribers without blocking
    pub fn publish(&self, event: ServiceEvent) {
        self.publisher.publish(event);
    }

    /// End all subscriptions
    pub fn close(&self) {
        self.publisher.close();
    }
}

impl Default for ServiceEvents {
    fn default() -> Self {
        Self::new()
    }
}
