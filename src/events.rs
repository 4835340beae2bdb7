//! Process-local publish/subscribe for memory lifecycle events.
//!
//! Built on `tokio::sync::broadcast`: publishing never blocks, every
//! subscriber sees events in publish order, and a subscriber that falls behind
//! the channel capacity loses the oldest entries (it observes a `Lagged`
//! error and continues) rather than backpressuring publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default per-bus channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// The closed set of publishable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MemoryCreated,
    MemoryAccessed,
    MemoryUpdated,
    MemoryDeleted,
    ConsolidationComplete,
    DecayTick,
    LinkDiscovered,
    InitialState,
    WorkerLightTick,
    WorkerMediumTick,
    UpdateStarted,
    UpdateComplete,
    UpdateFailed,
    ServerRestarting,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryCreated => "memory_created",
            Self::MemoryAccessed => "memory_accessed",
            Self::MemoryUpdated => "memory_updated",
            Self::MemoryDeleted => "memory_deleted",
            Self::ConsolidationComplete => "consolidation_complete",
            Self::DecayTick => "decay_tick",
            Self::LinkDiscovered => "link_discovered",
            Self::InitialState => "initial_state",
            Self::WorkerLightTick => "worker_light_tick",
            Self::WorkerMediumTick => "worker_medium_tick",
            Self::UpdateStarted => "update_started",
            Self::UpdateComplete => "update_complete",
            Self::UpdateFailed => "update_failed",
            Self::ServerRestarting => "server_restarting",
        }
    }
}

/// An event frame as delivered to subscribers (and the WebSocket verbatim).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// In-process event bus. Cheap to clone the sender side via [`EventBus::publish`].
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, kind: EventKind, data: serde_json::Value) {
        let event = Event {
            kind,
            timestamp: Utc::now(),
            data,
        };
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
