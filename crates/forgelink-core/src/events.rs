//! Typed event bus for monitor consumers.
//!
//! The embedding application (GUI shell, web companion) relays these events
//! over its own IPC transport; the core only guarantees the contract:
//! named events, in-emission-order delivery per sender, no ordering promise
//! between different contexts' events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::context::ContextInfo;
use crate::types::StatusSnapshot;

/// Default buffer size for the broadcast channel. Slow subscribers that lag
/// behind this many events see a `Lagged` error and skip ahead.
const DEFAULT_CAPACITY: usize = 256;

/// Every event the monitor core emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorEvent {
    #[serde(rename_all = "camelCase")]
    ContextCreated { context: ContextInfo },

    /// A context switch carries both ids so listeners can distinguish a
    /// switch from two coincidental toggles.
    #[serde(rename_all = "camelCase")]
    ContextSwitched {
        context_id: String,
        previous_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ContextRemoved { context_id: String, was_active: bool },

    #[serde(rename_all = "camelCase")]
    ContextUpdated { context: ContextInfo },

    #[serde(rename_all = "camelCase")]
    PollingStarted { context_id: String },

    #[serde(rename_all = "camelCase")]
    PollingStopped { context_id: String },

    #[serde(rename_all = "camelCase")]
    PollingData {
        context_id: String,
        data: StatusSnapshot,
    },

    #[serde(rename_all = "camelCase")]
    PollingError { context_id: String, message: String },

    #[serde(rename_all = "camelCase")]
    ResourceError {
        context_id: String,
        resource: String,
        message: String,
    },
}

/// Cheaply cloneable publish/subscribe handle.
///
/// `emit` is synchronous: by the time it returns, the event is queued for
/// every current subscriber in emission order.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: MonitorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
