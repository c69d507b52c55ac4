//! Polling coordinator: one poller per context, cadence synced to focus.
//!
//! The coordinator owns the context→poller map. The active context is
//! polled at the foreground cadence; background contexts run at a separate
//! (configurable) cadence. Background polling is deliberately not slow:
//! the underlying transport needs frequent-enough traffic to keep its
//! connection alive, so both cadences default to the same value while the
//! two-rate mechanism stays in place.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::context::ContextRegistry;
use crate::error::PollingError;
use crate::events::{EventBus, MonitorEvent};
use crate::polling::poller::{ContextPoller, PollSink, PollerSettings, PollerSettingsUpdate};
use crate::types::StatusSnapshot;

/// Cadence and retry configuration shared by all pollers.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// Interval for the foregrounded context.
    pub active_interval: Duration,
    /// Interval for background contexts.
    pub inactive_interval: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_millis(3000),
            inactive_interval: Duration::from_millis(3000),
            retry_delay: Duration::from_millis(2000),
            max_retries: 3,
        }
    }
}

impl CoordinatorSettings {
    fn poller_settings(&self, is_active: bool) -> PollerSettings {
        PollerSettings {
            interval: self.interval_for(is_active),
            retry_delay: self.retry_delay,
            max_retries: self.max_retries,
        }
    }

    fn interval_for(&self, is_active: bool) -> Duration {
        if is_active {
            self.active_interval
        } else {
            self.inactive_interval
        }
    }
}

/// Diagnostics for one polling session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerDiagnostics {
    pub context_id: String,
    pub running: bool,
    pub interval_ms: u64,
    pub has_cached_data: bool,
}

/// Diagnostics snapshot for the whole coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub poller_count: usize,
    pub active_context_id: Option<String>,
    pub pollers: Vec<PollerDiagnostics>,
}

/// Tags a poller's events with its context id and re-emits them on the bus.
struct ContextPollSink {
    context_id: String,
    bus: EventBus,
}

impl PollSink for ContextPollSink {
    fn data_updated(&self, snapshot: &StatusSnapshot) {
        self.bus.emit(MonitorEvent::PollingData {
            context_id: self.context_id.clone(),
            data: snapshot.clone(),
        });
    }

    fn polling_error(&self, message: &str) {
        self.bus.emit(MonitorEvent::PollingError {
            context_id: self.context_id.clone(),
            message: message.to_string(),
        });
    }
}

/// Maintains the 1:1 mapping from context to poller.
pub struct PollingCoordinator {
    registry: Arc<ContextRegistry>,
    bus: EventBus,
    settings: CoordinatorSettings,
    pollers: Mutex<HashMap<String, Arc<ContextPoller>>>,
}

impl PollingCoordinator {
    pub fn new(registry: Arc<ContextRegistry>, bus: EventBus, settings: CoordinatorSettings) -> Self {
        Self {
            registry,
            bus,
            settings,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling for a registered context.
    ///
    /// Unknown contexts and not-ready backends are caller bugs, not
    /// transient conditions, and fail loud.
    pub fn start_polling(&self, context_id: &str) -> Result<(), PollingError> {
        let context = self
            .registry
            .get_context(context_id)
            .ok_or_else(|| PollingError::ContextNotFound(context_id.to_string()))?;
        let backend = self
            .registry
            .backend(context_id)
            .ok_or_else(|| PollingError::ContextNotFound(context_id.to_string()))?;
        if !backend.is_ready() {
            return Err(PollingError::BackendNotReady(context_id.to_string()));
        }

        let sink = Arc::new(ContextPollSink {
            context_id: context_id.to_string(),
            bus: self.bus.clone(),
        });
        let poller = Arc::new(ContextPoller::new(
            backend,
            sink,
            self.settings.poller_settings(context.is_active),
        ));

        // Complete the map mutation before starting the loop task so
        // re-entrant event handlers never observe a half-registered poller.
        let previous = {
            let mut pollers = self.pollers.lock().unwrap();
            pollers.insert(context_id.to_string(), poller.clone())
        };
        if let Some(previous) = previous {
            previous.stop();
        }
        poller.start();

        info!(context_id = %context_id, active = context.is_active, "polling started");
        self.bus.emit(MonitorEvent::PollingStarted {
            context_id: context_id.to_string(),
        });
        Ok(())
    }

    /// Stop and dispose the poller for a context. No-op if not polling.
    pub fn stop_polling(&self, context_id: &str) {
        let poller = self.pollers.lock().unwrap().remove(context_id);
        if let Some(poller) = poller {
            poller.stop();
            info!(context_id = %context_id, "polling stopped");
            self.bus.emit(MonitorEvent::PollingStopped {
                context_id: context_id.to_string(),
            });
        }
    }

    /// React to a context switch: retune both pollers and immediately
    /// re-emit the newly active context's cached snapshot so a tab switch
    /// shows last-known state instantly instead of waiting out an interval.
    ///
    /// Runs synchronously within the switch so no queued tick for the new
    /// context can be observed before the cached re-emission.
    pub fn handle_context_switched(&self, context_id: &str, previous_id: Option<&str>) {
        let (new_poller, prev_poller) = {
            let pollers = self.pollers.lock().unwrap();
            (
                pollers.get(context_id).cloned(),
                previous_id.and_then(|id| pollers.get(id).cloned()),
            )
        };

        if let Some(poller) = new_poller {
            poller.update_settings(PollerSettingsUpdate {
                interval: Some(self.settings.interval_for(true)),
                ..Default::default()
            });
            if let Some(snapshot) = poller.current_data() {
                self.bus.emit(MonitorEvent::PollingData {
                    context_id: context_id.to_string(),
                    data: snapshot,
                });
            }
        }

        if let Some(poller) = prev_poller {
            poller.update_settings(PollerSettingsUpdate {
                interval: Some(self.settings.interval_for(false)),
                ..Default::default()
            });
        }

        debug!(context_id = %context_id, previous = ?previous_id, "pollers retuned for switch");
    }

    /// React to a context removal: dispose its poller unconditionally.
    pub fn handle_context_removed(&self, context_id: &str) {
        self.stop_polling(context_id);
    }

    pub fn is_polling(&self, context_id: &str) -> bool {
        self.pollers
            .lock()
            .unwrap()
            .get(context_id)
            .map(|p| p.is_running())
            .unwrap_or(false)
    }

    /// Last cached snapshot for a context, if polling has produced one.
    pub fn polling_data(&self, context_id: &str) -> Option<StatusSnapshot> {
        self.pollers
            .lock()
            .unwrap()
            .get(context_id)
            .and_then(|p| p.current_data())
    }

    /// Interval currently configured for a context's poller.
    pub fn polling_interval(&self, context_id: &str) -> Option<Duration> {
        self.pollers
            .lock()
            .unwrap()
            .get(context_id)
            .map(|p| p.settings().interval)
    }

    pub fn active_polling_contexts(&self) -> Vec<String> {
        let pollers = self.pollers.lock().unwrap();
        let mut ids: Vec<String> = pollers
            .iter()
            .filter(|(_, p)| p.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn status(&self) -> CoordinatorStatus {
        let pollers = self.pollers.lock().unwrap();
        let mut diagnostics: Vec<PollerDiagnostics> = pollers
            .iter()
            .map(|(id, poller)| PollerDiagnostics {
                context_id: id.clone(),
                running: poller.is_running(),
                interval_ms: poller.settings().interval.as_millis() as u64,
                has_cached_data: poller.current_data().is_some(),
            })
            .collect();
        diagnostics.sort_by(|a, b| a.context_id.cmp(&b.context_id));

        CoordinatorStatus {
            poller_count: diagnostics.len(),
            active_context_id: self.registry.active_context_id(),
            pollers: diagnostics,
        }
    }

    /// Stop every poller, keeping nothing scheduled.
    pub fn stop_all_polling(&self) {
        let ids: Vec<String> = self.pollers.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.stop_polling(&id);
        }
    }

    /// Tear down the coordinator. Equivalent to stopping all polling; kept
    /// separate so owners can express end-of-life intent.
    pub fn dispose(&self) {
        self.stop_all_polling();
    }
}
