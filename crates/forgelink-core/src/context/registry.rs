//! Context registry: bookkeeping for printer sessions.
//!
//! All mutations are synchronous and in-memory. Each mutation completes
//! under its lock before the corresponding event is emitted, so readers
//! never observe a half-applied switch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::BackendHandle;
use crate::error::RegistryError;
use crate::events::{EventBus, MonitorEvent};
use crate::types::PrinterDetails;

/// Public, serializable view of one context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub id: String,
    pub details: PrinterDetails,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Result of a successful context switch.
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub context_id: String,
    pub previous_id: Option<String>,
}

/// Result of removing a known context.
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub context_id: String,
    pub was_active: bool,
    /// Context activated in the removed one's place, if it was active.
    pub replacement_id: Option<String>,
}

struct ContextEntry {
    info: ContextInfo,
    backend: BackendHandle,
    /// Monotonic creation order; used to pick a deterministic replacement
    /// when the active context is removed.
    seq: u64,
}

#[derive(Default)]
struct RegistryInner {
    contexts: HashMap<String, ContextEntry>,
    active_id: Option<String>,
    next_seq: u64,
}

/// Single source of truth for which printer sessions exist and which one is
/// foregrounded. At most one context is active at any time.
pub struct ContextRegistry {
    inner: Mutex<RegistryInner>,
    bus: EventBus,
}

impl ContextRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            bus,
        }
    }

    /// Register a new context. The first context is activated automatically;
    /// later ones start in the background.
    pub fn create_context(&self, details: PrinterDetails, backend: BackendHandle) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let info = {
            let mut inner = self.inner.lock().unwrap();
            let is_first = inner.contexts.is_empty();
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let info = ContextInfo {
                id: id.clone(),
                details,
                is_active: is_first,
                created_at: now,
                last_activity: now,
            };
            inner.contexts.insert(
                id.clone(),
                ContextEntry {
                    info: info.clone(),
                    backend,
                    seq,
                },
            );
            if is_first {
                inner.active_id = Some(id.clone());
            }
            info
        };

        debug!(context_id = %id, name = %info.details.name, "context created");
        self.bus.emit(MonitorEvent::ContextCreated { context: info });
        id
    }

    /// Foreground the given context.
    ///
    /// Returns `Ok(None)` without emitting anything when the context is
    /// already active — switching to the current context must not generate
    /// spurious churn.
    pub fn switch_context(&self, id: &str) -> Result<Option<SwitchOutcome>, RegistryError> {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.contexts.contains_key(id) {
                return Err(RegistryError::NotFound(id.to_string()));
            }
            if inner.active_id.as_deref() == Some(id) {
                return Ok(None);
            }

            let previous_id = inner.active_id.take();
            if let Some(prev) = previous_id.as_deref() {
                if let Some(entry) = inner.contexts.get_mut(prev) {
                    entry.info.is_active = false;
                }
            }
            let entry = inner.contexts.get_mut(id).unwrap();
            entry.info.is_active = true;
            entry.info.last_activity = Utc::now();
            inner.active_id = Some(id.to_string());

            SwitchOutcome {
                context_id: id.to_string(),
                previous_id,
            }
        };

        debug!(context_id = %outcome.context_id, previous = ?outcome.previous_id, "context switched");
        self.bus.emit(MonitorEvent::ContextSwitched {
            context_id: outcome.context_id.clone(),
            previous_id: outcome.previous_id.clone(),
        });
        Ok(Some(outcome))
    }

    /// Remove a context. Unknown ids are logged and ignored; removal is
    /// idempotent and never an error.
    ///
    /// If the removed context was active, the most-recently-created
    /// remaining context is activated in its place.
    pub fn remove_context(&self, id: &str) -> Option<RemoveOutcome> {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            let entry = match inner.contexts.remove(id) {
                Some(entry) => entry,
                None => {
                    drop(inner);
                    warn!(context_id = %id, "remove requested for unknown context");
                    return None;
                }
            };

            let was_active = entry.info.is_active;
            let mut replacement_id = None;
            if was_active {
                inner.active_id = None;
                // Most-recently-created remaining context, by sequence number.
                if let Some(repl) = inner
                    .contexts
                    .values()
                    .max_by_key(|e| e.seq)
                    .map(|e| e.info.id.clone())
                {
                    let repl_entry = inner.contexts.get_mut(&repl).unwrap();
                    repl_entry.info.is_active = true;
                    repl_entry.info.last_activity = Utc::now();
                    inner.active_id = Some(repl.clone());
                    replacement_id = Some(repl);
                }
            }

            RemoveOutcome {
                context_id: id.to_string(),
                was_active,
                replacement_id,
            }
        };

        debug!(context_id = %id, was_active = outcome.was_active, "context removed");
        self.bus.emit(MonitorEvent::ContextRemoved {
            context_id: outcome.context_id.clone(),
            was_active: outcome.was_active,
        });
        if let Some(repl) = outcome.replacement_id.as_deref() {
            self.bus.emit(MonitorEvent::ContextSwitched {
                context_id: repl.to_string(),
                previous_id: None,
            });
        }
        Some(outcome)
    }

    /// Replace a context's printer details (e.g. after a settings change).
    pub fn update_context(
        &self,
        id: &str,
        details: PrinterDetails,
    ) -> Result<ContextInfo, RegistryError> {
        let info = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .contexts
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            entry.info.details = details;
            entry.info.last_activity = Utc::now();
            entry.info.clone()
        };

        self.bus.emit(MonitorEvent::ContextUpdated {
            context: info.clone(),
        });
        Ok(info)
    }

    pub fn active_context_id(&self) -> Option<String> {
        self.inner.lock().unwrap().active_id.clone()
    }

    pub fn get_context(&self, id: &str) -> Option<ContextInfo> {
        self.inner
            .lock()
            .unwrap()
            .contexts
            .get(id)
            .map(|e| e.info.clone())
    }

    /// All contexts, in creation order.
    pub fn all_contexts(&self) -> Vec<ContextInfo> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner.contexts.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.iter().map(|e| e.info.clone()).collect()
    }

    pub fn backend(&self, id: &str) -> Option<BackendHandle> {
        self.inner
            .lock()
            .unwrap()
            .contexts
            .get(id)
            .map(|e| e.backend.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().contexts.is_empty()
    }
}
