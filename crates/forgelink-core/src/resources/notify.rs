//! Per-context Discord notifier.
//!
//! Watches each context's polled snapshots for machine-state transitions
//! and posts rich-embed webhooks for the ones the user opted into. Webhook
//! delivery failures are logged and surfaced as resource errors; they never
//! affect polling or the context's other resources.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ResourceError;
use crate::events::{EventBus, MonitorEvent};
use crate::types::{MachineState, StatusSnapshot};

/// Outbound webhook timeout, distinct from polling retry timing.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const COLOR_GREEN: u32 = 0x00FF00;
const COLOR_RED: u32 = 0xFF0000;
const COLOR_BLUE: u32 = 0x0099FF;

/// Notification preferences for one context.
#[derive(Debug, Clone)]
pub struct NotificationParams {
    pub webhook_url: String,
    /// Post when a running print finishes.
    pub notify_on_complete: bool,
    /// Post when the printer enters an error state.
    pub notify_on_error: bool,
    /// Optionally post a periodic status summary at this interval.
    pub status_interval: Option<Duration>,
}

/// A state transition worth notifying about.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    PrintComplete { file_name: Option<String> },
    PrinterError,
}

/// Decide whether moving from `previous` to the snapshot's state crosses a
/// notification-worthy boundary.
pub fn detect_transition(
    previous: Option<MachineState>,
    snapshot: &StatusSnapshot,
    params: &NotificationParams,
) -> Option<Transition> {
    let current = snapshot.status.machine_state;
    match (previous, current) {
        (Some(MachineState::Printing), MachineState::Ready) if params.notify_on_complete => {
            Some(Transition::PrintComplete {
                file_name: snapshot
                    .status
                    .current_job
                    .as_ref()
                    .map(|job| job.file_name.clone()),
            })
        }
        (previous, MachineState::Error)
            if params.notify_on_error && previous != Some(MachineState::Error) =>
        {
            Some(Transition::PrinterError)
        }
        _ => None,
    }
}

struct NotifierState {
    params: NotificationParams,
    last_state: Option<MachineState>,
    last_snapshot: Option<StatusSnapshot>,
}

struct ContextNotifier {
    state: Arc<Mutex<NotifierState>>,
    timer_task: Option<JoinHandle<()>>,
}

impl ContextNotifier {
    fn shut_down(self) {
        if let Some(task) = self.timer_task {
            task.abort();
        }
    }
}

/// Owns at most one notifier per context id.
pub struct NotificationManager {
    client: reqwest::Client,
    notifiers: Mutex<HashMap<String, ContextNotifier>>,
    bus: EventBus,
}

impl NotificationManager {
    pub fn new(bus: EventBus) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            notifiers: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Configure (or reconfigure) notifications for a context. Idempotent:
    /// a previous notifier and its timer are torn down first.
    pub fn setup(&self, context_id: &str, params: NotificationParams) -> Result<(), ResourceError> {
        if !params.webhook_url.starts_with("http://") && !params.webhook_url.starts_with("https://")
        {
            return Err(ResourceError::InvalidWebhookUrl(params.webhook_url));
        }

        let state = Arc::new(Mutex::new(NotifierState {
            params: params.clone(),
            last_state: None,
            last_snapshot: None,
        }));

        let timer_task = params.status_interval.map(|interval| {
            let state = state.clone();
            let client = self.client.clone();
            let context_id = context_id.to_string();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                status_timer_loop(state, client, context_id, bus, interval).await;
            })
        });

        let previous = self.notifiers.lock().unwrap().insert(
            context_id.to_string(),
            ContextNotifier { state, timer_task },
        );
        if let Some(previous) = previous {
            debug!(context_id = %context_id, "replacing existing notifier");
            previous.shut_down();
        }

        info!(context_id = %context_id, "notifications configured");
        Ok(())
    }

    /// Tear down a context's notifier. No-op when none was set up.
    pub fn remove(&self, context_id: &str) {
        let notifier = self.notifiers.lock().unwrap().remove(context_id);
        if let Some(notifier) = notifier {
            info!(context_id = %context_id, "notifier removed");
            notifier.shut_down();
        }
    }

    pub fn is_configured(&self, context_id: &str) -> bool {
        self.notifiers.lock().unwrap().contains_key(context_id)
    }

    /// Feed a polled snapshot into the context's notifier. Detects state
    /// transitions and fires the corresponding webhook.
    pub async fn observe(&self, context_id: &str, snapshot: &StatusSnapshot) {
        let decision = {
            let notifiers = self.notifiers.lock().unwrap();
            let notifier = match notifiers.get(context_id) {
                Some(n) => n,
                None => return,
            };
            let mut state = notifier.state.lock().unwrap();
            let transition = detect_transition(state.last_state, snapshot, &state.params);
            state.last_state = Some(snapshot.status.machine_state);
            state.last_snapshot = Some(snapshot.clone());
            transition.map(|t| (t, state.params.webhook_url.clone()))
        };

        if let Some((transition, webhook_url)) = decision {
            let (title, description, color) = match &transition {
                Transition::PrintComplete { file_name } => (
                    "Print Complete".to_string(),
                    format!(
                        "**{}** finished printing.",
                        file_name.as_deref().unwrap_or("Job")
                    ),
                    COLOR_GREEN,
                ),
                Transition::PrinterError => (
                    "Printer Error".to_string(),
                    "The printer reported an error state. Please check it.".to_string(),
                    COLOR_RED,
                ),
            };
            self.deliver(context_id, &webhook_url, &title, &description, color)
                .await;
        }
    }

    async fn deliver(
        &self,
        context_id: &str,
        webhook_url: &str,
        title: &str,
        description: &str,
        color: u32,
    ) {
        if let Err(message) =
            send_embed(&self.client, webhook_url, title, description, color).await
        {
            warn!(context_id = %context_id, error = %message, "webhook delivery failed");
            self.bus.emit(MonitorEvent::ResourceError {
                context_id: context_id.to_string(),
                resource: "notifications".to_string(),
                message,
            });
        }
    }

    pub fn shutdown_all(&self) {
        let notifiers: Vec<ContextNotifier> = {
            let mut map = self.notifiers.lock().unwrap();
            map.drain().map(|(_, n)| n).collect()
        };
        for notifier in notifiers {
            notifier.shut_down();
        }
    }
}

/// Periodic status summary for contexts that opted into it.
async fn status_timer_loop(
    state: Arc<Mutex<NotifierState>>,
    client: reqwest::Client,
    context_id: String,
    bus: EventBus,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;

        let payload = {
            let state = state.lock().unwrap();
            state.last_snapshot.as_ref().map(|snapshot| {
                (
                    state.params.webhook_url.clone(),
                    status_description(snapshot),
                )
            })
        };

        if let Some((webhook_url, description)) = payload {
            if let Err(message) = send_embed(
                &client,
                &webhook_url,
                "Printer Status",
                &description,
                COLOR_BLUE,
            )
            .await
            {
                warn!(context_id = %context_id, error = %message, "status webhook failed");
                bus.emit(MonitorEvent::ResourceError {
                    context_id: context_id.clone(),
                    resource: "notifications".to_string(),
                    message,
                });
            }
        }
    }
}

/// Embed body for the periodic status summary.
fn status_description(snapshot: &StatusSnapshot) -> String {
    let status = &snapshot.status;
    let job_line = status
        .current_job
        .as_ref()
        .map(|job| {
            format!(
                "\nJob: **{}** ({:.1}%)",
                job.file_name, job.progress_percent
            )
        })
        .unwrap_or_default();
    format!(
        "State: **{}**\nNozzle: {:.0}/{:.0}°C  Bed: {:.0}/{:.0}°C{}",
        status.machine_state.display_name(),
        status.nozzle_temp,
        status.nozzle_target,
        status.bed_temp,
        status.bed_target,
        job_line
    )
}

/// Post a rich-embed message to a Discord-compatible webhook. The error is
/// the failure message; callers attach the context id.
async fn send_embed(
    client: &reqwest::Client,
    webhook_url: &str,
    title: &str,
    description: &str,
    color: u32,
) -> Result<(), String> {
    let embed = json!({
        "embeds": [{
            "title": title,
            "description": description,
            "color": color,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "footer": { "text": "ForgeLink" }
        }]
    });

    let response = client
        .post(webhook_url)
        .json(&embed)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }

    Ok(())
}
