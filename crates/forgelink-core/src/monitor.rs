//! Top-level monitor: composition root for the core.
//!
//! `PrinterMonitor` is constructed once at startup and injected into
//! whatever owns the process lifecycle (GUI shell, CLI, tests). It wires
//! registry mutations to the coordinator synchronously — a context switch
//! retunes pollers and re-emits cached data before control returns to the
//! caller — and releases every per-context resource on removal, on error
//! paths as well as the happy path.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::backend::BackendHandle;
use crate::context::{ContextInfo, ContextRegistry};
use crate::error::{CoreError, RegistryError};
use crate::events::{EventBus, MonitorEvent};
use crate::polling::{CoordinatorStatus, PollingCoordinator};
use crate::resources::{
    camera::CameraRelayParams, notify::NotificationParams, CameraRelayManager, NotificationManager,
};
use crate::storage::MonitorSettings;
use crate::types::{PrinterDetails, StatusSnapshot};

pub struct PrinterMonitor {
    bus: EventBus,
    settings: MonitorSettings,
    registry: Arc<ContextRegistry>,
    coordinator: Arc<PollingCoordinator>,
    cameras: Arc<CameraRelayManager>,
    notifications: Arc<NotificationManager>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl PrinterMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        let bus = EventBus::new();
        let registry = Arc::new(ContextRegistry::new(bus.clone()));
        let coordinator = Arc::new(PollingCoordinator::new(
            registry.clone(),
            bus.clone(),
            settings.coordinator_settings(),
        ));
        let cameras = Arc::new(CameraRelayManager::new());
        let notifications = Arc::new(NotificationManager::new(bus.clone()));

        // Feed polled snapshots into the notification manager. Webhook
        // traffic stays off the polling path.
        let forwarder = {
            let mut rx = bus.subscribe();
            let notifications = notifications.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(MonitorEvent::PollingData { context_id, data }) => {
                            notifications.observe(&context_id, &data).await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "notification forwarder lagged behind event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            bus,
            settings,
            registry,
            coordinator,
            cameras,
            notifications,
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// Subscribe to the monitor's event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    /// Register a connected printer: creates its context, starts polling,
    /// and sets up camera/notification resources where configured.
    ///
    /// Resource setup failures are surfaced as `ResourceError` events and
    /// never prevent polling.
    pub async fn add_printer(
        &self,
        details: PrinterDetails,
        backend: BackendHandle,
    ) -> Result<String, CoreError> {
        let camera_url = details.camera_stream_url.clone();
        let context_id = self.registry.create_context(details, backend);
        self.coordinator.start_polling(&context_id)?;

        if let Some(source_url) = camera_url {
            if let Err(err) = self.setup_camera(&context_id, source_url).await {
                self.surface_resource_error(&context_id, "camera", &err.to_string());
            }
        }

        if let Some(webhook_url) = self.settings.webhook_url.clone() {
            let params = NotificationParams {
                webhook_url,
                notify_on_complete: true,
                notify_on_error: true,
                status_interval: None,
            };
            if let Err(err) = self.notifications.setup(&context_id, params) {
                self.surface_resource_error(&context_id, "notifications", &err.to_string());
            }
        }

        Ok(context_id)
    }

    /// Foreground a context. Poller cadences are retuned and the new
    /// context's cached snapshot is re-emitted before this returns.
    pub fn switch_to(&self, context_id: &str) -> Result<(), RegistryError> {
        if let Some(outcome) = self.registry.switch_context(context_id)? {
            self.coordinator
                .handle_context_switched(&outcome.context_id, outcome.previous_id.as_deref());
        }
        Ok(())
    }

    /// Remove a printer and release everything it owned: poller, camera
    /// relay, notifier. Idempotent; unknown ids are ignored.
    pub fn remove_printer(&self, context_id: &str) {
        let outcome = match self.registry.remove_context(context_id) {
            Some(outcome) => outcome,
            None => return,
        };

        // Resource cleanup is wired explicitly per manager so error-path
        // removals release exactly the same set as user-initiated ones.
        self.coordinator.handle_context_removed(context_id);
        self.cameras.remove(context_id);
        self.notifications.remove(context_id);

        if let Some(replacement) = outcome.replacement_id.as_deref() {
            self.coordinator.handle_context_switched(replacement, None);
        }
    }

    /// Create or replace the camera relay for a context.
    pub async fn configure_camera(
        &self,
        context_id: &str,
        source_url: String,
    ) -> Result<SocketAddr, CoreError> {
        self.require_context(context_id)?;
        self.setup_camera(context_id, source_url).await
    }

    /// Create or replace the notifier for a context.
    pub fn configure_notifications(
        &self,
        context_id: &str,
        params: NotificationParams,
    ) -> Result<(), CoreError> {
        self.require_context(context_id)?;
        self.notifications.setup(context_id, params)?;
        Ok(())
    }

    /// Replace a context's printer details.
    pub fn update_printer(
        &self,
        context_id: &str,
        details: PrinterDetails,
    ) -> Result<ContextInfo, RegistryError> {
        self.registry.update_context(context_id, details)
    }

    // ==================== Queries ====================

    pub fn active_context_id(&self) -> Option<String> {
        self.registry.active_context_id()
    }

    pub fn get_context(&self, context_id: &str) -> Option<ContextInfo> {
        self.registry.get_context(context_id)
    }

    pub fn all_contexts(&self) -> Vec<ContextInfo> {
        self.registry.all_contexts()
    }

    pub fn is_polling(&self, context_id: &str) -> bool {
        self.coordinator.is_polling(context_id)
    }

    pub fn polling_data(&self, context_id: &str) -> Option<StatusSnapshot> {
        self.coordinator.polling_data(context_id)
    }

    pub fn active_polling_contexts(&self) -> Vec<String> {
        self.coordinator.active_polling_contexts()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.coordinator.status()
    }

    pub fn camera_addr(&self, context_id: &str) -> Option<SocketAddr> {
        self.cameras.local_addr(context_id)
    }

    /// Stop all polling and release every resource. The monitor is inert
    /// afterwards.
    pub fn dispose(&self) {
        self.coordinator.dispose();
        self.cameras.shutdown_all();
        self.notifications.shutdown_all();
        if let Some(forwarder) = self.forwarder.lock().unwrap().take() {
            forwarder.abort();
        }
    }

    // ==================== Internal ====================

    fn require_context(&self, context_id: &str) -> Result<(), RegistryError> {
        if self.registry.get_context(context_id).is_none() {
            return Err(RegistryError::NotFound(context_id.to_string()));
        }
        Ok(())
    }

    async fn setup_camera(
        &self,
        context_id: &str,
        source_url: String,
    ) -> Result<SocketAddr, CoreError> {
        let bind_addr: SocketAddr = self
            .settings
            .camera_bind_addr
            .parse()
            .map_err(|_| CoreError::Other(format!(
                "invalid camera bind address '{}'",
                self.settings.camera_bind_addr
            )))?;
        let addr = self
            .cameras
            .setup(context_id, CameraRelayParams {
                source_url,
                bind_addr,
            })
            .await?;
        Ok(addr)
    }

    fn surface_resource_error(&self, context_id: &str, resource: &str, message: &str) {
        warn!(context_id = %context_id, resource = %resource, error = %message, "resource setup failed");
        self.bus.emit(MonitorEvent::ResourceError {
            context_id: context_id.to_string(),
            resource: resource.to_string(),
            message: message.to_string(),
        });
    }
}

impl Drop for PrinterMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrinterBackend;
    use crate::error::BackendError;
    use crate::types::{MachineState, PrinterStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedBackend {
        fail: bool,
    }

    #[async_trait]
    impl PrinterBackend for FixedBackend {
        fn is_ready(&self) -> bool {
            true
        }

        async fn printer_status(&self) -> Result<PrinterStatus, BackendError> {
            if self.fail {
                return Err(BackendError::Offline {
                    address: "10.1.1.1".to_string(),
                });
            }
            Ok(PrinterStatus {
                machine_state: MachineState::Ready,
                bed_temp: 25.0,
                bed_target: 0.0,
                nozzle_temp: 25.0,
                nozzle_target: 0.0,
                current_job: None,
            })
        }
    }

    fn details(name: &str) -> PrinterDetails {
        PrinterDetails {
            name: name.to_string(),
            address: "192.168.7.20".to_string(),
            serial_number: None,
            camera_stream_url: None,
        }
    }

    fn settings(active_ms: u64, inactive_ms: u64) -> MonitorSettings {
        MonitorSettings {
            active_interval_ms: active_ms,
            inactive_interval_ms: inactive_ms,
            retry_delay_ms: 500,
            max_retries: 3,
            webhook_url: None,
            camera_bind_addr: "127.0.0.1:0".to_string(),
        }
    }

    async fn drain() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_emits_one_error_and_keeps_polling() {
        let monitor = PrinterMonitor::new(settings(3000, 3000));
        let mut rx = monitor.subscribe();

        let p1 = monitor
            .add_printer(details("p1"), Arc::new(FixedBackend { fail: true }))
            .await
            .unwrap();
        drain().await;

        // Walk through 4 consecutive failures: 2 retries at the retry
        // cadence, the error after the 3rd, then a 4th tick at the normal
        // interval.
        tokio::time::advance(Duration::from_millis(500)).await;
        drain().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        drain().await;
        tokio::time::advance(Duration::from_millis(3000)).await;
        drain().await;

        let mut error_count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MonitorEvent::PollingError { .. }) {
                error_count += 1;
            }
        }
        assert_eq!(error_count, 1);
        assert!(monitor.is_polling(&p1));

        monitor.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_swaps_on_switch() {
        let monitor = PrinterMonitor::new(settings(3000, 12000));
        let p1 = monitor
            .add_printer(details("p1"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();
        let p2 = monitor
            .add_printer(details("p2"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();

        let status = monitor.status();
        let interval_of = |status: &CoordinatorStatus, id: &str| {
            status
                .pollers
                .iter()
                .find(|p| p.context_id == id)
                .unwrap()
                .interval_ms
        };
        assert_eq!(interval_of(&status, &p1), 3000);
        assert_eq!(interval_of(&status, &p2), 12000);

        monitor.switch_to(&p2).unwrap();
        let status = monitor.status();
        assert_eq!(interval_of(&status, &p1), 12000);
        assert_eq!(interval_of(&status, &p2), 3000);

        monitor.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_yields_cached_snapshot_before_next_tick() {
        let monitor = PrinterMonitor::new(settings(3000, 3000));
        let p1 = monitor
            .add_printer(details("p1"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();
        let p2 = monitor
            .add_printer(details("p2"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();
        drain().await; // first ticks fill both caches

        let mut rx = monitor.subscribe();
        monitor.switch_to(&p2).unwrap();

        // Cached data is available synchronously, without another tick.
        assert!(monitor.polling_data(&p2).is_some());
        let mut saw_cached_emission = false;
        while let Ok(event) = rx.try_recv() {
            if let MonitorEvent::PollingData { context_id, .. } = event {
                if context_id == p2 {
                    saw_cached_emission = true;
                }
            }
        }
        assert!(saw_cached_emission);
        assert_eq!(monitor.active_context_id(), Some(p2.clone()));

        monitor.dispose();
        let _ = p1;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_releases_all_resources_and_promotes_replacement() {
        let monitor = PrinterMonitor::new(settings(3000, 12000));
        let p1 = monitor
            .add_printer(details("p1"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();
        let p2 = monitor
            .add_printer(details("p2"), Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();

        monitor
            .configure_camera(&p1, "http://127.0.0.1:9/stream".to_string())
            .await
            .unwrap();
        monitor
            .configure_notifications(
                &p1,
                NotificationParams {
                    webhook_url: "https://discord.example/hook".to_string(),
                    notify_on_complete: true,
                    notify_on_error: true,
                    status_interval: None,
                },
            )
            .unwrap();
        assert!(monitor.camera_addr(&p1).is_some());

        monitor.remove_printer(&p1);

        assert!(!monitor.is_polling(&p1));
        assert!(monitor.camera_addr(&p1).is_none());
        // p2 was promoted and retuned to the active cadence.
        assert_eq!(monitor.active_context_id(), Some(p2.clone()));
        let status = monitor.status();
        assert_eq!(status.pollers[0].context_id, p2);
        assert_eq!(status.pollers[0].interval_ms, 3000);

        monitor.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_printer_is_noop() {
        let monitor = PrinterMonitor::new(settings(3000, 3000));
        monitor.remove_printer("never-existed");
        assert!(monitor.all_contexts().is_empty());
        monitor.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_failure_does_not_block_polling() {
        let mut cfg = settings(3000, 3000);
        cfg.camera_bind_addr = "not-an-address".to_string();
        let monitor = PrinterMonitor::new(cfg);
        let mut rx = monitor.subscribe();

        let mut printer = details("p1");
        printer.camera_stream_url = Some("http://10.0.0.5:8080/?action=stream".to_string());
        let p1 = monitor
            .add_printer(printer, Arc::new(FixedBackend { fail: false }))
            .await
            .unwrap();

        // Polling is up even though camera setup failed.
        assert!(monitor.is_polling(&p1));
        assert!(monitor.camera_addr(&p1).is_none());

        let mut saw_resource_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MonitorEvent::ResourceError { ref resource, .. } if resource == "camera")
            {
                saw_resource_error = true;
            }
        }
        assert!(saw_resource_error);

        monitor.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_resources_for_unknown_context_fails() {
        let monitor = PrinterMonitor::new(settings(3000, 3000));

        let err = monitor
            .configure_camera("missing", "http://x/stream".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Registry(RegistryError::NotFound(_))));

        let err = monitor
            .configure_notifications(
                "missing",
                NotificationParams {
                    webhook_url: "https://discord.example/hook".to_string(),
                    notify_on_complete: true,
                    notify_on_error: true,
                    status_interval: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Registry(RegistryError::NotFound(_))));

        monitor.dispose();
    }
}
