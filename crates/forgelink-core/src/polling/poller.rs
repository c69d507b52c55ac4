//! Per-context polling loop.
//!
//! One poller repeatedly fetches status, material-station and preview data
//! for a single printer on a timer, with bounded retry on transient
//! failure. The whole tick pipeline runs on a single task per poller, so
//! overlapping ticks are structurally impossible.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::backend::BackendHandle;
use crate::error::BackendError;
use crate::types::StatusSnapshot;

/// Scheduling knobs for one polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// Delay between successful ticks.
    pub interval: Duration,
    /// Delay before a retry after a failed tick. Shorter than `interval`
    /// so the poller recovers quickly from blips.
    pub retry_delay: Duration,
    /// Consecutive failures tolerated before a `polling_error` is surfaced.
    pub max_retries: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            retry_delay: Duration::from_millis(2000),
            max_retries: 3,
        }
    }
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollerSettingsUpdate {
    pub interval: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub max_retries: Option<u32>,
}

/// Consumer of one poller's output. The coordinator implements this to tag
/// events with the owning context's id before re-emitting them.
pub trait PollSink: Send + Sync + 'static {
    fn data_updated(&self, snapshot: &StatusSnapshot);
    fn polling_error(&self, message: &str);
}

struct PollerShared {
    settings: Mutex<PollerSettings>,
    last_data: Mutex<Option<StatusSnapshot>>,
    running: AtomicBool,
    /// Bumped on every start/stop. A loop (or in-flight tick) belonging to
    /// an older generation discards its result instead of emitting it.
    generation: AtomicU64,
    wake: Notify,
}

/// Adaptive polling loop for one context.
pub struct ContextPoller {
    shared: Arc<PollerShared>,
    backend: BackendHandle,
    sink: Arc<dyn PollSink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ContextPoller {
    pub fn new(backend: BackendHandle, sink: Arc<dyn PollSink>, settings: PollerSettings) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                settings: Mutex::new(settings),
                last_data: Mutex::new(None),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
            }),
            backend,
            sink,
            task: Mutex::new(None),
        }
    }

    /// Start the polling loop. The first tick runs immediately rather than
    /// after a full interval, so first data arrives as fast as possible.
    ///
    /// Returns `false` if the poller is already running.
    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            run_loop(shared, backend, sink, generation).await;
        });
        *self.task.lock().unwrap() = Some(handle);
        true
    }

    /// Stop the polling loop. Safe to call when already stopped.
    ///
    /// Any in-flight backend call is allowed to run to completion in the
    /// background; its result is discarded, never emitted.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Invalidate the current generation so an in-flight tick's result
        // is dropped, then wake the loop out of any pending wait.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
        self.task.lock().unwrap().take();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Apply new scheduling settings. Takes effect when the next tick is
    /// scheduled; a tick already in flight is never interrupted.
    pub fn update_settings(&self, update: PollerSettingsUpdate) {
        let mut settings = self.shared.settings.lock().unwrap();
        if let Some(interval) = update.interval {
            settings.interval = interval;
        }
        if let Some(retry_delay) = update.retry_delay {
            settings.retry_delay = retry_delay;
        }
        if let Some(max_retries) = update.max_retries {
            settings.max_retries = max_retries;
        }
    }

    pub fn settings(&self) -> PollerSettings {
        *self.shared.settings.lock().unwrap()
    }

    /// Last successfully fetched snapshot, if any. Serves instant UI
    /// updates on context switch without waiting for the next tick.
    pub fn current_data(&self) -> Option<StatusSnapshot> {
        self.shared.last_data.lock().unwrap().clone()
    }
}

fn still_current(shared: &PollerShared, generation: u64) -> bool {
    shared.running.load(Ordering::SeqCst) && shared.generation.load(Ordering::SeqCst) == generation
}

async fn run_loop(
    shared: Arc<PollerShared>,
    backend: BackendHandle,
    sink: Arc<dyn PollSink>,
    generation: u64,
) {
    let mut retries: u32 = 0;

    loop {
        if !still_current(&shared, generation) {
            break;
        }

        let result = poll_once(&backend).await;

        // Stopped while the tick was in flight: discard the result.
        if !still_current(&shared, generation) {
            break;
        }

        let delay = match result {
            Ok(snapshot) => {
                retries = 0;
                *shared.last_data.lock().unwrap() = Some(snapshot.clone());
                sink.data_updated(&snapshot);
                shared.settings.lock().unwrap().interval
            }
            Err(err) => {
                retries += 1;
                let settings = *shared.settings.lock().unwrap();
                if retries < settings.max_retries {
                    trace!(attempt = retries, error = %err, "poll tick failed, retrying");
                    settings.retry_delay
                } else {
                    // Retry streak exhausted: surface the failure once and
                    // fall back to the normal schedule. Polling is a
                    // standing monitor and never gives up permanently.
                    debug!(attempts = retries, error = %err, "poll retries exhausted");
                    sink.polling_error(&err.to_string());
                    retries = 0;
                    settings.interval
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.wake.notified() => {}
        }
    }
}

/// One poll tick: status is required; material station and preview are
/// optional capabilities whose failures degrade to "no data".
async fn poll_once(backend: &BackendHandle) -> Result<StatusSnapshot, BackendError> {
    let status = backend.printer_status().await?;

    let material_station = match backend.material_station_status().await {
        Ok(station) => station,
        Err(err) => {
            debug!(error = %err, "material station fetch failed");
            None
        }
    };

    // Preview fetches are skipped entirely when no job is running.
    let preview = if status.is_printing() {
        match backend.model_preview().await {
            Ok(preview) => preview,
            Err(err) => {
                debug!(error = %err, "model preview fetch failed");
                None
            }
        }
    } else {
        None
    };

    Ok(StatusSnapshot {
        status,
        material_station,
        preview,
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrinterBackend;
    use crate::types::{JobInfo, MachineState, PrinterStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn ready_status() -> PrinterStatus {
        PrinterStatus {
            machine_state: MachineState::Ready,
            bed_temp: 25.0,
            bed_target: 0.0,
            nozzle_temp: 26.0,
            nozzle_target: 0.0,
            current_job: None,
        }
    }

    fn printing_status() -> PrinterStatus {
        PrinterStatus {
            machine_state: MachineState::Printing,
            bed_temp: 60.0,
            bed_target: 60.0,
            nozzle_temp: 210.0,
            nozzle_target: 210.0,
            current_job: Some(JobInfo {
                file_name: "part.3mf".to_string(),
                progress_percent: 10.0,
                current_layer: Some(5),
                total_layers: Some(50),
                elapsed_seconds: Some(60),
                remaining_seconds: Some(540),
            }),
        }
    }

    /// Backend whose status calls can be gated on a manual permit and whose
    /// call count is observable.
    struct ScriptedBackend {
        status_calls: AtomicUsize,
        preview_calls: AtomicUsize,
        fail: AtomicBool,
        printing: bool,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedBackend {
        fn ok() -> Self {
            Self {
                status_calls: AtomicUsize::new(0),
                preview_calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                printing: false,
                gate: None,
            }
        }

        fn failing() -> Self {
            let backend = Self::ok();
            backend.fail.store(true, Ordering::SeqCst);
            backend
        }

        fn gated(gate: Arc<Notify>) -> Self {
            let mut backend = Self::ok();
            backend.gate = Some(gate);
            backend
        }

        fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PrinterBackend for ScriptedBackend {
        fn is_ready(&self) -> bool {
            true
        }

        async fn printer_status(&self) -> Result<PrinterStatus, BackendError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Offline {
                    address: "10.0.0.1".to_string(),
                });
            }
            Ok(if self.printing {
                printing_status()
            } else {
                ready_status()
            })
        }

        async fn model_preview(&self) -> Result<Option<String>, BackendError> {
            self.preview_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("cHJldmlldw==".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        data: Mutex<Vec<StatusSnapshot>>,
        errors: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn data_count(&self) -> usize {
            self.data.lock().unwrap().len()
        }

        fn error_count(&self) -> usize {
            self.errors.lock().unwrap().len()
        }
    }

    impl PollSink for RecordingSink {
        fn data_updated(&self, snapshot: &StatusSnapshot) {
            self.data.lock().unwrap().push(snapshot.clone());
        }

        fn polling_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn settings_ms(interval: u64, retry: u64, max_retries: u32) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(interval),
            retry_delay: Duration::from_millis(retry),
            max_retries,
        }
    }

    /// Let spawned tasks run without advancing the (paused) clock.
    async fn drain() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let backend = Arc::new(ScriptedBackend::ok());
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(3000, 500, 3));

        assert!(poller.start());
        drain().await;

        // No time has passed, yet the first snapshot is already in.
        assert_eq!(backend.status_calls(), 1);
        assert_eq!(sink.data_count(), 1);
        assert!(poller.current_data().is_some());

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::ok());
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend, sink, PollerSettings::default());

        assert!(poller.start());
        assert!(!poller.start());
        assert!(poller.is_running());

        poller.stop();
        poller.stop(); // safe when already stopped
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlapping_ticks_with_slow_backend() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend::gated(gate.clone()));
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(1000, 500, 3));

        poller.start();
        drain().await;
        assert_eq!(backend.status_calls(), 1);

        // The first call is still in flight; several intervals elapsing must
        // not start a second concurrent call for the same context.
        tokio::time::advance(Duration::from_millis(5000)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 1);

        // Release the call; the next tick is scheduled normally.
        gate.notify_waiters();
        drain().await;
        assert_eq!(sink.data_count(), 1);
        tokio::time::advance(Duration::from_millis(1000)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 2);

        poller.stop();
        gate.notify_waiters();
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_discarded_after_stop() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend::gated(gate.clone()));
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(1000, 500, 3));

        poller.start();
        drain().await;
        assert_eq!(backend.status_calls(), 1);

        // Stop while the tick is in flight, then let the call complete.
        poller.stop();
        gate.notify_waiters();
        drain().await;

        assert_eq!(sink.data_count(), 0);
        assert!(poller.current_data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_schedule_and_single_error_per_streak() {
        let backend = Arc::new(ScriptedBackend::failing());
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(3000, 500, 3));

        poller.start();
        drain().await;
        // Failure 1: retry scheduled after retry_delay, not interval.
        assert_eq!(backend.status_calls(), 1);
        assert_eq!(sink.error_count(), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 2);
        assert_eq!(sink.error_count(), 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        drain().await;
        // Failure 3 exhausts the streak: exactly one error, back to the
        // normal interval.
        assert_eq!(backend.status_calls(), 3);
        assert_eq!(sink.error_count(), 1);

        // Not rescheduled at retry cadence anymore.
        tokio::time::advance(Duration::from_millis(500)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 3);

        // ...but polling continues on the normal schedule (4th tick fires).
        tokio::time::advance(Duration::from_millis(2500)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 4);
        assert_eq!(sink.error_count(), 1);
        assert!(poller.is_running());

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_update_applies_to_next_scheduled_tick() {
        let backend = Arc::new(ScriptedBackend::ok());
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(1000, 500, 3));

        poller.start();
        drain().await;
        assert_eq!(backend.status_calls(), 1);

        // Tick 1 already scheduled its wait at the old interval.
        poller.update_settings(PollerSettingsUpdate {
            interval: Some(Duration::from_millis(5000)),
            ..Default::default()
        });
        tokio::time::advance(Duration::from_millis(1000)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 2);

        // Tick 2 scheduled at the new interval.
        tokio::time::advance(Duration::from_millis(1000)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 2);

        tokio::time::advance(Duration::from_millis(4000)).await;
        drain().await;
        assert_eq!(backend.status_calls(), 3);
        assert_eq!(
            poller.settings().interval,
            Duration::from_millis(5000)
        );

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_skipped_when_idle() {
        let backend = Arc::new(ScriptedBackend::ok());
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(1000, 500, 3));

        poller.start();
        drain().await;

        assert_eq!(backend.status_calls(), 1);
        assert_eq!(backend.preview_calls.load(Ordering::SeqCst), 0);
        assert!(poller.current_data().unwrap().preview.is_none());

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_fetched_while_printing() {
        let mut backend = ScriptedBackend::ok();
        backend.printing = true;
        let backend = Arc::new(backend);
        let sink = Arc::new(RecordingSink::default());
        let poller = ContextPoller::new(backend.clone(), sink.clone(), settings_ms(1000, 500, 3));

        poller.start();
        drain().await;

        assert_eq!(backend.preview_calls.load(Ordering::SeqCst), 1);
        assert!(poller.current_data().unwrap().preview.is_some());

        poller.stop();
    }
}
