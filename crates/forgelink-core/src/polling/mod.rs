//! Adaptive multi-printer polling.
//!
//! `poller` runs the single-context loop; `coordinator` owns one poller per
//! registered context and keeps each poller's cadence in sync with
//! foreground/background status.

pub mod coordinator;
pub mod poller;

pub use coordinator::{CoordinatorSettings, CoordinatorStatus, PollingCoordinator};
pub use poller::{ContextPoller, PollSink, PollerSettings, PollerSettingsUpdate};
