//! ForgeLink core — multi-printer polling and notification coordination.
//!
//! Tracks several independently-connected 3D printers concurrently, polls
//! each on its own adaptive schedule (fast for the foregrounded printer,
//! throttled for background ones), merges per-printer state into isolated
//! contexts, and fans state-change events out to consumers without
//! cross-talk between printers. Each context exclusively owns its
//! sub-resources (camera relay, webhook notifier), torn down independently.
//!
//! The embedding application (GUI shell, web companion, CLI) constructs one
//! [`monitor::PrinterMonitor`] at startup and relays its event stream over
//! whatever transport it uses.

pub mod backend;
pub mod context;
pub mod error;
pub mod events;
pub mod monitor;
pub mod polling;
pub mod resources;
pub mod storage;
pub mod types;

pub use backend::{BackendHandle, PrinterBackend};
pub use error::{CoreError, Result};
pub use events::{EventBus, MonitorEvent};
pub use monitor::PrinterMonitor;
pub use storage::MonitorSettings;
