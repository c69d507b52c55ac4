//! Local persistence for monitor settings.

pub mod settings;

pub use settings::{MonitorSettings, SettingsStorage};
