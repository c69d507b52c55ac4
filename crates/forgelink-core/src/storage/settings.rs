//! Monitor settings persisted as JSON in a platform data directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::error::StorageError;
use crate::polling::CoordinatorSettings;

const SETTINGS_FILE: &str = "settings.json";

/// User-tunable monitor settings.
///
/// Active and inactive cadences are independent knobs. They default to the
/// same value: background contexts still need frequent-enough polling to
/// keep their transport connection alive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    pub active_interval_ms: u64,
    pub inactive_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    /// Default Discord webhook URL applied to new contexts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Address camera relays bind to; port 0 picks ephemeral ports.
    pub camera_bind_addr: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            active_interval_ms: 3000,
            inactive_interval_ms: 3000,
            retry_delay_ms: 2000,
            max_retries: 3,
            webhook_url: None,
            camera_bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

impl MonitorSettings {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            active_interval: Duration::from_millis(self.active_interval_ms),
            inactive_interval: Duration::from_millis(self.inactive_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

/// File-based settings storage.
///
/// Takes the directory in the constructor so each consumer (GUI shell, CLI,
/// tests) can provide the correct path.
pub struct SettingsStorage {
    dir: PathBuf,
}

impl SettingsStorage {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Platform data directory for this application.
    pub fn default_dir() -> Result<PathBuf, StorageError> {
        directories::ProjectDirs::from("io", "forgelink", "forgelink")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(StorageError::DirectoryUnavailable)
    }

    fn path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    /// Load settings, falling back to defaults when no file exists yet.
    pub async fn load(&self) -> Result<MonitorSettings, StorageError> {
        let path = self.path();
        if !path.exists() {
            return Ok(MonitorSettings::default());
        }
        let content = fs::read_to_string(&path).await?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub async fn save(&self, settings: &MonitorSettings) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.path(), content).await?;
        Ok(())
    }
}
