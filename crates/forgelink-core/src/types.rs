//! Shared printer data model.
//!
//! Everything here crosses the event bus and (in the embedding application)
//! an IPC boundary, so all types are `Clone + Serialize` with camelCase
//! field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// High-level machine state reported by a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MachineState {
    Ready,
    Heating,
    Printing,
    Paused,
    Busy,
    Error,
    Unknown,
}

impl MachineState {
    pub fn display_name(&self) -> &'static str {
        match self {
            MachineState::Ready => "Ready",
            MachineState::Heating => "Heating",
            MachineState::Printing => "Printing",
            MachineState::Paused => "Paused",
            MachineState::Busy => "Busy",
            MachineState::Error => "Error",
            MachineState::Unknown => "Unknown",
        }
    }
}

/// Details of the job a printer is currently running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub file_name: String,
    /// 0.0 - 100.0
    pub progress_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_layer: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_layers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

/// Status fetched from a printer on every poll tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    pub machine_state: MachineState,
    pub bed_temp: f32,
    pub bed_target: f32,
    pub nozzle_temp: f32,
    pub nozzle_target: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobInfo>,
}

impl PrinterStatus {
    /// True while a job is actively printing; used to skip preview fetches
    /// when there is nothing to preview.
    pub fn is_printing(&self) -> bool {
        matches!(
            self.machine_state,
            MachineState::Printing | MachineState::Paused
        ) && self.current_job.is_some()
    }
}

/// One slot of a material station (multi-spool feeder).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSlot {
    pub slot_id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub has_filament: bool,
}

/// Material station status, reported only by printers that have one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialStationStatus {
    pub slots: Vec<MaterialSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_slot: Option<u8>,
}

/// Merged result of one successful poll tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: PrinterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_station: Option<MaterialStationStatus>,
    /// Base64-encoded preview image of the current model, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Connection details for one printer, supplied when a context is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterDetails {
    /// Display name shown to the user.
    pub name: String,
    /// Network address of the printer.
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// MJPEG stream URL for the printer's camera, if it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_stream_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_status() -> PrinterStatus {
        PrinterStatus {
            machine_state: MachineState::Ready,
            bed_temp: 24.5,
            bed_target: 0.0,
            nozzle_temp: 26.0,
            nozzle_target: 0.0,
            current_job: None,
        }
    }

    #[test]
    fn test_is_printing() {
        let mut status = idle_status();
        assert!(!status.is_printing());

        status.machine_state = MachineState::Printing;
        // Printing state without job info still skips previews
        assert!(!status.is_printing());

        status.current_job = Some(JobInfo {
            file_name: "benchy.3mf".to_string(),
            progress_percent: 42.0,
            current_layer: Some(57),
            total_layers: Some(200),
            elapsed_seconds: Some(1200),
            remaining_seconds: Some(1650),
        });
        assert!(status.is_printing());

        status.machine_state = MachineState::Paused;
        assert!(status.is_printing());
    }

    #[test]
    fn test_status_serialization_is_camel_case() {
        let status = idle_status();
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("machineState"));
        assert!(json.contains("bedTemp"));
        // Absent job is omitted entirely
        assert!(!json.contains("currentJob"));
    }
}
