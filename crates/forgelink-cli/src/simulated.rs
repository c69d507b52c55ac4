//! Scripted printer backend for demos and soak testing.
//!
//! Walks a fixed lifecycle on every status fetch: idle, heat up, print a
//! job to completion, return to idle, repeat. Optionally injects random
//! fetch failures to exercise the core's retry path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use forgelink_core::backend::PrinterBackend;
use forgelink_core::error::BackendError;
use forgelink_core::types::{
    JobInfo, MachineState, MaterialSlot, MaterialStationStatus, PrinterStatus,
};

/// Ticks spent idle before a job starts.
const IDLE_TICKS: u64 = 2;
/// Ticks spent heating.
const HEATING_TICKS: u64 = 2;
/// Ticks a print job runs for.
const PRINT_TICKS: u64 = 20;
/// Full cycle length.
const CYCLE_TICKS: u64 = IDLE_TICKS + HEATING_TICKS + PRINT_TICKS + 1;

/// 1x1 transparent PNG, stands in for a real model preview.
const PREVIEW_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub struct SimulatedPrinter {
    name: String,
    tick: AtomicU64,
    failure_rate: f64,
    has_material_station: bool,
}

impl SimulatedPrinter {
    pub fn new(name: impl Into<String>, failure_rate: f64, has_material_station: bool) -> Self {
        Self {
            name: name.into(),
            tick: AtomicU64::new(0),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            has_material_station,
        }
    }

    fn status_for_tick(&self, tick: u64) -> PrinterStatus {
        let phase = tick % CYCLE_TICKS;

        if phase < IDLE_TICKS {
            return PrinterStatus {
                machine_state: MachineState::Ready,
                bed_temp: 25.0,
                bed_target: 0.0,
                nozzle_temp: 26.0,
                nozzle_target: 0.0,
                current_job: None,
            };
        }

        if phase < IDLE_TICKS + HEATING_TICKS {
            let ramp = (phase - IDLE_TICKS + 1) as f32 / HEATING_TICKS as f32;
            return PrinterStatus {
                machine_state: MachineState::Heating,
                bed_temp: 25.0 + ramp * 35.0,
                bed_target: 60.0,
                nozzle_temp: 26.0 + ramp * 184.0,
                nozzle_target: 210.0,
                current_job: None,
            };
        }

        if phase < IDLE_TICKS + HEATING_TICKS + PRINT_TICKS {
            let done = (phase - IDLE_TICKS - HEATING_TICKS) as f32;
            let progress = (done / PRINT_TICKS as f32) * 100.0;
            return PrinterStatus {
                machine_state: MachineState::Printing,
                bed_temp: 60.0,
                bed_target: 60.0,
                nozzle_temp: 210.0,
                nozzle_target: 210.0,
                current_job: Some(JobInfo {
                    file_name: format!("{}-benchy.3mf", self.name),
                    progress_percent: progress,
                    current_layer: Some(done as u32 * 10),
                    total_layers: Some(PRINT_TICKS as u32 * 10),
                    elapsed_seconds: Some(done as u64 * 30),
                    remaining_seconds: Some((PRINT_TICKS - done as u64) * 30),
                }),
            };
        }

        // Cooldown tick back to idle.
        PrinterStatus {
            machine_state: MachineState::Ready,
            bed_temp: 45.0,
            bed_target: 0.0,
            nozzle_temp: 80.0,
            nozzle_target: 0.0,
            current_job: None,
        }
    }
}

#[async_trait]
impl PrinterBackend for SimulatedPrinter {
    fn is_ready(&self) -> bool {
        true
    }

    async fn printer_status(&self) -> Result<PrinterStatus, BackendError> {
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(BackendError::Timeout {
                address: format!("sim://{}", self.name),
            });
        }
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        Ok(self.status_for_tick(tick))
    }

    async fn material_station_status(
        &self,
    ) -> Result<Option<MaterialStationStatus>, BackendError> {
        if !self.has_material_station {
            return Ok(None);
        }
        Ok(Some(MaterialStationStatus {
            slots: vec![
                MaterialSlot {
                    slot_id: 0,
                    material_type: Some("PLA".to_string()),
                    color: Some("#e63946".to_string()),
                    has_filament: true,
                },
                MaterialSlot {
                    slot_id: 1,
                    material_type: Some("PETG".to_string()),
                    color: Some("#457b9d".to_string()),
                    has_filament: true,
                },
                MaterialSlot {
                    slot_id: 2,
                    material_type: None,
                    color: None,
                    has_filament: false,
                },
                MaterialSlot {
                    slot_id: 3,
                    material_type: None,
                    color: None,
                    has_filament: false,
                },
            ],
            active_slot: Some(0),
        }))
    }

    async fn model_preview(&self) -> Result<Option<String>, BackendError> {
        Ok(Some(PREVIEW_PNG_BASE64.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_reaches_printing_and_returns_to_idle() {
        let sim = SimulatedPrinter::new("test", 0.0, false);

        let mut states = Vec::new();
        for _ in 0..CYCLE_TICKS {
            states.push(sim.printer_status().await.unwrap().machine_state);
        }

        assert_eq!(states.first(), Some(&MachineState::Ready));
        assert!(states.contains(&MachineState::Heating));
        assert!(states.contains(&MachineState::Printing));
        assert_eq!(states.last(), Some(&MachineState::Ready));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_within_a_job() {
        let sim = SimulatedPrinter::new("test", 0.0, false);

        let mut last_progress = -1.0f32;
        for _ in 0..CYCLE_TICKS {
            let status = sim.printer_status().await.unwrap();
            if let Some(job) = status.current_job {
                assert!(job.progress_percent >= last_progress);
                last_progress = job.progress_percent;
            }
        }
        assert!(last_progress > 90.0);
    }

    #[tokio::test]
    async fn test_always_failing_backend_fails() {
        let sim = SimulatedPrinter::new("test", 1.0, false);
        assert!(sim.printer_status().await.is_err());
    }

    #[tokio::test]
    async fn test_material_station_is_optional() {
        let with = SimulatedPrinter::new("a", 0.0, true);
        let without = SimulatedPrinter::new("b", 0.0, false);
        assert!(with.material_station_status().await.unwrap().is_some());
        assert!(without.material_station_status().await.unwrap().is_none());
    }
}
