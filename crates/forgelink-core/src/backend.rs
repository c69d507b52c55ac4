//! Backend accessor interface.
//!
//! Each context carries a capability-bearing handle used by its poller to
//! fetch printer data. The transport behind it (FlashForge TCP API, cloud
//! relay, simulator) is an external concern; the core only sees this trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BackendError;
use crate::types::{MaterialStationStatus, PrinterStatus};

/// Capability interface a context's backend must satisfy.
///
/// `material_station_status` and `model_preview` are optional capabilities:
/// the default implementations report the feature as unsupported, which the
/// poller treats as "no data", never as an error.
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    /// Whether the underlying connection is established and usable.
    ///
    /// Pollers must not be created against a backend that is not ready.
    fn is_ready(&self) -> bool;

    /// Fetch the printer's current status. Required capability.
    async fn printer_status(&self) -> Result<PrinterStatus, BackendError>;

    /// Fetch material station status, for printers that have one.
    async fn material_station_status(
        &self,
    ) -> Result<Option<MaterialStationStatus>, BackendError> {
        Ok(None)
    }

    /// Fetch a base64-encoded preview image of the current model.
    async fn model_preview(&self) -> Result<Option<String>, BackendError> {
        Ok(None)
    }
}

/// Shared backend handle stored in the registry.
pub type BackendHandle = Arc<dyn PrinterBackend>;
