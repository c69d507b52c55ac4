//! Per-context resource managers.
//!
//! Each manager keys its state by context id and exposes idempotent
//! `setup` / `remove`. A resource is never shared across two context ids,
//! and a setup failure is non-fatal to polling and to the context's other
//! resources.

pub mod camera;
pub mod notify;

pub use camera::{CameraRelayManager, CameraRelayParams};
pub use notify::{NotificationManager, NotificationParams};
