//! CLI command implementations.

mod monitor;
mod status;

pub use monitor::run_monitor;
pub use status::run_status;
