//! Printer context management.
//!
//! A context is one live printer connection session, independently polled
//! and resourced. The registry is the single source of truth for which
//! contexts exist and which one is foregrounded.

pub mod registry;

pub use registry::{ContextInfo, ContextRegistry, RemoveOutcome, SwitchOutcome};
