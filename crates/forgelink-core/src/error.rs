//! Error types for ForgeLink core.

use thiserror::Error;

/// Core error type for monitor operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Polling error: {0}")]
    Polling(#[from] PollingError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Context registry errors.
///
/// Registry mutations are synchronous and in-memory, so everything here is
/// "id not found" class — caller bugs, never retried.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Context not found: {0}")]
    NotFound(String),
}

/// Polling lifecycle errors.
#[derive(Debug, Error)]
pub enum PollingError {
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    #[error("Backend for context {0} is not ready")]
    BackendNotReady(String),
}

/// Errors from a context's backend accessor during a poll tick.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Printer {address} is offline")]
    Offline { address: String },

    #[error("Request to {address} failed: {message}")]
    Request { address: String, message: String },

    #[error("Request to {address} timed out")]
    Timeout { address: String },
}

/// Per-context resource errors (camera relay, notifier).
///
/// These are non-fatal to polling and to other resources of the same
/// context; the owning layer logs them and surfaces a `ResourceError` event.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Camera relay for context {context_id} failed to bind {bind_addr}: {source}")]
    CameraBind {
        context_id: String,
        bind_addr: String,
        source: std::io::Error,
    },

    #[error("Webhook delivery for context {context_id} failed: {message}")]
    WebhookFailed { context_id: String, message: String },

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),
}

/// Settings storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to resolve settings directory")]
    DirectoryUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
