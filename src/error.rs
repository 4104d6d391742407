//! Error types shared across the worker.

use thiserror::Error;

use crate::container::ContainerError;
use crate::events::ProgressClosed;
use crate::server_api::ServerApiError;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode { key: String },
}

/// Reasons a server could not be provisioned.
///
/// Every variant means the instance was rolled back: its port offset is free
/// again and no monitor was started.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Shutdown has been broadcast; no new instances are accepted.
    #[error("Worker is shutting down")]
    ShuttingDown,

    /// Every port offset is in use.
    #[error("No free port offsets")]
    PortsExhausted,

    /// Pull, create or start of the container failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The server API never answered its liveness probe.
    #[error("Server did not become ready: {0}")]
    NotReady(#[source] ServerApiError),

    /// Applying the server settings failed.
    #[error("Failed to configure server: {0}")]
    Configure(#[source] ServerApiError),

    /// The requester stopped listening.
    #[error(transparent)]
    ProgressClosed(#[from] ProgressClosed),
}
