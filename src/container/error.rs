//! Error types for container orchestration.

use thiserror::Error;

use crate::events::ProgressClosed;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors reported by a [`ContainerRuntime`](super::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Could not reach or configure the runtime client.
    #[error("Container runtime not available: {reason}")]
    Unavailable {
        /// Reason why the runtime is unavailable.
        reason: String,
    },

    /// The referenced container does not exist.
    #[error("No such container: {id}")]
    NotFound {
        /// Container id.
        id: String,
    },

    /// Any other error returned by the runtime API.
    #[error("Container runtime request failed: {0}")]
    Api(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound { id: message },
            other => RuntimeError::Api(other.to_string()),
        }
    }
}

/// Errors that can occur while driving a server container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container for '{image}': {reason}")]
    ContainerCreationFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{id}': {reason}")]
    ContainerStartFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// A base port plus the offset does not fit in a port number.
    #[error("Port offset {offset} is beyond the configured port range")]
    PortOutOfRange {
        /// Offset that overflowed.
        offset: u16,
    },

    /// An operation needed a running container but none was started.
    #[error("Container has not been started")]
    NotStarted,

    /// The caller stopped listening for progress.
    #[error("Progress stream closed: {0}")]
    ProgressClosed(#[from] ProgressClosed),

    /// Runtime error outside the start sequence (stop, list).
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
