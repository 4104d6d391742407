//! Client for the HTTP API exposed by a running game server.
//!
//! The API listens on the instance's control port on loopback only. The
//! worker uses three calls: a liveness probe while provisioning, a settings
//! update to set the display name, and the player list for idle tracking.

pub mod client;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{ApiCredentials, HttpApiConnector, ServerApiClient};
pub use types::{Player, ServerSettings};

/// Result type for server API calls.
pub type Result<T> = std::result::Result<T, ServerApiError>;

/// Errors returned by the server API client.
#[derive(Debug, Error)]
pub enum ServerApiError {
    /// Transport or decoding failure.
    #[error("Server API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("Server API call '{endpoint}' failed with status {status}")]
    Status {
        /// Endpoint path relative to the API root.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The server did not come online in time.
    #[error("Server API did not come online within {0:?}")]
    NotReady(Duration),
}

/// Logical operations of the in-server API.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Poll the liveness endpoint until it answers 2xx or `timeout` passes.
    async fn wait_for_online(&self, timeout: Duration) -> Result<()>;

    /// Set the name shown in the server browser.
    async fn set_server_name(&self, name: &str) -> Result<()>;

    /// Currently connected players.
    async fn get_players(&self) -> Result<Vec<Player>>;
}

/// Creates API clients for instances given their control port.
pub trait ServerApiConnector: Send + Sync {
    fn connect(&self, api_port: u16) -> Arc<dyn ServerApi>;
}
