//! Response bodies of the control surface.

use serde::{Deserialize, Serialize};

/// Payload of the `error` event that ends a failed start stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `shutting_down` once no new servers are accepted.
    pub status: String,
    pub active_instances: usize,
}
