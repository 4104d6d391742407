//! Start requests and the progress events streamed back to the requester.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Request to start a new server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Name appended to the display-name prefix.
    pub name: String,
}

/// Provisioning stage reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEventType {
    /// The server image is being pulled.
    ImagePull,
    /// The container is being created and started.
    ContainerStart,
    /// Waiting for the server API and applying configuration.
    SettingUpServer,
    /// The server is configured and accepting players. Always the last event.
    ServerReady,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: ServerEventType,
    pub message: String,
}

impl ServerEvent {
    pub fn new(event_type: ServerEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
        }
    }
}

/// The receiving side of a progress stream went away.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("progress receiver closed")]
pub struct ProgressClosed;

/// Destination for provisioning progress.
///
/// A closed sink aborts provisioning: nobody is left to hand the server to.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send_event(&self, event: ServerEvent) -> Result<(), ProgressClosed>;
}

#[async_trait]
impl ProgressSink for mpsc::Sender<ServerEvent> {
    async fn send_event(&self, event: ServerEvent) -> Result<(), ProgressClosed> {
        self.send(event).await.map_err(|_| ProgressClosed)
    }
}
