//! Abstract container runtime consumed by the orchestrator.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::container::error::RuntimeError;

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A container port published on the host under the same number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    pub port: u16,
    pub protocol: Protocol,
    /// Host interface to bind, e.g. `127.0.0.1` or `0.0.0.0`.
    pub host_ip: String,
}

impl PublishedPort {
    /// Runtime key for this port, e.g. `8080/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.port, self.protocol.as_str())
    }
}

/// A read-write bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub ports: Vec<PublishedPort>,
    pub mounts: Vec<BindMount>,
    pub labels: HashMap<String, String>,
    pub cmd: Vec<String>,
    /// Remove the container as soon as it exits.
    pub auto_remove: bool,
    /// Grace period between the stop signal and a forced kill.
    pub stop_timeout: Duration,
}

/// Raw outcome of waiting on a container, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub status_code: i64,
    /// Error the runtime attached to the exit, if any.
    pub error: Option<String>,
}

/// Operations the worker needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, yielding one progress line per item until the pull ends.
    fn pull_image(&self, image: &str) -> BoxStream<'static, Result<String, RuntimeError>>;

    /// Create a container and return its id. The container is not started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container. `None` uses the stop timeout it was created with.
    async fn stop_container(&self, id: &str, timeout: Option<Duration>)
    -> Result<(), RuntimeError>;

    /// Forcefully remove a container that will not be removed on its own.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Block until the container is no longer running.
    async fn wait_container(&self, id: &str) -> Result<WaitOutcome, RuntimeError>;

    /// Ids of all running containers carrying `label`.
    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError>;
}
