//! Lifecycle of a single game server container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;

use crate::container::error::{ContainerError, Result, RuntimeError};
use crate::container::runtime::{
    BindMount, ContainerRuntime, ContainerSpec, Protocol, PublishedPort,
};
use crate::events::{ProgressSink, ServerEvent, ServerEventType};
use crate::ports::PortOffset;

/// Label attached to every server container so stale ones can be found.
pub const CONTAINER_LABEL: &str = "fso_server";

/// Settings shared by every server container this worker creates.
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Image to pull and run.
    pub image: String,
    /// Host port of the server API for offset 0.
    pub api_base_port: u16,
    /// Host port of the game (UDP) socket for offset 0.
    pub game_base_port: u16,
    /// Host directory with the game data.
    pub data_dir: String,
    /// Where the game data is mounted inside the container.
    pub data_mount: String,
    /// Grace period before the runtime kills a stopping container.
    pub stop_timeout: Duration,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "scpfs2open/fso-standalone:release".to_string(),
            api_base_port: 8080,
            game_base_port: 7808,
            data_dir: "/data/fso/fs2".to_string(),
            data_mount: "/fso".to_string(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// How a container's wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The runtime reported a clean exit with this status code.
    Code(i64),
    /// Waiting failed, or the runtime attached an error to the exit.
    Unknown,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{code}"),
            ExitStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One server container, from image pull to stop.
pub struct ServerContainer {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<ContainerSettings>,
    api_port: u16,
    game_port: u16,
    container_id: Option<String>,
}

impl ServerContainer {
    /// Fails with [`ContainerError::PortOutOfRange`] when either base plus
    /// `offset` passes 65535.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: Arc<ContainerSettings>,
        offset: PortOffset,
    ) -> Result<Self> {
        let out_of_range = || ContainerError::PortOutOfRange { offset };
        let api_port = settings
            .api_base_port
            .checked_add(offset)
            .ok_or_else(out_of_range)?;
        let game_port = settings
            .game_base_port
            .checked_add(offset)
            .ok_or_else(out_of_range)?;
        Ok(Self {
            api_port,
            game_port,
            runtime,
            settings,
            container_id: None,
        })
    }

    /// Host port of the server's HTTP API (bound to loopback).
    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    /// Host port of the game socket (bound to all interfaces).
    pub fn game_port(&self) -> u16 {
        self.game_port
    }

    /// Runtime id, set once the container has been created and started.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn image(&self) -> &str {
        &self.settings.image
    }

    /// Build the create request for this container.
    pub fn spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.settings.image.clone(),
            ports: vec![
                PublishedPort {
                    port: self.api_port,
                    protocol: Protocol::Tcp,
                    host_ip: "127.0.0.1".to_string(),
                },
                PublishedPort {
                    port: self.game_port,
                    protocol: Protocol::Udp,
                    host_ip: "0.0.0.0".to_string(),
                },
            ],
            mounts: vec![BindMount {
                source: self.settings.data_dir.clone(),
                target: self.settings.data_mount.clone(),
            }],
            labels: HashMap::from([(CONTAINER_LABEL.to_string(), String::new())]),
            cmd: vec!["-port".to_string(), self.game_port.to_string()],
            auto_remove: true,
            stop_timeout: self.settings.stop_timeout,
        }
    }

    /// Pull the image, then create and start the container.
    ///
    /// Reports `ImagePull` and `ContainerStart` to `progress`. If the
    /// container gets created but fails to start it is removed again; every
    /// other cleanup (ports, a started container) is up to the caller.
    pub async fn start(&mut self, progress: &dyn ProgressSink) -> Result<()> {
        let image = self.settings.image.clone();

        progress
            .send_event(ServerEvent::new(ServerEventType::ImagePull, &image))
            .await?;
        self.pull_image().await?;

        progress
            .send_event(ServerEvent::new(ServerEventType::ContainerStart, &image))
            .await?;

        let id = self
            .runtime
            .create_container(&self.spec())
            .await
            .map_err(|e| ContainerError::ContainerCreationFailed {
                image: image.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.runtime.start_container(&id).await {
            // Auto-remove only applies to containers that ran.
            if let Err(remove_err) = self.runtime.remove_container(&id).await {
                tracing::warn!(container = %id, "Failed to remove unstarted container: {}", remove_err);
            }
            return Err(ContainerError::ContainerStartFailed {
                id,
                reason: e.to_string(),
            });
        }

        tracing::info!(
            container = %id,
            api_port = self.api_port,
            game_port = self.game_port,
            "Started server container"
        );
        self.container_id = Some(id);
        Ok(())
    }

    /// Pull the image, logging every progress line.
    async fn pull_image(&self) -> Result<()> {
        let image = &self.settings.image;
        tracing::info!("Pulling image: {}", image);

        let mut stream = self.runtime.pull_image(image);
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => tracing::trace!("Docker: {}", line),
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    /// Resolve once the container stops running.
    ///
    /// The receiver always gets exactly one value: failures while waiting
    /// are logged and reported as [`ExitStatus::Unknown`].
    pub fn wait_for_not_running(&self) -> oneshot::Receiver<ExitStatus> {
        let (tx, rx) = oneshot::channel();
        let runtime = Arc::clone(&self.runtime);
        let container_id = self.container_id.clone();

        tokio::spawn(async move {
            let status = match container_id {
                None => {
                    tracing::error!("Cannot wait on a container that was never started");
                    ExitStatus::Unknown
                }
                Some(id) => match runtime.wait_container(&id).await {
                    Ok(outcome) => match outcome.error {
                        Some(message) => {
                            tracing::error!(container = %id, "Error on container exit: {}", message);
                            ExitStatus::Unknown
                        }
                        None => ExitStatus::Code(outcome.status_code),
                    },
                    Err(e) => {
                        tracing::error!(container = %id, "Failed to wait for container exit: {}", e);
                        ExitStatus::Unknown
                    }
                },
            };
            let _ = tx.send(status);
        });

        rx
    }

    /// Ask the runtime to stop the container. Not retried.
    pub async fn stop(&self) -> Result<()> {
        let id = self.container_id.as_deref().ok_or(ContainerError::NotStarted)?;
        self.runtime.stop_container(id, None).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ServerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContainer")
            .field("image", &self.settings.image)
            .field("api_port", &self.api_port)
            .field("game_port", &self.game_port)
            .field("container_id", &self.container_id)
            .finish()
    }
}

/// Stop every container left behind by a previous run.
///
/// Returns how many containers were stopped. The first failure aborts the
/// sweep; the worker must not serve with stale servers still bound to ports.
pub async fn stop_labelled_containers(
    runtime: &dyn ContainerRuntime,
    label: &str,
) -> std::result::Result<usize, RuntimeError> {
    let ids = runtime.list_labelled(label).await?;
    for id in &ids {
        tracing::info!(container = %id, "Stopping stale container");
        runtime.stop_container(id, None).await?;
    }
    Ok(ids.len())
}
