//! Docker implementation of [`ContainerRuntime`] backed by bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::{ClientVersion, Docker};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::DockerConfig;
use crate::container::error::RuntimeError;
use crate::container::runtime::{ContainerRuntime, ContainerSpec, WaitOutcome};

/// Request timeout for the Docker API client, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Daemon endpoint used when `DOCKER_HOST` is unset.
#[cfg(unix)]
const LOCAL_SOCKET: &str = "unix:///var/run/docker.sock";
#[cfg(windows)]
const LOCAL_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Docker-backed container runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using `DOCKER_HOST`/`DOCKER_API_VERSION` style settings.
    ///
    /// Without an explicit API version the client negotiates one with the
    /// daemon.
    pub async fn connect(config: &DockerConfig) -> Result<Self, RuntimeError> {
        let docker = client(config, LOCAL_SOCKET)?;

        let docker = if config.api_version.is_some() {
            docker
        } else {
            docker
                .negotiate_version()
                .await
                .map_err(|e| RuntimeError::Unavailable {
                    reason: format!("API version negotiation failed: {e}"),
                })?
        };

        docker.ping().await.map_err(|e| RuntimeError::Unavailable {
            reason: e.to_string(),
        })?;

        tracing::debug!(version = ?docker.client_version(), "Connected to Docker");
        Ok(Self::new(docker))
    }
}

/// Build a client for `config`, using `local_socket` when no host is set.
///
/// A pinned API version applies to every transport, the local one included.
fn client(config: &DockerConfig, local_socket: &str) -> Result<Docker, RuntimeError> {
    let version = match config.api_version.as_deref() {
        Some(v) => parse_api_version(v)?,
        None => bollard::API_DEFAULT_VERSION.clone(),
    };

    match config.host.as_deref() {
        None | Some("") => Docker::connect_with_local(local_socket, DOCKER_TIMEOUT_SECS, &version),
        Some(host) if host.starts_with("unix://") => {
            Docker::connect_with_unix(host, DOCKER_TIMEOUT_SECS, &version)
        }
        Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
            Docker::connect_with_http(host, DOCKER_TIMEOUT_SECS, &version)
        }
        Some(host) => {
            return Err(RuntimeError::Unavailable {
                reason: format!(
                    "unsupported DOCKER_HOST '{host}' (expected unix://, tcp:// or http://; \
                     forward SSH hosts to a local socket)"
                ),
            });
        }
    }
    .map_err(|e| RuntimeError::Unavailable {
        reason: e.to_string(),
    })
}

/// Parse an API version such as `1.43`.
fn parse_api_version(raw: &str) -> Result<ClientVersion, RuntimeError> {
    let invalid = || RuntimeError::Unavailable {
        reason: format!("invalid DOCKER_API_VERSION '{raw}', expected <major>.<minor>"),
    };
    let (major, minor) = raw.trim().split_once('.').ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}

/// Translate a runtime-neutral spec into bollard's create config.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .iter()
        .map(|p| (p.key(), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|p| {
            (
                p.key(),
                Some(vec![PortBinding {
                    host_ip: Some(p.host_ip.clone()),
                    host_port: Some(p.port.to_string()),
                }]),
            )
        })
        .collect();

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            read_only: Some(false),
            ..Default::default()
        })
        .collect();

    let volumes: HashMap<String, HashMap<(), ()>> = spec
        .mounts
        .iter()
        .map(|m| (m.target.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        auto_remove: Some(spec.auto_remove),
        port_bindings: Some(port_bindings),
        mounts: if mounts.is_empty() { None } else { Some(mounts) },
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        stop_timeout: Some(spec.stop_timeout.as_secs() as i64),
        exposed_ports: Some(exposed_ports),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        volumes: if volumes.is_empty() {
            None
        } else {
            Some(volumes)
        },
        labels: Some(spec.labels.clone()),
        cmd: Some(spec.cmd.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Render one pull progress item as a log line.
fn pull_line(info: &bollard::models::CreateImageInfo) -> String {
    let mut line = String::new();
    if let Some(id) = &info.id {
        line.push_str(id);
        line.push_str(": ");
    }
    line.push_str(info.status.as_deref().unwrap_or_default());
    if let Some(progress) = &info.progress {
        line.push(' ');
        line.push_str(progress);
    }
    line
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn pull_image(&self, image: &str) -> BoxStream<'static, Result<String, RuntimeError>> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(|item| match item {
                Ok(info) => match (&info.error, &info.error_detail) {
                    (Some(error), _) => Err(RuntimeError::Api(error.clone())),
                    (None, Some(detail)) if detail.message.is_some() => Err(RuntimeError::Api(
                        detail.message.clone().unwrap_or_default(),
                    )),
                    _ => Ok(pull_line(&info)),
                },
                Err(e) => Err(RuntimeError::from(e)),
            })
            .boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await?;

        for warning in &response.warnings {
            tracing::warn!(container = %response.id, "Docker: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        let options = timeout.map(|t| StopContainerOptions {
            t: t.as_secs() as i64,
        });
        self.docker.stop_container(id, options).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<WaitOutcome, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(WaitOutcome {
                status_code: response.status_code,
                error: response.error.and_then(|e| e.message),
            }),
            // bollard turns non-zero exit codes into this error variant.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { error, code })) => {
                Ok(WaitOutcome {
                    status_code: code,
                    error: if error.is_empty() { None } else { Some(error) },
                })
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::Api(format!(
                "wait stream for container {id} ended without a status"
            ))),
        }
    }

    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::container::runtime::{BindMount, Protocol, PublishedPort};

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "scpfs2open/fso-standalone:release".to_string(),
            ports: vec![
                PublishedPort {
                    port: 8081,
                    protocol: Protocol::Tcp,
                    host_ip: "127.0.0.1".to_string(),
                },
                PublishedPort {
                    port: 7809,
                    protocol: Protocol::Udp,
                    host_ip: "0.0.0.0".to_string(),
                },
            ],
            mounts: vec![BindMount {
                source: "/data/fso/fs2".to_string(),
                target: "/fso".to_string(),
            }],
            labels: HashMap::from([("fso_server".to_string(), String::new())]),
            cmd: vec!["-port".to_string(), "7809".to_string()],
            auto_remove: true,
            stop_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_container_config_ports() {
        let config = container_config(&spec());

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("8081/tcp"));
        assert!(exposed.contains_key("7809/udp"));

        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        let api = bindings["8081/tcp"].as_ref().unwrap();
        assert_eq!(api[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(api[0].host_port.as_deref(), Some("8081"));
        let game = bindings["7809/udp"].as_ref().unwrap();
        assert_eq!(game[0].host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(host.auto_remove, Some(true));
    }

    #[test]
    fn test_container_config_mount_and_labels() {
        let config = container_config(&spec());

        let host = config.host_config.unwrap();
        let mount = &host.mounts.unwrap()[0];
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(mount.source.as_deref(), Some("/data/fso/fs2"));
        assert_eq!(mount.target.as_deref(), Some("/fso"));
        assert_eq!(mount.read_only, Some(false));

        assert!(config.labels.unwrap().contains_key("fso_server"));
        assert_eq!(config.stop_timeout, Some(5));
        assert_eq!(
            config.cmd.unwrap(),
            vec!["-port".to_string(), "7809".to_string()]
        );
    }

    #[test]
    fn test_parse_api_version() {
        let version = parse_api_version("1.43").unwrap();
        assert_eq!(version.major_version, 1);
        assert_eq!(version.minor_version, 43);

        assert!(parse_api_version("latest").is_err());
        assert!(parse_api_version("1.x").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pinned_version_applies_to_local_socket() {
        // The socket only has to exist; no request is sent.
        let socket = std::env::temp_dir().join(format!("commnode-{}.sock", uuid::Uuid::new_v4()));
        std::fs::write(&socket, b"").unwrap();
        let config = DockerConfig {
            host: None,
            api_version: Some("1.41".to_string()),
        };

        let docker = client(&config, &format!("unix://{}", socket.display())).unwrap();
        let version = docker.client_version();
        std::fs::remove_file(&socket).unwrap();

        assert_eq!(version.major_version, 1);
        assert_eq!(version.minor_version, 41);
    }

    #[test]
    fn test_unsupported_host_rejected() {
        let config = DockerConfig {
            host: Some("ssh://builder@remote".to_string()),
            api_version: None,
        };
        assert!(matches!(
            client(&config, LOCAL_SOCKET),
            Err(RuntimeError::Unavailable { .. })
        ));
    }
}
