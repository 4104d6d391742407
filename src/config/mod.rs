//! Worker configuration, read from the environment.
//!
//! `.env` is loaded by the binary before [`WorkerConfig::resolve`] runs, so
//! variables from the file and the process environment look the same here.
//! Every value has a default; only malformed values are errors.

mod docker;
pub(crate) mod helpers;
mod server;

use std::net::SocketAddr;
use std::time::Duration;

pub use docker::DockerConfig;

use crate::config::helpers::{EnvSource, ProcessEnv, parse_optional_env, parse_secs_env};
use crate::container::ContainerSettings;
use crate::error::ConfigError;
use crate::instance::InstanceSettings;
use crate::server_api::ApiCredentials;

/// Address the control surface listens on by default.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";

/// Everything the worker needs to run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Control surface bind address.
    pub listen_addr: SocketAddr,
    pub docker: DockerConfig,
    pub container: ContainerSettings,
    pub credentials: ApiCredentials,
    pub instance: InstanceSettings,
    /// How long to wait for instances to stop once shutdown is broadcast.
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    /// Resolve from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&ProcessEnv)
    }

    pub(crate) fn resolve_from(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let default_listen: SocketAddr =
            DEFAULT_LISTEN_ADDR
                .parse()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "WORKER_LISTEN_ADDR".to_string(),
                    message: format!("{e}"),
                })?;

        Ok(Self {
            listen_addr: parse_optional_env(env, "WORKER_LISTEN_ADDR", default_listen)?,
            docker: DockerConfig::resolve(env)?,
            container: server::resolve_container(env)?,
            credentials: server::resolve_credentials(env)?,
            instance: server::resolve_instance(env)?,
            shutdown_grace: parse_secs_env(env, "SHUTDOWN_GRACE_SECS", Duration::from_secs(10))?,
        })
    }
}
