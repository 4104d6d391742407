use crate::config::helpers::{EnvSource, optional_env};
use crate::error::ConfigError;

/// How to reach the Docker daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerConfig {
    /// `unix://`, `tcp://` or `http://` endpoint. Local defaults when unset.
    pub host: Option<String>,
    /// Pinned API version (`major.minor`). Negotiated with the daemon when unset.
    pub api_version: Option<String>,
}

impl DockerConfig {
    pub(crate) fn resolve(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        Ok(Self {
            host: optional_env(env, "DOCKER_HOST")?,
            api_version: optional_env(env, "DOCKER_API_VERSION")?,
        })
    }
}
