use secrecy::SecretString;

use crate::config::helpers::{EnvSource, optional_env, parse_optional_env, parse_secs_env};
use crate::container::ContainerSettings;
use crate::error::ConfigError;
use crate::instance::{InstanceSettings, MonitorSettings};
use crate::server_api::ApiCredentials;

/// Offsets each port base must leave room for above itself.
pub(crate) const MIN_PORT_HEADROOM: u16 = 64;

/// Game server container settings.
pub(crate) fn resolve_container(env: &dyn EnvSource) -> Result<ContainerSettings, ConfigError> {
    let defaults = ContainerSettings::default();

    let settings = ContainerSettings {
        image: optional_env(env, "SERVER_IMAGE")?.unwrap_or(defaults.image),
        api_base_port: parse_optional_env(env, "SERVER_API_BASE_PORT", defaults.api_base_port)?,
        game_base_port: parse_optional_env(
            env,
            "SERVER_GAME_BASE_PORT",
            defaults.game_base_port,
        )?,
        data_dir: optional_env(env, "SERVER_DATA_DIR")?.unwrap_or(defaults.data_dir),
        data_mount: optional_env(env, "SERVER_DATA_MOUNT")?.unwrap_or(defaults.data_mount),
        stop_timeout: parse_secs_env(env, "CONTAINER_STOP_TIMEOUT_SECS", defaults.stop_timeout)?,
    };

    // Offset 0 would otherwise publish both sockets on the same host port.
    let (api, game) = (settings.api_base_port, settings.game_base_port);
    if api == game {
        return Err(ConfigError::InvalidValue {
            key: "SERVER_GAME_BASE_PORT".to_string(),
            message: format!("must differ from SERVER_API_BASE_PORT ({api})"),
        });
    }

    for (key, base) in [("SERVER_API_BASE_PORT", api), ("SERVER_GAME_BASE_PORT", game)] {
        if base.checked_add(MIN_PORT_HEADROOM).is_none() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "{base} leaves fewer than {MIN_PORT_HEADROOM} ports before 65535"
                ),
            });
        }
    }

    Ok(settings)
}

/// Credentials for the in-server HTTP API.
pub(crate) fn resolve_credentials(env: &dyn EnvSource) -> Result<ApiCredentials, ConfigError> {
    let defaults = ApiCredentials::default();
    Ok(ApiCredentials {
        user: optional_env(env, "SERVER_API_USER")?.unwrap_or(defaults.user),
        password: optional_env(env, "SERVER_API_PASSWORD")?
            .map(SecretString::from)
            .unwrap_or(defaults.password),
    })
}

/// Provisioning and idle-tracking timings.
pub(crate) fn resolve_instance(env: &dyn EnvSource) -> Result<InstanceSettings, ConfigError> {
    let defaults = InstanceSettings::default();
    let monitor = MonitorSettings {
        idle_timeout: parse_secs_env(env, "IDLE_TIMEOUT_SECS", defaults.monitor.idle_timeout)?,
        check_interval: parse_secs_env(
            env,
            "OCCUPANCY_CHECK_INTERVAL_SECS",
            defaults.monitor.check_interval,
        )?,
    };

    Ok(InstanceSettings {
        name_prefix: optional_env(env, "SERVER_NAME_PREFIX")?.unwrap_or(defaults.name_prefix),
        ready_timeout: parse_secs_env(env, "READY_TIMEOUT_SECS", defaults.ready_timeout)?,
        monitor,
    })
}
