use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Where configuration values come from.
///
/// The process environment in production; a map in tests.
pub(crate) trait EnvSource {
    fn var(&self, key: &str) -> Result<String, VarError>;
}

/// The real process environment (after `.env` has been loaded).
pub(crate) struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Result<String, VarError> {
        std::env::var(key)
    }
}

#[cfg(test)]
impl EnvSource for std::collections::HashMap<&str, &str> {
    fn var(&self, key: &str) -> Result<String, VarError> {
        self.get(key)
            .map(|v| v.to_string())
            .ok_or(VarError::NotPresent)
    }
}

/// Read a variable, treating unset and empty the same way.
pub(crate) fn optional_env(env: &dyn EnvSource, key: &str) -> Result<Option<String>, ConfigError> {
    match env.var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Read and parse a variable, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(
    env: &dyn EnvSource,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(env, key)?
        .map(|s| s.trim().parse())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        })
        .map(|v| v.unwrap_or(default))
}

/// Read a whole number of seconds. Zero is rejected.
pub(crate) fn parse_secs_env(
    env: &dyn EnvSource,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs = parse_optional_env(env, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
