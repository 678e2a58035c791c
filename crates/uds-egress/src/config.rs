//! Environment configuration for the egress controller
//!
//! Values are read through the [`EnvSource`] trait so tests can supply them
//! without touching process-global state.

use std::time::Duration;

use thiserror::Error;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "uds-egress-controller";

/// Finalizer holding a Package until its egress has been released
pub const FINALIZER: &str = "uds.dev/egress";

/// Env var overriding the waypoint readiness attempt budget
pub const WAYPOINT_MAX_ATTEMPTS_ENV: &str = "WAYPOINT_HEALTH_MAX_ATTEMPTS";

/// Env var overriding the waypoint readiness poll interval, in milliseconds
pub const WAYPOINT_INTERVAL_MS_ENV: &str = "WAYPOINT_HEALTH_INTERVAL_MS";

/// Env var overriding the shared-object retry budget
pub const SHARED_RESOURCE_MAX_ATTEMPTS_ENV: &str = "UDS_SHARED_RESOURCE_MAX_ATTEMPTS";

/// Errors reading configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An env var was set to something that is not a positive integer
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Raw value
        value: String,
    },
}

/// Source of environment values
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, `None` when unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// How long and how often to wait for the egress waypoint
#[derive(Clone, Debug, PartialEq)]
pub struct WaypointPollConfig {
    /// Delay between readiness checks
    pub interval: Duration,
    /// Number of readiness checks before giving up
    pub max_attempts: u32,
}

impl Default for WaypointPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

/// Runtime configuration for egress reconciliation
#[derive(Clone, Debug, PartialEq)]
pub struct EgressConfig {
    /// Field manager for server-side apply
    pub field_manager: String,
    /// Waypoint readiness polling
    pub waypoint: WaypointPollConfig,
    /// Attempts for create-or-patch of shared objects
    pub shared_resource_attempts: u32,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            field_manager: FIELD_MANAGER.to_string(),
            waypoint: WaypointPollConfig::default(),
            shared_resource_attempts: 3,
        }
    }
}

impl EgressConfig {
    /// Defaults overridden by whatever `env` sets
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(attempts) = positive(env, WAYPOINT_MAX_ATTEMPTS_ENV)? {
            config.waypoint.max_attempts = attempts as u32;
        }
        if let Some(ms) = positive(env, WAYPOINT_INTERVAL_MS_ENV)? {
            config.waypoint.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = positive(env, SHARED_RESOURCE_MAX_ATTEMPTS_ENV)? {
            config.shared_resource_attempts = attempts as u32;
        }

        Ok(config)
    }
}

fn positive(env: &dyn EnvSource, var: &str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = env.var(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 && v <= u32::MAX as u64 => Ok(Some(v)),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(vars: &'static [(&'static str, &'static str)]) -> MockEnvSource {
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        });
        mock
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EgressConfig::from_env(&env_with(&[])).unwrap();
        assert_eq!(config, EgressConfig::default());
        assert_eq!(config.waypoint.interval, Duration::from_secs(2));
        assert_eq!(config.waypoint.max_attempts, 10);
        assert_eq!(config.shared_resource_attempts, 3);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = EgressConfig::from_env(&env_with(&[
            (WAYPOINT_MAX_ATTEMPTS_ENV, "30"),
            (WAYPOINT_INTERVAL_MS_ENV, "500"),
            (SHARED_RESOURCE_MAX_ATTEMPTS_ENV, "5"),
        ]))
        .unwrap();
        assert_eq!(config.waypoint.max_attempts, 30);
        assert_eq!(config.waypoint.interval, Duration::from_millis(500));
        assert_eq!(config.shared_resource_attempts, 5);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = EgressConfig::from_env(&env_with(&[(WAYPOINT_MAX_ATTEMPTS_ENV, "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: WAYPOINT_MAX_ATTEMPTS_ENV.to_string(),
                value: "0".to_string(),
            }
        );

        assert!(
            EgressConfig::from_env(&env_with(&[(WAYPOINT_INTERVAL_MS_ENV, "soon")])).is_err()
        );
    }
}
