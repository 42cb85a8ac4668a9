//! Application-level configuration loading: round defaults and connection tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "DEBATE_ARENA_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Round length used when a room is created without one.
    pub default_round_duration: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Upper bound for a single socket write.
    pub write_timeout: Duration,
    /// A connection silent for this long is dropped.
    pub idle_timeout: Duration,
    /// Largest inbound frame accepted.
    pub max_frame_bytes: usize,
    /// Upper bound for store calls made inside a transition.
    pub transition_timeout: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(path = %path.display(), "loaded configuration");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    default_round_duration_secs: u64,
    outbound_queue_capacity: usize,
    ping_interval_secs: u64,
    write_timeout_secs: u64,
    idle_timeout_secs: u64,
    max_frame_bytes: usize,
    transition_timeout_ms: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            default_round_duration_secs: 180,
            outbound_queue_capacity: 256,
            ping_interval_secs: 54,
            write_timeout_secs: 10,
            idle_timeout_secs: 60,
            max_frame_bytes: 4096,
            transition_timeout_ms: 5000,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            default_round_duration: Duration::from_secs(value.default_round_duration_secs.max(1)),
            outbound_queue_capacity: value.outbound_queue_capacity.max(1),
            ping_interval: Duration::from_secs(value.ping_interval_secs.max(1)),
            write_timeout: Duration::from_secs(value.write_timeout_secs.max(1)),
            idle_timeout: Duration::from_secs(value.idle_timeout_secs.max(1)),
            max_frame_bytes: value.max_frame_bytes.max(64),
            transition_timeout: Duration::from_millis(value.transition_timeout_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = AppConfig::from_json(r#"{"ping_interval_secs": 20}"#).unwrap();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.default_round_duration, Duration::from_secs(180));
    }

    #[test]
    fn degenerate_values_are_clamped() {
        let config = AppConfig::from_json(r#"{"outbound_queue_capacity": 0}"#).unwrap();
        assert_eq!(config.outbound_queue_capacity, 1);
    }
}
