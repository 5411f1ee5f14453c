//! Server configuration.
//!
//! Defaults are compiled in; a `config.json` next to the process or pointed
//! at by `ALTRUIST_CONFIG_PATH` overrides them, and `ALTRUIST_CONFIG_JSON`
//! may carry inline JSON with the highest precedence. Parsing problems are
//! reported to stderr and the defaults win.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket listen port.
    pub port: u16,
    pub engine: EngineConfig,
    pub world: WorldConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4126,
            engine: EngineConfig::default(),
            world: WorldConfig::default(),
            bridge: BridgeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Tick engine cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine iteration interval in milliseconds.
    pub engine_rate_ms: u64,
    /// World physics step frequency in Hz.
    pub physics_hz: u32,
    /// Completed task executions are reaped every this many ticks.
    pub prune_interval_ticks: u64,
    /// Window for required external services to report ready at startup, in
    /// seconds; expiry shuts the process down with a non-zero exit.
    pub startup_timeout_secs: u64,
    /// Cleanup sweep cadence for disconnected clients, in seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_rate_ms: 50,
            physics_hz: 15,
            prune_interval_ticks: 64,
            startup_timeout_secs: 60,
            cleanup_interval_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn engine_rate(&self) -> Duration {
        Duration::from_millis(self.engine_rate_ms.max(1))
    }

    pub fn physics_rate(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.physics_hz.max(1)))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// World partitioning defaults and room sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub default_room_capacity: usize,
    pub partition_width: f32,
    pub partition_height: f32,
    pub cell_size: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            default_room_capacity: 100,
            partition_width: 256.0,
            partition_height: 256.0,
            cell_size: 16.0,
        }
    }
}

/// Inter-process bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Enable the shared tier and cross-process fan-out.
    pub enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Rendered-log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Optional level directive; `RUST_LOG` wins when absent.
    pub level: Option<String>,
    pub format: LogFormat,
    /// Enable a rolling file appender in addition to stdout.
    pub enable_file_logging: bool,
    pub dir: String,
    pub filename: String,
    /// Rotation policy: "daily" (default), "hourly", or "never".
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            enable_file_logging: false,
            dir: "logs".to_string(),
            filename: "altruist-server.log".to_string(),
            rotation: "daily".to_string(),
        }
    }
}

/// Load configuration with the following precedence (highest first):
/// 1) `ALTRUIST_CONFIG_JSON` env var containing raw JSON
/// 2) File pointed at by `ALTRUIST_CONFIG_PATH`
/// 3) `config.json` in the current working directory
/// 4) Defaults compiled into the binary
#[must_use]
pub fn load() -> Config {
    let mut merged = serde_json::to_value(Config::default())
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

    if let Ok(path) = std::env::var("ALTRUIST_CONFIG_PATH") {
        merge_file_source(&mut merged, std::path::Path::new(&path));
    } else {
        let cwd_config = std::path::Path::new("config.json");
        if cwd_config.exists() {
            merge_file_source(&mut merged, cwd_config);
        }
    }

    if let Ok(json) = std::env::var("ALTRUIST_CONFIG_JSON") {
        match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(value) => merge_values(&mut merged, value),
            Err(err) => eprintln!("Failed to parse ALTRUIST_CONFIG_JSON: {err}"),
        }
    }

    match serde_json::from_value(merged) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration, falling back to defaults: {err}");
            Config::default()
        }
    }
}

fn merge_file_source(merged: &mut serde_json::Value, path: &std::path::Path) {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(value) => merge_values(merged, value),
            Err(err) => eprintln!("Failed to parse {}: {err}", path.display()),
        },
        Err(err) => eprintln!("Failed to read {}: {err}", path.display()),
    }
}

/// Deep-merge `incoming` into `base`; objects merge key-wise, everything
/// else replaces.
fn merge_values(base: &mut serde_json::Value, incoming: serde_json::Value) {
    match (base, incoming) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, incoming_value) => *base_slot = incoming_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.port, 4126);
        assert_eq!(config.engine.engine_rate(), Duration::from_millis(50));
        assert_eq!(config.engine.physics_hz, 15);
        assert_eq!(config.world.default_room_capacity, 100);
        assert!(!config.bridge.enabled);
    }

    #[test]
    fn physics_rate_is_inverse_of_hz() {
        let engine = EngineConfig {
            physics_hz: 20,
            ..EngineConfig::default()
        };
        assert_eq!(engine.physics_rate(), Duration::from_millis(50));
    }

    #[test]
    fn partial_json_merges_over_defaults() {
        let mut merged = serde_json::to_value(Config::default()).unwrap();
        merge_values(
            &mut merged,
            serde_json::json!({"port": 9000, "engine": {"physics_hz": 30}}),
        );
        let config: Config = serde_json::from_value(merged).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.physics_hz, 30);
        // Untouched fields keep their defaults.
        assert_eq!(config.engine.engine_rate_ms, 50);
    }

    #[test]
    fn zero_rates_are_clamped() {
        let engine = EngineConfig {
            engine_rate_ms: 0,
            physics_hz: 0,
            ..EngineConfig::default()
        };
        assert_eq!(engine.engine_rate(), Duration::from_millis(1));
        assert_eq!(engine.physics_rate(), Duration::from_secs(1));
    }
}
