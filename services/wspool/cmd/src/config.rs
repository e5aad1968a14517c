//! Configuration handling for the wspool service.
//!
//! This module reads configuration from the shared config file and
//! environment variables. Command-line flags are applied on top by `main`.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use wspool_pool::PoolOptions;
use wspool_session::SessionOptions;

/// wspool service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WsPoolConfig {
    /// Endpoint sessions are opened to
    pub endpoint: String,
    /// Namespace for the pool; global when unset
    pub namespace: Option<String>,
    /// Pool capacity
    pub pool_size: usize,
    /// Number of acquires performed at startup
    pub sessions: usize,
    /// Failed reconnects tolerated before a session is retired
    pub reconnect_budget: u32,
    /// Close the lingering connection when the budget runs out
    pub kill_on_exhaustion: bool,
    /// First reconnect delay
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Keepalive interval; `None` disables keepalive
    pub ping_interval: Option<Duration>,
    /// Silence after which a connection is considered lost
    pub idle_timeout: Option<Duration>,
}

impl Default for WsPoolConfig {
    fn default() -> Self {
        let session = SessionOptions::default();
        Self {
            endpoint: "ws://127.0.0.1:8546".to_string(),
            namespace: None,
            pool_size: 1,
            sessions: 1,
            reconnect_budget: session.reconnect_budget,
            kill_on_exhaustion: session.kill_on_exhaustion,
            reconnect_delay: session.reconnect_delay,
            max_reconnect_delay: session.max_reconnect_delay,
            connect_timeout: session.connect_timeout,
            ping_interval: session.ping_interval,
            idle_timeout: session.idle_timeout,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    wspool: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

/// Parse a duration; `off`, `none` and `0` disable the setting
fn parse_optional_duration(value: &str) -> Option<Option<Duration>> {
    match value.trim() {
        "off" | "none" | "0" => Some(None),
        other => humantime::parse_duration(other).ok().map(Some),
    }
}

impl WsPoolConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(root_config) = serde_yaml::from_str::<RootConfig>(&content) {
                config.apply_root_config(root_config);
                info!("Loaded configuration from {:?}", config_path.as_ref());
            } else {
                warn!(
                    "Failed to parse config file {:?}, using defaults",
                    config_path.as_ref()
                );
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_overrides(|name| std::env::var(name).ok());

        info!(
            "Final wspool configuration: endpoint={}, namespace={}, pool_size={}, reconnect_budget={}",
            config.endpoint,
            config.namespace.as_deref().unwrap_or("global"),
            config.pool_size,
            config.reconnect_budget
        );

        Ok(config)
    }

    /// Pool options described by this configuration
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            capacity: self.pool_size,
            session: SessionOptions {
                reconnect_budget: self.reconnect_budget,
                kill_on_exhaustion: self.kill_on_exhaustion,
                reconnect_delay: self.reconnect_delay,
                max_reconnect_delay: self.max_reconnect_delay,
                connect_timeout: self.connect_timeout,
                ping_interval: self.ping_interval,
                idle_timeout: self.idle_timeout,
            },
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(service) = root_config.services.and_then(|s| s.wspool) {
            self.apply_service_config(service);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        if let Some(args) = service_config.args {
            for arg in args {
                if let Some(endpoint) = arg.strip_prefix("--endpoint=") {
                    self.endpoint = endpoint.to_string();
                } else if let Some(namespace) = arg.strip_prefix("--namespace=") {
                    self.namespace = Some(namespace.to_string());
                }
            }
        }

        if let Some(config_map) = service_config.config {
            for (key, value) in config_map {
                if let Some(setting) = key.strip_prefix("services.wspool.") {
                    if !self.apply_setting(setting, &value) {
                        warn!("Ignoring invalid config value {}={}", key, value);
                    }
                }
            }
        }
    }

    /// Apply one named setting; returns false if the value does not parse.
    /// Unknown names are ignored.
    fn apply_setting(&mut self, name: &str, value: &str) -> bool {
        match name {
            "endpoint" => self.endpoint = value.to_string(),
            "namespace" => self.namespace = Some(value.to_string()),
            "pool_size" => match value.parse() {
                Ok(size) => self.pool_size = size,
                Err(_) => return false,
            },
            "sessions" => match value.parse() {
                Ok(count) => self.sessions = count,
                Err(_) => return false,
            },
            "reconnect_budget" => match value.parse() {
                Ok(budget) => self.reconnect_budget = budget,
                Err(_) => return false,
            },
            "kill_on_exhaustion" => match value.to_lowercase().parse() {
                Ok(kill) => self.kill_on_exhaustion = kill,
                Err(_) => return false,
            },
            "reconnect_delay" => match humantime::parse_duration(value) {
                Ok(delay) => self.reconnect_delay = delay,
                Err(_) => return false,
            },
            "max_reconnect_delay" => match humantime::parse_duration(value) {
                Ok(delay) => self.max_reconnect_delay = delay,
                Err(_) => return false,
            },
            "connect_timeout" => match humantime::parse_duration(value) {
                Ok(timeout) => self.connect_timeout = timeout,
                Err(_) => return false,
            },
            "ping_interval" => match parse_optional_duration(value) {
                Some(interval) => self.ping_interval = interval,
                None => return false,
            },
            "idle_timeout" => match parse_optional_duration(value) {
                Some(timeout) => self.idle_timeout = timeout,
                None => return false,
            },
            _ => {}
        }
        true
    }

    /// Apply `WSPOOL_*` overrides looked up through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: &[(&str, &str)] = &[
            ("WSPOOL_ENDPOINT", "endpoint"),
            ("WSPOOL_NAMESPACE", "namespace"),
            ("WSPOOL_POOL_SIZE", "pool_size"),
            ("WSPOOL_SESSIONS", "sessions"),
            ("WSPOOL_RECONNECT_BUDGET", "reconnect_budget"),
            ("WSPOOL_KILL_ON_EXHAUSTION", "kill_on_exhaustion"),
            ("WSPOOL_RECONNECT_DELAY", "reconnect_delay"),
            ("WSPOOL_PING_INTERVAL", "ping_interval"),
            ("WSPOOL_IDLE_TIMEOUT", "idle_timeout"),
        ];

        for (var, setting) in OVERRIDES {
            if let Some(value) = lookup(var) {
                if self.apply_setting(setting, &value) {
                    info!("{} overridden by environment: {}", setting, value);
                } else {
                    warn!("Ignoring invalid {}={}", var, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = WsPoolConfig::default();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8546");
        assert_eq!(config.namespace, None);
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.reconnect_budget, 3);
        assert!(config.kill_on_exhaustion);
        assert_eq!(config.pool_options(), PoolOptions::default());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  wspool:
    enabled: true
    executable: ./wspool
    args:
      - --endpoint=ws://10.0.0.5:8546
      - --namespace=indexer
    config:
      services.wspool.pool_size: "4"
      services.wspool.reconnect_budget: "1"
      services.wspool.kill_on_exhaustion: "false"
      services.wspool.reconnect_delay: "250ms"
      services.wspool.ping_interval: "5s"
      services.wspool.idle_timeout: "not-a-duration"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = WsPoolConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.endpoint, "ws://10.0.0.5:8546");
        assert_eq!(config.namespace.as_deref(), Some("indexer"));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.reconnect_budget, 1);
        assert!(!config.kill_on_exhaustion);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.ping_interval, Some(Duration::from_secs(5)));
        // Invalid value leaves the default in place
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert!(config.pool_options().validate().is_ok());
    }

    #[test]
    fn test_keepalive_off_needs_idle_off() {
        let mut config = WsPoolConfig::default();
        assert!(config.apply_setting("ping_interval", "off"));
        assert!(config.pool_options().validate().is_err());

        assert!(config.apply_setting("idle_timeout", "off"));
        assert_eq!(config.idle_timeout, None);
        assert!(config.pool_options().validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WsPoolConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.pool_size, WsPoolConfig::default().pool_size);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = WsPoolConfig::default();
        let env: HashMap<&str, &str> = [
            ("WSPOOL_ENDPOINT", "wss://node.example:443"),
            ("WSPOOL_POOL_SIZE", "8"),
            ("WSPOOL_RECONNECT_BUDGET", "zero"),
            ("WSPOOL_IDLE_TIMEOUT", "1m"),
            ("WSPOOL_KILL_ON_EXHAUSTION", "yes"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.endpoint, "wss://node.example:443");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.reconnect_budget, 3);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        // Unparseable booleans are rejected rather than read as false
        assert!(config.kill_on_exhaustion);
    }

    #[test]
    fn test_kill_on_exhaustion_parsing() {
        let mut config = WsPoolConfig::default();
        assert!(config.apply_setting("kill_on_exhaustion", "FALSE"));
        assert!(!config.kill_on_exhaustion);
        assert!(!config.apply_setting("kill_on_exhaustion", "1"));
        assert!(!config.kill_on_exhaustion);
        assert!(config.apply_setting("kill_on_exhaustion", "true"));
        assert!(config.kill_on_exhaustion);
    }
}
