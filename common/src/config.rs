//! Application configuration.
//!
//! Values come from environment variables, falling back to defaults.

use std::env;
use std::str::FromStr;

/// Default number of records sampled when describing a schemaless source.
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Default flat-file window size.
pub const DEFAULT_FLAT_FILE_LIMIT: u64 = 100;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name of the running service (used in logs and responses).
    pub service_name: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Connect timeout applied when a request does not carry one.
    pub connect_timeout_secs: u64,
    /// Upper bound for the pooled relational client.
    pub max_connections: u32,
    /// Records sampled per schemaless describe call.
    pub sample_size: usize,
    /// Window size for flat-file queries without an explicit `limit`.
    pub flat_file_default_limit: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "datasource-service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            connect_timeout_secs: 10,
            max_connections: 5,
            sample_size: DEFAULT_SAMPLE_SIZE,
            flat_file_default_limit: DEFAULT_FLAT_FILE_LIMIT,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment.
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            service_name: defaults.service_name,
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_or("SERVER_PORT", defaults.port),
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            max_connections: env_or("MAX_CONNECTIONS", defaults.max_connections),
            sample_size: env_or("SAMPLE_SIZE", defaults.sample_size).max(1),
            flat_file_default_limit: env_or(
                "FLAT_FILE_DEFAULT_LIMIT",
                defaults.flat_file_default_limit,
            ),
        }
    }

    /// Loads configuration and records the service name.
    pub fn load_with_service(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::load()
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sample_size, 20);
        assert_eq!(config.flat_file_default_limit, 100);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("COMMON_CONFIG_TEST_PORT", "not-a-port");
        assert_eq!(env_or("COMMON_CONFIG_TEST_PORT", 8080u16), 8080);
        env::set_var("COMMON_CONFIG_TEST_PORT", " 9000 ");
        assert_eq!(env_or("COMMON_CONFIG_TEST_PORT", 8080u16), 9000);
    }
}
