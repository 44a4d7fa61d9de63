use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::migration::DEFAULT_BATCH_SIZE;
use crate::storage::DEFAULT_NAMESPACE;

/// Prefix of environment overrides, e.g. `BRIDGE__SERVER__LISTEN_ADDR`
pub const ENV_PREFIX: &str = "BRIDGE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub migration: MigrationConfig,
    pub throttle: ThrottleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Items written per batch unless a run overrides it
    pub batch_size: usize,
    /// Items requested per source page
    pub page_size: u32,
    /// Stop a streamed run when the client disconnects
    pub cancel_on_disconnect: bool,
    /// Prefix of wizard storage keys
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8088".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://bridge.db?mode=rwc".to_string(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: crate::clients::DEFAULT_PAGE_SIZE,
            cancel_on_disconnect: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // BigCommerce standard plan: 150 requests per 30 seconds
        Self {
            requests_per_window: 150,
            window_secs: 30,
            max_in_flight: 3,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber; `RUST_LOG` overrides `level`
    pub fn init(&self) -> Result<()> {
        use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "bridge_rs={0},bridge_server={0},bridge_migrate={0},tower_http={0}",
                self.level
            )
            .into()
        });
        let registry = tracing_subscriber::registry().with(filter);

        // stderr keeps stdout free for streamed progress
        let result = if self.format == "json" {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
        } else {
            registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
        };
        result.map_err(|e| BridgeError::Config(format!("cannot install logger: {}", e)))
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Config =
            toml::from_str(&content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the optional file, then `BRIDGE__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration.batch_size == 0 {
            return Err(BridgeError::Config("migration.batch_size must be at least 1".into()));
        }
        if self.migration.namespace.trim().is_empty() {
            return Err(BridgeError::Config("migration.namespace must not be empty".into()));
        }
        if self.throttle.requests_per_window == 0 || self.throttle.window_secs == 0 {
            return Err(BridgeError::Config("throttle window must allow at least one request".into()));
        }
        if self.throttle.max_attempts == 0 {
            return Err(BridgeError::Config("throttle.max_attempts must be at least 1".into()));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(BridgeError::Config(format!(
                "unknown logging.format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.migration.batch_size, 50);
        assert_eq!(config.migration.namespace, "bc-migration-wizard");
        assert_eq!(config.throttle.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[migration]
batch_size = 25

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.migration.batch_size, 25);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.listen_addr, "127.0.0.1:8088");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = Config::default();
        config.migration.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }
}
