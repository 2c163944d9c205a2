//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fieldline_core::{
    BuilderConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CHART_ITEMS, DEFAULT_PAGE_SIZE,
    EngineConfig, RetryConfig,
};
use fieldline_types::DateFormats;

/// Server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Series builder and cache settings.
    pub engine: EngineSettings,
    /// Named date templates handed to dashboards.
    pub formats: DateFormats,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use fieldline_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.engine.validate());

        if self.formats.raw.trim().is_empty() {
            errors.push(ValidationError {
                field: "formats.raw".to_string(),
                message: "raw export template cannot be empty".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let error = |message: String| ValidationError {
            field: "server.bind".to_string(),
            message,
        };

        if self.bind.is_empty() {
            errors.push(error("bind address cannot be empty".to_string()));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(error(format!(
                "invalid bind address '{}': expected format 'host:port'",
                self.bind
            ))),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(error("port cannot be 0".to_string())),
                Ok(_) => {}
                Err(_) => errors.push(error(format!(
                    "invalid port '{}': must be a number 1-65535",
                    port
                ))),
            },
        }

        errors
    }
}

/// Where readings live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Volatile; everything is lost on restart.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file path, used by the SQLite backend.
    pub path: PathBuf,
    /// Concurrent read connections for the SQLite backend; 0 reads through the writer.
    pub read_connections: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: fieldline_store::default_db_path(),
            read_connections: fieldline_store::DEFAULT_READ_CONNECTIONS,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.backend == StorageBackend::Sqlite && self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Series builder and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Hard cap on points per series, applied on top of each request.
    pub max_chart_items: usize,
    /// Number of series kept in the query cache.
    pub cache_capacity: usize,
    /// Readings fetched per store page.
    pub page_size: usize,
    pub retry: RetrySettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_chart_items: DEFAULT_MAX_CHART_ITEMS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetrySettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("engine.max_chart_items", self.max_chart_items),
            ("engine.cache_capacity", self.cache_capacity),
            ("engine.page_size", self.page_size),
        ] {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        errors.extend(self.retry.validate());
        errors
    }

    /// Engine configuration for these settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            builder: BuilderConfig {
                max_chart_items: self.max_chart_items,
                page_size: self.page_size,
                retry: self.retry.retry_config(),
            },
            cache_capacity: self.cache_capacity,
        }
    }
}

/// Backoff for transient store failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let store = RetryConfig::for_store();
        Self {
            max_retries: store.max_retries,
            initial_delay_ms: u64::try_from(store.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(store.max_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_multiplier: store.backoff_multiplier,
            jitter: store.jitter,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            errors.push(ValidationError {
                field: "engine.retry.backoff_multiplier".to_string(),
                message: format!(
                    "backoff multiplier {} must be a finite number >= 1.0",
                    self.backoff_multiplier
                ),
            });
        }
        if self.initial_delay_ms > self.max_delay_ms {
            errors.push(ValidationError {
                field: "engine.retry.initial_delay_ms".to_string(),
                message: format!(
                    "initial delay {}ms exceeds max delay {}ms",
                    self.initial_delay_ms, self.max_delay_ms
                ),
            });
        }

        errors
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .jitter(self.jitter)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `engine.retry.max_delay_ms`).
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldline")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation_errors(config: &Config) -> Vec<ValidationError> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.engine.max_chart_items, 10_000);
        assert_eq!(config.formats, DateFormats::default());
    }

    #[test]
    fn test_default_engine_settings_match_core() {
        assert_eq!(
            EngineSettings::default().engine_config(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.storage.backend = StorageBackend::Memory;
        config.engine.cache_capacity = 32;
        config.formats.chart = "HH:mm".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/server.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[server\nbind = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "192.168.1.1:8888"

            [storage]
            backend = "memory"
            read_connections = 2

            [engine]
            max_chart_items = 500
            page_size = 1000

            [engine.retry]
            max_retries = 5
            initial_delay_ms = 10
            max_delay_ms = 100
            jitter = false

            [formats]
            table = "dd/MM/yy HH:mm"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "192.168.1.1:8888");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.read_connections, 2);
        assert_eq!(config.engine.max_chart_items, 500);
        assert_eq!(config.engine.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.formats.table, "dd/MM/yy HH:mm");
        assert_eq!(config.formats.raw, DateFormats::default().raw);

        let engine = config.engine.engine_config();
        assert_eq!(engine.builder.page_size, 1000);
        assert_eq!(engine.builder.retry.max_retries, 5);
        assert_eq!(engine.builder.retry.max_delay, Duration::from_millis(100));
        assert!(!engine.builder.retry.jitter);
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("fieldline/server.toml"));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_server_bind_validation() {
        for bind in ["127.0.0.1:8080", "[::1]:8080", "localhost:8080"] {
            let config = ServerConfig {
                bind: bind.to_string(),
            };
            assert!(config.validate().is_empty(), "{bind} should be valid");
        }

        for (bind, fragment) in [
            ("", "cannot be empty"),
            ("127.0.0.1", "expected format"),
            ("127.0.0.1:0", "cannot be 0"),
            ("127.0.0.1:http", "invalid port"),
        ] {
            let errors = ServerConfig {
                bind: bind.to_string(),
            }
            .validate();
            assert_eq!(errors.len(), 1, "{bind}");
            assert!(errors[0].message.contains(fragment), "{bind}");
        }
    }

    #[test]
    fn test_storage_path_only_required_for_sqlite() {
        let mut storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: PathBuf::new(),
            read_connections: 0,
        };
        assert_eq!(storage.validate().len(), 1);

        storage.backend = StorageBackend::Memory;
        assert!(storage.validate().is_empty());
    }

    #[test]
    fn test_engine_validation_collects_all_errors() {
        let mut config = Config::default();
        config.engine.max_chart_items = 0;
        config.engine.page_size = 0;
        config.engine.retry.backoff_multiplier = 0.5;
        config.engine.retry.initial_delay_ms = 5_000;
        config.formats.raw = " ".to_string();

        let fields: Vec<String> = validation_errors(&config)
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            [
                "engine.max_chart_items",
                "engine.page_size",
                "engine.retry.backoff_multiplier",
                "engine.retry.initial_delay_ms",
                "formats.raw",
            ]
        );
    }

    #[test]
    fn test_config_validation_error_display() {
        let mut config = Config::default();
        config.server.bind = String::new();
        let display = config.validate().unwrap_err().to_string();
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("  - server.bind: bind address cannot be empty"));
    }
}
