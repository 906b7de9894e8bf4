//! Configuration for tasq queues and workers
//!
//! Supports:
//! - Type-safe config structs via serde
//! - TOML, or JSON for files ending in `.json`
//! - Auto-generation of a default config file
//! - Manual reload
//!
//! # Example
//!
//! ```ignore
//! use tasq_core::config::{config_path, TasqConfig};
//!
//! let config = TasqConfig::load(config_path())?;
//! let queue = Arc::new(TaskQueue::with_config(&config.queue));
//! let mut workers = WorkerGroup::from_config(queue, &config.workers);
//! ```
//!
//! ```toml
//! version = 1
//! debug = false
//!
//! [queue]
//! payload_capacity = 4096
//! reference_capacity = 256
//! kind_capacity = 16
//!
//! [workers]
//! count = 4
//! thread_name = "tasq-worker"
//! owns_queue = true
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use loader::{config_path, ConfigFormat, CONFIG_ENV, DEFAULT_CONFIG_FILE};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse or write JSON content
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The file extension is neither `.toml` nor `.json`
    #[error("Unsupported config format: {0:?}")]
    UnsupportedFormat(PathBuf),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Initial store and cache sizes of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Initial payload store size in bytes
    pub payload_capacity: usize,

    /// Initial number of reference slots
    pub reference_capacity: usize,

    /// Initial number of descriptor slots in the kind cache
    pub kind_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            payload_capacity: 4096,
            reference_capacity: 256,
            kind_capacity: crate::metadata::DEFAULT_KIND_CAPACITY,
        }
    }
}

/// Worker group settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads
    pub count: usize,

    /// Thread name prefix; workers are named `{thread_name}-{index}`
    pub thread_name: String,

    /// Dispose the queue when the workers are disposed
    pub owns_queue: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            thread_name: "tasq-worker".to_string(),
            owns_queue: true,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasqConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    pub queue: QueueConfig,

    pub workers: WorkerConfig,
}

impl Default for TasqConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

impl TasqConfig {
    /// Load config from file, creating a default one if missing.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = format.parse(&content)?;
            tracing::debug!("Loaded config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Created default config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = ConfigFormat::from_path(path)?.render(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reload config from file.
    ///
    /// Updates self with the current file contents.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        *self = ConfigFormat::from_path(path)?.parse(&content)?;
        tracing::debug!("Reloaded config from {:?}", path);
        Ok(())
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        ConfigFormat::Toml.parse(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tasq-config-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_config_default() {
        let config = TasqConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert!(config.workers.count >= 1);
        assert!(config.workers.owns_queue);
        assert_eq!(config.queue.kind_capacity, 16);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = TasqConfig::from_toml_str(
            r#"
            debug = true

            [workers]
            count = 3
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.workers.count, 3);
        assert_eq!(config.workers.thread_name, "tasq-worker");
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_config_serialize() {
        let config = TasqConfig {
            version: 2,
            debug: true,
            ..TasqConfig::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("version = 2"));
        assert!(toml_str.contains("debug = true"));
        assert!(toml_str.contains("[queue]"));
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        assert!(matches!(
            TasqConfig::from_toml_str("workers = 3"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_creates_default_then_reloads() {
        let path = temp_path("created/tasq.toml");
        let _ = std::fs::remove_file(&path);

        let mut config = TasqConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, TasqConfig::default());

        let changed = TasqConfig {
            debug: true,
            queue: QueueConfig {
                payload_capacity: 64,
                ..QueueConfig::default()
            },
            ..TasqConfig::default()
        };
        changed.save(&path).unwrap();
        config.reload(&path).unwrap();
        assert_eq!(config, changed);
        assert_eq!(TasqConfig::load(&path).unwrap(), changed);
    }

    #[test]
    fn test_json_round_trip() {
        let path = temp_path("tasq.json");
        let config = TasqConfig {
            workers: WorkerConfig {
                count: 2,
                thread_name: "render".to_string(),
                owns_queue: false,
            },
            ..TasqConfig::default()
        };
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"thread_name\": \"render\""));
        assert_eq!(TasqConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            TasqConfig::default().save(temp_path("tasq.ini")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
