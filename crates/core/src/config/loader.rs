//! Config path and format resolution

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "TASQ_CONFIG";

/// Default config file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tasq.toml";

/// Returns the config file path.
///
/// Uses `$TASQ_CONFIG` when set, otherwise `./tasq.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// On-disk config format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub(super) fn parse<T: DeserializeOwned>(self, content: &str) -> ConfigResult<T> {
        Ok(match self {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        })
    }

    pub(super) fn render<T: Serialize>(self, value: &T) -> ConfigResult<String> {
        Ok(match self {
            ConfigFormat::Toml => toml::to_string_pretty(value)?,
            ConfigFormat::Json => serde_json::to_string_pretty(value)?,
        })
    }
}
