//! Configuration file loading
//!
//! Crates describe their own configuration as serde types; this module only
//! knows how to turn a file on disk into one of them. JSON and TOML are
//! supported, selected by file extension.

use std::path::Path;

use serde::de::DeserializeOwned;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported configuration format: {0}")]
    Unsupported(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Supported on-disk formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Picks the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            other => Err(ConfigError::Unsupported(format!(
                "{} (extension {:?}); only .json and .toml are supported",
                path.display(),
                other.unwrap_or("")
            ))),
        }
    }
}

/// Parse configuration text in the given format
pub fn parse_config<T: DeserializeOwned>(contents: &str, format: ConfigFormat) -> Result<T, ConfigError> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string())),
    }
}

/// Load a configuration file, choosing the parser from its extension
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

    tracing::debug!("Loading {:?} configuration from {}", format, path.display());
    parse_config(&contents, format)
}

/// Read a boolean environment variable.
///
/// Accepts `1`/`0`, `true`/`false`, `yes`/`no` and `on`/`off` in any case.
/// Returns `Ok(None)` when the variable is not set.
pub fn env_flag(key: &str) -> Result<Option<bool>, ConfigError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}
