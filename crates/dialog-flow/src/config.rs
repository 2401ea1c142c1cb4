//! Dialog configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use voxflow_infra_common::config::{env_flag, load_config};
use voxflow_infra_common::logging::LoggingConfig;

use crate::errors::Result;

/// Environment variable selecting the camelCase (JSON API) payload naming
pub const ENV_USE_JSON_API: &str = "VOXFLOW_USE_JSON_API";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "VOXFLOW_LOG_LEVEL";

/// Configuration for a [`Dialog`](crate::Dialog)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DialogConfig {
    /// Name used in logs
    pub service_name: String,
    /// Payloads use camelCase field names (`sessionId`) instead of snake_case
    pub use_json_api: bool,
    /// Capacity of the flow outcome broadcast channel
    pub outcome_capacity: usize,
    pub logging: LoggingConfig,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            service_name: "voxflow-dialog".to_string(),
            use_json_api: false,
            outcome_capacity: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl DialogConfig {
    /// Load configuration from a `.json` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(load_config(path)?)
    }

    /// Defaults overridden by `VOXFLOW_USE_JSON_API` and `VOXFLOW_LOG_LEVEL`
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of this configuration
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(use_json_api) = env_flag(ENV_USE_JSON_API)? {
            self.use_json_api = use_json_api;
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(self)
    }

    pub fn with_json_api(mut self) -> Self {
        self.use_json_api = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DialogConfig::default();
        assert!(!config.use_json_api);
        assert_eq!(config.outcome_capacity, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialog.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "use_json_api = true").unwrap();
        writeln!(f, "[logging]").unwrap();
        writeln!(f, "level = \"debug\"").unwrap();

        let config = DialogConfig::from_file(&path).unwrap();
        assert!(config.use_json_api);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.service_name, "voxflow-dialog");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_USE_JSON_API, "yes");
        std::env::set_var(ENV_LOG_LEVEL, "warn");
        let config = DialogConfig::from_env().unwrap();
        std::env::remove_var(ENV_USE_JSON_API);
        std::env::remove_var(ENV_LOG_LEVEL);

        assert!(config.use_json_api);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_invalid_env_flag() {
        std::env::set_var(ENV_USE_JSON_API, "maybe");
        let result = DialogConfig::from_env();
        std::env::remove_var(ENV_USE_JSON_API);

        assert!(result.is_err());
    }
}
