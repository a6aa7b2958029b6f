//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `PipelineConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load_from_path(Path::new("consumer.toml")).unwrap();
//! println!("Topic: {}", config.broker.topic);
//! ```

mod parser;
mod validator;

pub use contracts::PipelineConfig;
pub use parser::ConfigFormat;
pub use self::validator::validate;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<PipelineConfig, ContractError> {
        let config = Self::parse_from_path(path)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Parse a configuration file without validating it
    ///
    /// For callers that apply overrides (CLI flags, environment) first and
    /// call [`validate`] on the merged result.
    pub fn parse_from_path(path: &Path) -> Result<PipelineConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        parser::parse(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<PipelineConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize PipelineConfig to TOML string
    pub fn to_toml(config: &PipelineConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize PipelineConfig to JSON string
    pub fn to_json(config: &PipelineConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<PipelineConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AckPolicy, BrokerKind, StorageKind};
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[broker]
kind = "replay"
path = "metrics.ndjson"
topic = "websites_metrics"

[storage]
kind = "memory"
max_connections = 8

[shutdown]
drop_on_abort = true
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.broker.kind, BrokerKind::Replay);
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.storage.max_connections, 8);
        assert!(config.shutdown.drop_on_abort);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config.broker.topic, config2.broker.topic);
        assert_eq!(config.workers.count, config2.workers.count);
    }

    #[test]
    fn test_round_trip_json() {
        let config = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let config2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config.broker.path, config2.broker.path);
        assert_eq!(config2.broker.ack_policy, AckPolicy::OnFetch);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[broker]
kind = "replay"
path = "metrics.ndjson"

[storage]
min_connections = 20
max_connections = 10
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("min_connections"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();

        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.broker.topic, "websites_metrics");
    }

    #[test]
    fn test_load_from_path_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_parse_from_path_defers_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(b"[broker]\nkind = \"replay\"\n").unwrap();

        let config = ConfigLoader::parse_from_path(file.path()).unwrap();
        assert!(config.broker.path.is_none());
        assert!(validate(&config).is_err());
        assert!(ConfigLoader::load_from_path(file.path()).is_err());
    }
}
