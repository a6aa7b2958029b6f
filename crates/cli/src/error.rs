//! Error types for CLI operations.

use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Effective configuration rejected
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Failure reported by a pipeline crate
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}
