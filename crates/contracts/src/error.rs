//! Layered error definitions
//!
//! Categorized by source: config / decode / broker / storage / pool

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Decode Errors =====
    /// Malformed broker payload
    #[error("payload decode error at offset {offset}: {message}")]
    Decode { offset: String, message: String },

    // ===== Broker Errors =====
    /// Broker connection error
    #[error("broker '{broker}' connection error: {message}")]
    BrokerConnection { broker: String, message: String },

    /// Broker fetch error
    #[error("broker '{broker}' poll error: {message}")]
    BrokerPoll { broker: String, message: String },

    /// Offset commit error
    #[error("broker '{broker}' commit error: {message}")]
    BrokerCommit { broker: String, message: String },

    // ===== Storage Errors =====
    /// Storage connection error (the connection must not be reused)
    #[error("storage connection error: {message}")]
    StorageConnection { message: String },

    /// Statement failed but the connection is still usable
    #[error("storage query error: {message}")]
    StorageQuery { message: String },

    /// Unique / foreign key violation
    #[error("storage constraint violation on '{constraint}': {message}")]
    StorageConstraint { constraint: String, message: String },

    // ===== Pool Errors =====
    /// No connection became available in time
    #[error("connection pool exhausted: waited {waited_ms}ms for a connection")]
    PoolExhausted { waited_ms: u64 },

    /// Pool already closed
    #[error("connection pool is closed")]
    PoolClosed,

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create decode error
    pub fn decode(offset: impl ToString, message: impl Into<String>) -> Self {
        Self::Decode {
            offset: offset.to_string(),
            message: message.into(),
        }
    }

    /// Create broker connection error
    pub fn broker_connection(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerConnection {
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Create broker poll error
    pub fn broker_poll(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerPoll {
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Create storage connection error
    pub fn storage_connection(message: impl Into<String>) -> Self {
        Self::StorageConnection {
            message: message.into(),
        }
    }

    /// Create storage query error
    pub fn storage_query(message: impl Into<String>) -> Self {
        Self::StorageQuery {
            message: message.into(),
        }
    }

    /// Create storage constraint error
    pub fn storage_constraint(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageConstraint {
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Whether the connection that produced this error must be discarded
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::StorageConnection { .. } | Self::Io(_))
    }

    /// Pool exhaustion is reported like a timeout, never as a fatal error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_classification() {
        assert!(ContractError::storage_connection("reset by peer").is_connection_error());
        assert!(!ContractError::storage_query("syntax").is_connection_error());
        assert!(!ContractError::storage_constraint("websites_url_key", "dup").is_connection_error());
        assert!(ContractError::PoolExhausted { waited_ms: 5 }.is_timeout());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ContractError::decode("p0@42", "missing field `url`");
        assert_eq!(
            err.to_string(),
            "payload decode error at offset p0@42: missing field `url`"
        );
    }
}
