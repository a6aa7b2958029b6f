//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Worker pool no longer accepts tasks
    #[error("worker pool is shut down")]
    PoolShutDown,

    /// Dispatcher task ended abnormally
    #[error("dispatcher task failed: {message}")]
    TaskFailed { message: String },

    /// Contract-level error
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create task failure error
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }
}
