//! Ingestion 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Intake Buffer 已关闭（消费端已关闭或已释放）
    #[error("intake buffer closed")]
    BufferClosed,

    /// Poller 任务异常退出
    #[error("poller task failed: {message}")]
    TaskFailed {
        /// 错误消息
        message: String,
    },

    /// 其它契约层错误
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl IngestionError {
    /// 创建任务失败错误
    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
