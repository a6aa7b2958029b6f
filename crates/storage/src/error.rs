//! Storage 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Storage 错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 启动时无法建立连接池（致命）
    #[error("failed to initialise connection pool '{connector}': {source}")]
    Startup {
        /// 连接器名称
        connector: String,
        /// 底层错误
        #[source]
        source: ContractError,
    },

    /// 当前构建未启用该存储后端
    #[error("storage backend '{0}' is not enabled in this build")]
    BackendDisabled(String),

    /// 其它契约层错误
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Storage Result 类型别名
pub type Result<T> = std::result::Result<T, StorageError>;
