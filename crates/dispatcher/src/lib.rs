//! # Dispatcher
//!
//! 管线控制循环模块。
//!
//! 负责：
//! - 从 Intake Buffer 取出消息，提交给 Worker Pool
//! - Worker Pool：固定数量的 worker + 有界任务队列（第二级背压）
//! - 关闭协议：`Running → ShuttingDown → Stopped`，按策略排空或丢弃
//! - 单条写入失败不影响其它 worker

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pool;

pub use contracts::{DispatchState, MetricStore, ShutdownPolicy};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::DispatcherError;
pub use metrics::{WorkerPoolMetrics, WorkerPoolMetricsSnapshot};
pub use pool::{WorkerPool, WorkerPoolConfig};
