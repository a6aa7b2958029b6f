//! 指标定义与运行摘要
//!
//! 各管道组件直接通过 `metrics` 宏上报；这里集中登记指标说明，
//! 并在运行结束时把各组件快照汇总为 [`RunSummary`]。

use std::fmt;
use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram, gauge, Unit};

pub const MESSAGES_FETCHED: &str = "metrics_consumer_messages_fetched_total";
pub const MESSAGES_DECODED: &str = "metrics_consumer_messages_decoded_total";
pub const DECODE_ERRORS: &str = "metrics_consumer_decode_errors_total";
pub const MESSAGES_DISCARDED: &str = "metrics_consumer_messages_discarded_total";
pub const METRICS_PERSISTED: &str = "metrics_consumer_metrics_persisted_total";
pub const METRICS_FAILED: &str = "metrics_consumer_metrics_failed_total";
pub const POOL_ACQUIRE_TIMEOUTS: &str = "metrics_consumer_pool_acquire_timeouts_total";
pub const INTAKE_DEPTH: &str = "metrics_consumer_intake_depth";
pub const WORKER_QUEUE_DEPTH: &str = "metrics_consumer_worker_queue_depth";
pub const CONNECTIONS_IN_USE: &str = "metrics_consumer_pool_connections_in_use";
pub const PERSIST_LATENCY: &str = "metrics_consumer_persist_latency_ms";
pub const RUN_DURATION: &str = "metrics_consumer_last_run_duration_seconds";

/// 登记所有指标的说明与单位
///
/// 安装 Prometheus recorder 之后调用一次即可。
pub fn describe_metrics() {
    describe_counter!(MESSAGES_FETCHED, "Raw messages returned by broker polls");
    describe_counter!(MESSAGES_DECODED, "Messages decoded and pushed to the intake buffer");
    describe_counter!(DECODE_ERRORS, "Malformed payloads skipped by the poller");
    describe_counter!(
        MESSAGES_DISCARDED,
        "In-flight messages discarded by a drop-on-abort shutdown"
    );
    describe_counter!(METRICS_PERSISTED, "Metrics committed to storage");
    describe_counter!(METRICS_FAILED, "Persistence attempts that failed or panicked");
    describe_counter!(
        POOL_ACQUIRE_TIMEOUTS,
        "Connection acquisitions that timed out on an exhausted pool"
    );
    describe_gauge!(INTAKE_DEPTH, "Messages waiting in the intake buffer");
    describe_gauge!(WORKER_QUEUE_DEPTH, "Tasks waiting for a free worker");
    describe_gauge!(CONNECTIONS_IN_USE, "Storage connections currently checked out");
    describe_histogram!(
        PERSIST_LATENCY,
        Unit::Milliseconds,
        "Latency of one successful persist call"
    );
    describe_gauge!(RUN_DURATION, Unit::Seconds, "Duration of the last pipeline run");
}

/// 一次管道运行的汇总
///
/// 由 CLI 在关闭流程结束后，根据 poller / dispatcher / 连接池快照填写。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub duration: Duration,

    // Broker Poller
    pub fetched: u64,
    pub pushed: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
    pub committed: u64,

    // Dispatcher / Worker Pool
    pub dispatched: u64,
    pub discarded: u64,
    pub persisted: u64,
    pub failed: u64,

    // Connection Pool
    pub acquire_timeouts: u64,
    pub connections_opened: u64,
    pub connections_discarded: u64,

    /// 关闭策略 ("drain" / "drop")
    pub shutdown_policy: String,
}

impl RunSummary {
    /// 每秒持久化条数
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.persisted as f64 / secs
        } else {
            0.0
        }
    }

    /// 失败率 (%)，基于已完成的写入
    pub fn failure_rate(&self) -> f64 {
        let total = self.persisted + self.failed;
        if total > 0 {
            self.failed as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// 已拉取但没有到达存储的消息数
    ///
    /// 包括解码失败、关闭时丢弃以及写入失败的消息。
    pub fn lost(&self) -> u64 {
        self.decode_errors + self.discarded + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Metrics Consumer Run Summary ===")?;
        writeln!(
            f,
            "Duration: {:.2}s (shutdown: {})",
            self.duration.as_secs_f64(),
            if self.shutdown_policy.is_empty() {
                "n/a"
            } else {
                self.shutdown_policy.as_str()
            }
        )?;
        writeln!(
            f,
            "Broker: fetched={} pushed={} decode_errors={} poll_errors={} committed={}",
            self.fetched, self.pushed, self.decode_errors, self.poll_errors, self.committed
        )?;
        writeln!(
            f,
            "Dispatch: dispatched={} discarded={}",
            self.dispatched, self.discarded
        )?;
        writeln!(
            f,
            "Storage: persisted={} failed={} ({:.2}%) throughput={:.2}/s",
            self.persisted,
            self.failed,
            self.failure_rate(),
            self.throughput()
        )?;
        write!(
            f,
            "Pool: opened={} discarded={} acquire_timeouts={}",
            self.connections_opened, self.connections_discarded, self.acquire_timeouts
        )
    }
}

/// 把运行摘要写入 gauge，便于进程退出前最后一次抓取
pub fn record_run_summary(summary: &RunSummary) {
    gauge!(RUN_DURATION).set(summary.duration.as_secs_f64());
    gauge!(INTAKE_DEPTH).set(0.0);
    gauge!(WORKER_QUEUE_DEPTH).set(0.0);
    gauge!(CONNECTIONS_IN_USE).set(0.0);
}
