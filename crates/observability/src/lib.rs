//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式, `RUST_LOG` 过滤)
//! - Prometheus 指标导出 (`metrics_consumer_*`)
//! - 运行摘要 (RunSummary) 统计
//!
//! ## 使用示例
//!
//! ```ignore
//! let config = observability::ObservabilityConfig::from_verbosity(1, false)
//!     .with_metrics_port(Some(9000));
//! observability::init_with_config(config)?;
//! ```

pub mod metrics;

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{describe_metrics, record_run_summary, RunSummary};

/// 使用默认配置初始化（JSON 日志 + 9000 端口）
pub fn init() -> Result<()> {
    init_with_config(ObservabilityConfig::default())
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// 默认日志级别 (`RUST_LOG` 未设置时生效)
    pub default_log_level: String,
    /// 忽略 `RUST_LOG`，强制使用 `default_log_level`
    pub force_level: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: Some(9000),
            default_log_level: "info".to_string(),
            force_level: false,
        }
    }
}

impl ObservabilityConfig {
    /// 根据 `-v` 次数与 `--quiet` 推导日志级别
    ///
    /// `--quiet` 只输出 warn 及以上，且不受 `RUST_LOG` 影响。
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let (level, force_level) = if quiet {
            ("warn", true)
        } else {
            match verbose {
                0 => ("info", false),
                1 => ("debug", false),
                _ => ("trace", false),
            }
        };
        Self {
            default_log_level: level.to_string(),
            force_level,
            ..Self::default()
        }
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    /// 端口 0 视为禁用
    pub fn with_metrics_port(mut self, port: Option<u16>) -> Self {
        self.metrics_port = port.filter(|p| *p != 0);
        self
    }

    fn env_filter(&self) -> EnvFilter {
        if self.force_level {
            return EnvFilter::new(&self.default_log_level);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_log_level))
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 使用自定义配置初始化
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    // 1. Tracing
    let filter = config.env_filter();

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    // 2. Prometheus Exporter (if enabled)
    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        level = %config.default_log_level,
        "Observability initialized"
    );

    Ok(())
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
///
/// 用于 Tracing 已由其他模块初始化的场景。
pub fn init_metrics_only(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus recorder")?;

    describe_metrics();
    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
