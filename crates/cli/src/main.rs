//! # Metrics Consumer CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载、覆盖 (CLI / 环境变量 / .env) 与验证
//! - 管道编排与生命周期管理
//! - SIGINT/SIGTERM 优雅关闭

mod cli;
mod commands;
mod error;
mod pipeline;
mod settings;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Prometheus exporter only runs for `run`
    let metrics_port = match &cli.command {
        Commands::Run(args) if !args.dry_run => Some(args.metrics_port),
        _ => None,
    };
    let obs_config = ObservabilityConfig::from_verbosity(cli.verbose, cli.quiet)
        .with_log_format(cli.log_format.into())
        .with_metrics_port(metrics_port);
    observability::init_with_config(obs_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Metrics consumer CLI starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %format!("{e:#}"), "Command failed");
    }

    result
}
