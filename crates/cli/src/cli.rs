//! CLI argument definitions using clap.

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Metrics Consumer - persists website health metrics from a broker topic
#[derive(Parser, Debug)]
#[command(
    name = "metrics-consumer",
    author,
    version,
    about = "Website metrics ingestion pipeline",
    long_about = "Consumes website health metrics from a broker topic and persists them.\n\n\
                  A dedicated poller feeds a bounded intake buffer, a dispatcher hands \n\
                  messages to a bounded worker pool, and workers write through a \n\
                  bounded connection pool. SIGINT/SIGTERM trigger a graceful shutdown."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "METRICS_CONSUMER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "METRICS_CONSUMER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion pipeline until SIGINT/SIGTERM or end of stream
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display the effective configuration
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "METRICS_CONSUMER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "METRICS_CONSUMER_METRICS_PORT")]
    pub metrics_port: u16,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,
}

/// Configuration overrides shared by `run` and `info`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Discard buffered metrics instead of draining them on termination
    ///
    /// `--drop-on-abort false` (or `DROP_MESSAGES_IF_ABORT=0`) turns a
    /// file-enabled setting off.
    #[arg(
        long,
        env = "DROP_MESSAGES_IF_ABORT",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = FalseyValueParser::new()
    )]
    pub drop_on_abort: Option<bool>,

    /// Replay metrics from an NDJSON file (one payload per line)
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// PostgreSQL connection string; selects the postgres store
    #[arg(long, env = "PG_URI", hide_env_values = true)]
    pub pg_uri: Option<String>,

    /// Topic to subscribe to
    #[arg(long, env = "TOPIC_NAME")]
    pub topic: Option<String>,

    /// Consumer group used for offset commits
    #[arg(long, env = "CONSUMER_GROUP")]
    pub consumer_group: Option<String>,

    /// Client identifier reported to the broker
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Start position when the group has no committed offset
    #[arg(long, value_enum, env = "AUTO_OFFSET_RESET")]
    pub auto_offset_reset: Option<OffsetResetArg>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long, env = "METRICS_CONSUMER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// `AUTO_OFFSET_RESET` values
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetResetArg {
    Earliest,
    Latest,
}

impl From<OffsetResetArg> for contracts::OffsetReset {
    fn from(arg: OffsetResetArg) -> Self {
        match arg {
            OffsetResetArg::Earliest => Self::Earliest,
            OffsetResetArg::Latest => Self::Latest,
        }
    }
}
