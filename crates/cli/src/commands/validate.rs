//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{BrokerKind, PipelineConfig, StorageKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    broker: String,
    topic: String,
    storage: String,
    workers: usize,
    intake_capacity: usize,
    max_connections: usize,
    drop_on_abort: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    match result.error {
        None => Ok(()),
        Some(error) => Err(CliError::config_validation(error).into()),
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    let loaded = if args.config.exists() {
        config_loader::ConfigLoader::load_from_path(&args.config).map_err(CliError::from)
    } else {
        Err(CliError::config_not_found(config_path.clone()))
    };

    match loaded {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    broker: format!("{:?}", config.broker.kind),
                    topic: config.broker.topic.clone(),
                    storage: format!("{:?}", config.storage.kind),
                    workers: config.workers.count,
                    intake_capacity: config.intake.capacity,
                    max_connections: config.storage.max_connections,
                    drop_on_abort: config.shutdown.drop_on_abort,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &PipelineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.storage.kind == StorageKind::Memory {
        warnings.push("storage.kind is memory - metrics are not persisted across runs".to_string());
    }

    if config.broker.kind == BrokerKind::Memory {
        warnings.push("broker.kind is memory - nothing publishes to it from the CLI".to_string());
    }

    if config.workers.count > config.storage.max_connections {
        warnings.push(format!(
            "workers.count ({}) exceeds storage.max_connections ({}) - workers will wait for connections",
            config.workers.count, config.storage.max_connections
        ));
    }

    if config.shutdown.drop_on_abort && config.broker.ack_policy == contracts::AckPolicy::OnFetch {
        warnings.push(
            "drop_on_abort with ack_policy on_fetch loses buffered metrics on shutdown".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Broker: {} (topic {})", summary.broker, summary.topic);
            println!("  Storage: {}", summary.storage);
            println!("  Workers: {}", summary.workers);
            println!("  Intake capacity: {}", summary.intake_capacity);
            println!("  Max connections: {}", summary.max_connections);
            println!("  Drop on abort: {}", summary.drop_on_abort);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
