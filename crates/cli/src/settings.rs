//! Effective configuration: file (or defaults) + CLI/env overrides.

use std::path::Path;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{BrokerKind, PipelineConfig, StorageKind};
use tracing::info;

use crate::cli::OverrideArgs;
use crate::error::CliError;

/// Load the configuration file (defaults when `None`), apply overrides and validate
pub fn resolve_config(path: Option<&Path>, overrides: &OverrideArgs) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            ConfigLoader::parse_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            PipelineConfig::default()
        }
    };

    apply_overrides(&mut config, overrides);
    config_loader::validate(&config).context("Invalid effective configuration")?;
    Ok(config)
}

/// Flags and environment variables take precedence over file values
pub fn apply_overrides(config: &mut PipelineConfig, overrides: &OverrideArgs) {
    if let Some(drop_on_abort) = overrides.drop_on_abort {
        config.shutdown.drop_on_abort = drop_on_abort;
    }
    if let Some(ref path) = overrides.replay {
        info!(path = %path.display(), "Replaying metrics from file");
        config.broker.kind = BrokerKind::Replay;
        config.broker.path = Some(path.clone());
    }
    if let Some(ref dsn) = overrides.pg_uri {
        config.storage.kind = StorageKind::Postgres;
        config.storage.dsn = Some(dsn.clone());
    }
    if let Some(ref topic) = overrides.topic {
        config.broker.topic = topic.clone();
    }
    if let Some(ref group) = overrides.consumer_group {
        config.broker.consumer_group = group.clone();
    }
    if let Some(ref client_id) = overrides.client_id {
        config.broker.client_id = client_id.clone();
    }
    if let Some(reset) = overrides.auto_offset_reset {
        config.broker.auto_offset_reset = reset.into();
    }
}
