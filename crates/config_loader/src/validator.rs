//! 配置校验模块
//!
//! 校验规则：
//! - 各容量 / 数量 / 超时 > 0 (derive 规则)
//! - min_connections <= max_connections
//! - replay broker 必须提供 path
//! - postgres storage 必须提供 dsn

use ::validator::Validate;
use contracts::{BrokerKind, ContractError, PipelineConfig, StorageKind};

/// 校验 PipelineConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &PipelineConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_pool_bounds(config)?;
    validate_broker(config)?;
    validate_storage(config)?;
    Ok(())
}

/// 校验字段取值范围
fn validate_ranges(config: &PipelineConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("config", e.to_string()))
}

/// 校验连接池上下界
fn validate_pool_bounds(config: &PipelineConfig) -> Result<(), ContractError> {
    let storage = &config.storage;
    if storage.min_connections > storage.max_connections {
        return Err(ContractError::config_validation(
            "storage.min_connections / storage.max_connections",
            format!(
                "min_connections ({}) must be <= max_connections ({})",
                storage.min_connections, storage.max_connections
            ),
        ));
    }
    Ok(())
}

/// 校验 broker 配置
fn validate_broker(config: &PipelineConfig) -> Result<(), ContractError> {
    let broker = &config.broker;
    if broker.kind == BrokerKind::Replay && broker.path.is_none() {
        return Err(ContractError::config_validation(
            "broker.path",
            "replay broker requires a path",
        ));
    }
    Ok(())
}

/// 校验 storage 配置
fn validate_storage(config: &PipelineConfig) -> Result<(), ContractError> {
    let storage = &config.storage;
    let has_dsn = storage.dsn.as_deref().is_some_and(|dsn| !dsn.is_empty());
    if storage.kind == StorageKind::Postgres && !has_dsn {
        return Err(ContractError::config_validation(
            "storage.dsn",
            "postgres storage requires a dsn",
        ));
    }
    Ok(())
}
