//! PipelineConfig - Config Loader output
//!
//! Sizes, timeouts and policies of every pipeline stage. All sections are
//! optional; defaults match a small production deployment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AckPolicy, OffsetReset, ShutdownPolicy};

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Broker collaborator settings
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Intake buffer settings
    #[serde(default)]
    #[validate(nested)]
    pub intake: IntakeConfig,

    /// Worker pool settings
    #[serde(default)]
    #[validate(nested)]
    pub workers: WorkerConfig,

    /// Storage collaborator settings
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Shutdown protocol settings
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Broker implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// Newline-delimited JSON file, one payload per line
    #[default]
    Replay,
    /// In-process broker fed programmatically
    Memory,
}

/// Broker consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,

    /// Replay file (replay broker only)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Topic to subscribe to
    #[serde(default = "default_topic")]
    #[validate(length(min = 1))]
    pub topic: String,

    /// Consumer group used for offset commits
    #[serde(default = "default_consumer_group")]
    #[validate(length(min = 1))]
    pub consumer_group: String,

    /// Client identifier reported to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Start position when the group has no committed offset
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Maximum wait of one poll when no data is available
    #[serde(default = "default_poll_timeout_ms")]
    #[validate(range(min = 1))]
    pub poll_timeout_ms: u64,

    /// Maximum records returned by one poll
    #[serde(default = "default_max_records")]
    #[validate(range(min = 1))]
    pub max_records: usize,

    /// Offset acknowledgment policy
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

fn default_topic() -> String {
    "websites_metrics".to_string()
}

fn default_consumer_group() -> String {
    "MetricsCG".to_string()
}

fn default_client_id() -> String {
    "MetricsConsumer1".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

fn default_max_records() -> usize {
    500
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            path: None,
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            client_id: default_client_id(),
            auto_offset_reset: OffsetReset::default(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_records: default_max_records(),
            ack_policy: AckPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Intake buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IntakeConfig {
    /// Maximum decoded messages waiting for dispatch
    #[serde(default = "default_intake_capacity")]
    #[validate(range(min = 1))]
    pub capacity: usize,
}

fn default_intake_capacity() -> usize {
    1000
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: default_intake_capacity(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Number of concurrent storage writers
    #[serde(default = "default_worker_count")]
    #[validate(range(min = 1))]
    pub count: usize,

    /// Tasks that may wait for a free worker before `submit` blocks
    #[serde(default = "default_worker_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 5
}

fn default_worker_queue_capacity() -> usize {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_worker_queue_capacity(),
        }
    }
}

/// Storage implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process-local tables (tests, dry runs)
    #[default]
    Memory,
    /// PostgreSQL (requires the `postgres` feature)
    Postgres,
}

/// Storage and connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,

    /// Connection string (postgres only)
    #[serde(default)]
    pub dsn: Option<String>,

    /// Connections opened at startup
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Upper bound of concurrently open connections
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: usize,

    /// How long a worker waits for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,
}

fn default_min_connections() -> usize {
    4
}

fn default_max_connections() -> usize {
    15
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            dsn: None,
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Shutdown protocol configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Discard buffered metrics instead of draining them on termination
    #[serde(default)]
    pub drop_on_abort: bool,
}

impl ShutdownConfig {
    pub fn policy(&self) -> ShutdownPolicy {
        ShutdownPolicy::from_drop_on_abort(self.drop_on_abort)
    }
}
