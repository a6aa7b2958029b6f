//! Poller configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use contracts::{AckPolicy, PipelineConfig, ShutdownPolicy};

/// Broker Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum wait of one poll
    pub poll_timeout: Duration,

    /// When fetched offsets are committed
    pub ack_policy: AckPolicy,

    /// What happens to the in-hand batch on cancellation
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(2),
            ack_policy: AckPolicy::OnFetch,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

impl PollerConfig {
    /// Derive from the pipeline configuration
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            poll_timeout: config.broker.poll_timeout(),
            ack_policy: config.broker.ack_policy,
            shutdown_policy: config.shutdown.policy(),
        }
    }
}

/// Poller metrics
#[derive(Debug, Default)]
pub struct PollerMetrics {
    /// Raw messages fetched from the broker
    pub fetched: AtomicU64,

    /// Messages decoded and pushed to the Intake Buffer
    pub pushed: AtomicU64,

    /// Malformed payloads skipped
    pub decode_errors: AtomicU64,

    /// Failed poll calls
    pub poll_errors: AtomicU64,

    /// Offsets acknowledged to the broker
    pub committed: AtomicU64,

    /// Failed commit calls
    pub commit_errors: AtomicU64,

    /// Decoded messages abandoned on shutdown
    pub discarded: AtomicU64,
}

impl PollerMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetched(&self, count: usize) {
        self.fetched.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_pushed(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self, count: usize) {
        self.committed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_commit_error(&self) {
        self.commit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerMetricsSnapshot {
    pub fetched: u64,
    pub pushed: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
    pub committed: u64,
    pub commit_errors: u64,
    pub discarded: u64,
}
