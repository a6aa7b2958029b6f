//! Worker pool metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics shared by all workers of a pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Tasks waiting in the queue
    queue_len: AtomicUsize,
    /// Tasks currently executing
    in_flight: AtomicUsize,
    /// Tasks accepted by `submit`
    submitted: AtomicU64,
    /// Metrics persisted
    persisted: AtomicU64,
    /// Persistence failures (including panics)
    failed: AtomicU64,
    /// Failed tasks that panicked
    panicked: AtomicU64,
}

impl WorkerPoolMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
        ::metrics::gauge!("metrics_consumer_worker_queue_depth").set(len as f64);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn inc_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn inc_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub fn inc_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("metrics_consumer_metrics_persisted_total").increment(1);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("metrics_consumer_metrics_failed_total").increment(1);
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    pub fn inc_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> WorkerPoolMetricsSnapshot {
        WorkerPoolMetricsSnapshot {
            queue_len: self.queue_len(),
            in_flight: self.in_flight(),
            submitted: self.submitted(),
            persisted: self.persisted(),
            failed: self.failed(),
            panicked: self.panicked(),
        }
    }
}

/// Snapshot of worker pool metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolMetricsSnapshot {
    pub queue_len: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub persisted: u64,
    pub failed: u64,
    pub panicked: u64,
}
