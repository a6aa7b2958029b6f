//! Pipeline statistics and run summary.

use std::time::Duration;

use contracts::ShutdownPolicy;
use dispatcher::DispatchReport;
use ingestion::PollerMetricsSnapshot;
use observability::RunSummary;
use storage::PoolMetricsSnapshot;

/// Row counts of the in-memory store after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoredCounts {
    pub websites: usize,
    pub metrics: usize,
}

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Shutdown policy that was in effect
    pub policy: ShutdownPolicy,

    /// Broker poller counters
    pub poller: PollerMetricsSnapshot,

    /// Dispatcher outcome
    pub report: DispatchReport,

    /// Connection pool counters
    pub pool: PoolMetricsSnapshot,

    /// Only set for the in-memory store
    pub stored: Option<StoredCounts>,
}

impl PipelineStats {
    /// Flatten into the observability summary
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            duration: self.duration,
            fetched: self.poller.fetched,
            pushed: self.poller.pushed,
            decode_errors: self.poller.decode_errors,
            poll_errors: self.poller.poll_errors,
            committed: self.poller.committed,
            dispatched: self.report.dispatched,
            discarded: self.report.discarded + self.poller.discarded,
            persisted: self.report.persisted,
            failed: self.report.failed,
            acquire_timeouts: self.pool.timeouts,
            connections_opened: self.pool.opened,
            connections_discarded: self.pool.discarded,
            shutdown_policy: match self.policy {
                ShutdownPolicy::Drain => "drain".to_string(),
                ShutdownPolicy::DropOnAbort => "drop".to_string(),
            },
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!();
        println!("{}", self.summary());
        if let Some(stored) = self.stored {
            println!(
                "Memory store: websites={} metrics={}",
                stored.websites, stored.metrics
            );
        }
        println!();
    }
}
