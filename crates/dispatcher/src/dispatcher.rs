//! Dispatcher - pipeline control loop and shutdown protocol
//!
//! `Running`: pop from the Intake Buffer, submit to the Worker Pool.
//! `ShuttingDown` is entered on cancellation or when the buffer closes
//! because the poller finished. The shutdown policy then decides:
//! - `Drain`: keep popping and submitting until the buffer is closed and
//!   empty, then wait for every submitted task
//! - `DropOnAbort`: close the buffer, discard what it holds, wait only for
//!   tasks already submitted
//!
//! `Stopped`: worker pool joined, store (connection pool) closed.

use contracts::{DispatchState, MetricStore, ShutdownPolicy};
use ingestion::{Envelope, IntakeConsumer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatcherError;
use crate::pool::WorkerPool;

/// Outcome of one dispatcher run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages handed to the worker pool
    pub dispatched: u64,
    /// Messages dropped by drop-on-abort
    pub discarded: u64,
    /// Metrics persisted by the workers
    pub persisted: u64,
    /// Persistence attempts that failed
    pub failed: u64,
}

/// The pipeline control loop
pub struct Dispatcher<S> {
    intake: IntakeConsumer<Envelope>,
    pool: WorkerPool<S>,
    cancel: CancellationToken,
    policy: ShutdownPolicy,
    state: watch::Sender<DispatchState>,
}

impl<S> Dispatcher<S>
where
    S: MetricStore + Sync + 'static,
{
    /// Create a dispatcher in the `Running` state
    pub fn new(
        intake: IntakeConsumer<Envelope>,
        pool: WorkerPool<S>,
        cancel: CancellationToken,
        policy: ShutdownPolicy,
    ) -> Self {
        let (state, _) = watch::channel(DispatchState::Running);
        Self {
            intake,
            pool,
            cancel,
            policy,
            state,
        }
    }

    /// Observe lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<Result<DispatchReport, DispatcherError>> {
        tokio::spawn(self.run())
    }

    /// Run until the pipeline has stopped
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> Result<DispatchReport, DispatcherError> {
        info!(
            policy = ?self.policy,
            capacity = self.intake.capacity(),
            "dispatcher started"
        );
        let mut report = DispatchReport::default();

        self.dispatch_until_stop(&mut report).await?;

        self.set_state(DispatchState::ShuttingDown);
        match self.policy {
            ShutdownPolicy::Drain => self.drain_remaining(&mut report).await?,
            ShutdownPolicy::DropOnAbort => self.discard_remaining(&mut report),
        }

        info!(in_flight = self.pool.metrics().in_flight(), "waiting for submitted tasks");
        self.pool.shutdown(true).await;
        self.pool.store().close().await;

        let pool_stats = self.pool.metrics().snapshot();
        report.persisted = pool_stats.persisted;
        report.failed = pool_stats.failed;

        self.set_state(DispatchState::Stopped);
        info!(
            dispatched = report.dispatched,
            discarded = report.discarded,
            persisted = report.persisted,
            failed = report.failed,
            "dispatcher stopped"
        );
        Ok(report)
    }

    /// `Running`: pop/submit until cancelled or the buffer is closed
    async fn dispatch_until_stop(
        &mut self,
        report: &mut DispatchReport,
    ) -> Result<(), DispatcherError> {
        loop {
            let popped = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(buffered = self.intake.len(), "termination requested");
                    return Ok(());
                }
                popped = self.intake.pop() => popped,
            };
            ::metrics::gauge!("metrics_consumer_intake_depth").set(self.intake.len() as f64);

            let Some(envelope) = popped else {
                info!("intake closed by the poller");
                return Ok(());
            };

            if self.policy.drops_on_abort() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        // Submission was still blocked on a full queue.
                        self.count_discarded(report, 1);
                        return Ok(());
                    }
                    submitted = self.pool.submit(envelope) => submitted?,
                }
            } else {
                self.pool.submit(envelope).await?;
            }
            report.dispatched += 1;
        }
    }

    /// `Drain`: submit everything still buffered or still being pushed
    async fn drain_remaining(&mut self, report: &mut DispatchReport) -> Result<(), DispatcherError> {
        let mut drained = 0u64;
        while let Some(envelope) = self.intake.pop().await {
            self.pool.submit(envelope).await?;
            drained += 1;
        }
        report.dispatched += drained;
        info!(drained, "intake buffer drained");
        Ok(())
    }

    /// `DropOnAbort`: close the buffer and discard its contents
    fn discard_remaining(&mut self, report: &mut DispatchReport) {
        self.intake.close();
        let discarded = self.intake.drain();
        self.count_discarded(report, discarded.len());
        if !discarded.is_empty() {
            warn!(count = discarded.len(), "buffered metrics discarded on abort");
        }
    }

    fn count_discarded(&self, report: &mut DispatchReport, count: usize) {
        report.discarded += count as u64;
        ::metrics::counter!("metrics_consumer_messages_discarded_total").increment(count as u64);
    }

    fn set_state(&self, state: DispatchState) {
        debug!(?state, "dispatcher state");
        self.state.send_replace(state);
    }
}
