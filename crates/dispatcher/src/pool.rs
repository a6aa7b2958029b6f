//! Worker Pool - fixed workers reading from a bounded task queue

use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use contracts::{ContractError, MetricStore, PersistOutcome, WorkerConfig};
use ingestion::Envelope;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::WorkerPoolMetrics;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Concurrent workers
    pub workers: usize,
    /// Tasks that may wait for a worker before `submit` blocks
    pub queue_capacity: usize,
}

impl WorkerPoolConfig {
    pub fn from_workers(config: &WorkerConfig) -> Self {
        Self {
            workers: config.count,
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Bounded pool of workers running `MetricStore::persist`
pub struct WorkerPool<S> {
    tx: Sender<Envelope>,
    workers: Vec<JoinHandle<()>>,
    store: Arc<S>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl<S> WorkerPool<S>
where
    S: MetricStore + Sync + 'static,
{
    /// Create the pool and spawn its workers
    #[instrument(name = "worker_pool_spawn", skip(store), fields(store = %store.name()))]
    pub fn spawn(store: Arc<S>, config: WorkerPoolConfig) -> Self {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let metrics = Arc::new(WorkerPoolMetrics::new());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let store = Arc::clone(&store);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    worker_loop(id, rx, store, metrics).await;
                })
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), queue_capacity = config.queue_capacity, "worker pool started");

        Self {
            tx,
            workers,
            store,
            metrics,
        }
    }

    /// Queue one message for persistence, waiting while the queue is full
    ///
    /// # Errors
    /// `DispatcherError::PoolShutDown` after [`WorkerPool::shutdown`].
    pub async fn submit(&self, envelope: Envelope) -> Result<(), DispatcherError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| DispatcherError::PoolShutDown)?;
        self.metrics.inc_submitted();
        self.metrics.set_queue_len(self.tx.len());
        Ok(())
    }

    /// Stop accepting tasks; with `wait`, block until queued and running
    /// tasks have completed
    #[instrument(name = "worker_pool_shutdown", skip(self))]
    pub async fn shutdown(&mut self, wait: bool) {
        self.tx.close();
        if !wait {
            return;
        }
        for handle in std::mem::take(&mut self.workers) {
            if let Err(e) = handle.await {
                error!(error = ?e, "worker task panicked");
            }
        }
        debug!("worker pool drained");
    }

    pub fn is_shut_down(&self) -> bool {
        self.tx.is_closed()
    }

    /// Get the store the workers write to
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }
}

/// Persist one message; acknowledge it when its record is stored
async fn run_task<S: MetricStore>(
    store: &S,
    envelope: Envelope,
) -> Result<PersistOutcome, ContractError> {
    let (record, receipt) = envelope.into_parts();
    let outcome = store.persist(&record).await?;
    if let Some(receipt) = receipt {
        receipt.ack();
    }
    Ok(outcome)
}

/// Worker loop: pull, persist, report; exits when the queue is closed and empty
#[instrument(name = "worker_loop", skip(rx, store, metrics))]
async fn worker_loop<S>(
    id: usize,
    rx: Receiver<Envelope>,
    store: Arc<S>,
    metrics: Arc<WorkerPoolMetrics>,
) where
    S: MetricStore + Sync + 'static,
{
    debug!(worker = id, "worker started");

    while let Ok(envelope) = rx.recv().await {
        metrics.set_queue_len(rx.len());
        metrics.inc_in_flight();

        let url = envelope.record.url.clone();
        let offset = envelope.offset;
        let task_store = Arc::clone(&store);
        // Own task per message: a panic fails this message, not the worker.
        let result = tokio::spawn(async move { run_task(&*task_store, envelope).await }).await;

        metrics.dec_in_flight();
        match result {
            Ok(Ok(_)) => metrics.inc_persisted(),
            Ok(Err(e)) if e.is_timeout() => {
                metrics.inc_failed();
                warn!(worker = id, %url, %offset, error = %e, "metric lost: no connection available");
            }
            Ok(Err(e)) => {
                metrics.inc_failed();
                error!(worker = id, %url, %offset, error = %e, "metric lost: persist failed");
            }
            Err(e) => {
                metrics.inc_failed();
                metrics.inc_panicked();
                error!(worker = id, %url, %offset, error = %e, "metric lost: persist task panicked");
            }
        }
    }

    debug!(worker = id, "worker stopped");
}
