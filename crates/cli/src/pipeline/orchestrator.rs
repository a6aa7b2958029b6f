//! Pipeline orchestrator - wires broker, intake buffer, dispatcher, worker
//! pool and storage together.
//!
//! Resources are initialised in order (connection pool warm-up, broker
//! connect) before any task starts; a failure there is fatal.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::{BrokerKind, Connector, MessageSource, PipelineConfig, StorageKind};
use dispatcher::{Dispatcher, WorkerPool, WorkerPoolConfig};
use ingestion::{intake_buffer, BrokerPoller, MemoryBroker, PollerConfig, ReplayBroker};
use storage::{ConnectionPool, MemoryConnector, MemoryStore, PoolConfig, StorageWriter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PipelineStats, StoredCounts};

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
    memory_broker: Option<MemoryBroker>,
    memory_store: Option<MemoryStore>,
}

impl Pipeline {
    /// Create a new pipeline with a validated configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            memory_broker: None,
            memory_store: None,
        }
    }

    /// Feed a `memory` broker from the caller instead of an idle one
    #[cfg(test)]
    pub fn with_memory_broker(mut self, broker: MemoryBroker) -> Self {
        self.memory_broker = Some(broker);
        self
    }

    /// Write into a caller-owned `memory` store
    #[cfg(test)]
    pub fn with_memory_store(mut self, store: MemoryStore) -> Self {
        self.memory_store = Some(store);
        self
    }

    /// Token that starts the shutdown protocol when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline until it has stopped
    pub async fn run(mut self) -> Result<PipelineStats> {
        let started = Instant::now();

        match self.config.storage.kind {
            StorageKind::Memory => {
                let store = self.memory_store.take().unwrap_or_default();
                let pool = self.connect_pool(MemoryConnector::new(store.clone())).await?;
                let mut stats = self.run_with_storage(pool, started).await?;
                stats.stored = Some(StoredCounts {
                    websites: store.website_count(),
                    metrics: store.metric_count(),
                });
                Ok(stats)
            }
            StorageKind::Postgres => self.run_postgres(started).await,
        }
    }

    #[cfg(feature = "postgres")]
    async fn run_postgres(self, started: Instant) -> Result<PipelineStats> {
        let dsn = self
            .config
            .storage
            .dsn
            .clone()
            .context("postgres store requires a dsn")?;
        let pool = self.connect_pool(storage::PgConnector::new(dsn)).await?;
        self.run_with_storage(pool, started).await
    }

    #[cfg(not(feature = "postgres"))]
    async fn run_postgres(self, _started: Instant) -> Result<PipelineStats> {
        Err::<PipelineStats, _>(storage::StorageError::BackendDisabled("postgres".to_string()))
            .context("Rebuild with `--features postgres` to use the PostgreSQL store")
    }

    /// Open the pool and warm up `min_connections`
    async fn connect_pool<C: Connector>(&self, connector: C) -> Result<ConnectionPool<C>> {
        let name = connector.name().to_string();
        let pool = ConnectionPool::connect(connector, PoolConfig::from_storage(&self.config.storage))
            .await
            .with_context(|| format!("Failed to initialize the '{name}' connection pool"))?;

        info!(
            connector = %name,
            warm = pool.idle_count(),
            max = pool.max_connections(),
            "Connection pool ready"
        );
        Ok(pool)
    }

    async fn run_with_storage<C: Connector>(
        mut self,
        pool: ConnectionPool<C>,
        started: Instant,
    ) -> Result<PipelineStats> {
        let broker = self.config.broker.clone();
        match broker.kind {
            BrokerKind::Replay => {
                let path = match broker.path {
                    Some(path) => path,
                    None => {
                        pool.close_all().await;
                        anyhow::bail!("replay broker requires a path");
                    }
                };
                let source = ReplayBroker::new(path, broker.max_records)
                    .with_offset_reset(broker.auto_offset_reset);
                self.run_pipeline(source, pool, started).await
            }
            BrokerKind::Memory => {
                let source = match self.memory_broker.take() {
                    Some(source) => source,
                    None => {
                        warn!("memory broker has no publisher, waiting for a termination signal");
                        MemoryBroker::new(broker.client_id.clone(), broker.max_records)
                    }
                };
                self.run_pipeline(source, pool, started).await
            }
        }
    }

    async fn run_pipeline<S, C>(
        self,
        mut source: S,
        pool: ConnectionPool<C>,
        started: Instant,
    ) -> Result<PipelineStats>
    where
        S: MessageSource + Send + 'static,
        C: Connector,
    {
        let config = self.config;

        if let Err(e) = source.connect().await {
            pool.close_all().await;
            return Err(e).with_context(|| {
                format!("Failed to connect to broker topic '{}'", config.broker.topic)
            });
        }
        info!(
            topic = %config.broker.topic,
            group = %config.broker.consumer_group,
            client_id = %config.broker.client_id,
            "Broker connected"
        );

        let policy = config.shutdown.policy();
        let (producer, consumer) = intake_buffer(config.intake.capacity);

        let writer = Arc::new(StorageWriter::new(pool.clone()));
        let workers = WorkerPool::spawn(writer, WorkerPoolConfig::from_workers(&config.workers));

        let poller = BrokerPoller::new(
            source,
            producer,
            PollerConfig::from_pipeline(&config),
            self.cancel.clone(),
        )
        .spawn();

        let dispatcher = Dispatcher::new(consumer, workers, self.cancel.clone(), policy);
        info!(?policy, "Pipeline started");

        let dispatched = dispatcher.run().await;
        if dispatched.is_err() {
            // 调度失败时让 poller 退出，避免阻塞在 push 上
            self.cancel.cancel();
        }
        let polled = poller.join().await;

        let report = dispatched.context("Dispatcher failed")?;
        let poller_stats = polled.context("Broker poller failed")?;

        Ok(PipelineStats {
            duration: started.elapsed(),
            policy,
            poller: poller_stats,
            report,
            pool: pool.metrics().snapshot(),
            stored: None,
        })
    }
}
