//! Storage Writer
//!
//! Persists one metric per call: acquire a connection, resolve the website
//! id inside a transaction, insert the metric row, commit. The connection
//! is scoped to the call and returned to the pool on every exit path.
//!
//! Website resolution is insert-if-absent followed by a re-select on
//! conflict, so concurrent first sightings of a url create one row.
//! There is no retry: a failed call loses the metric for this attempt.

use std::time::Instant;

use contracts::{
    Connector, ContractError, MetricRecord, MetricStore, PersistOutcome, StorageConnection,
    WebsiteId,
};
use tracing::{debug, instrument, warn};

use crate::pool::ConnectionPool;

/// Storage Writer over a connection pool
pub struct StorageWriter<C: Connector> {
    pool: ConnectionPool<C>,
}

impl<C: Connector> StorageWriter<C> {
    pub fn new(pool: ConnectionPool<C>) -> Self {
        Self { pool }
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }
}

impl<C: Connector> MetricStore for StorageWriter<C> {
    fn name(&self) -> &str {
        self.pool.connector_name()
    }

    #[instrument(name = "storage_writer_persist", skip(self, record), fields(url = %record.url))]
    async fn persist(&self, record: &MetricRecord) -> Result<PersistOutcome, ContractError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;
        // Until the transaction has ended, a dropped call (panic, abort)
        // must not hand the connection back with an open transaction.
        conn.discard();

        match write_metric(&mut *conn, record).await {
            Ok(outcome) => {
                conn.keep();
                metrics::histogram!("metrics_consumer_persist_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                debug!(
                    website_id = outcome.website_id,
                    metric_id = outcome.metric_id,
                    website_created = outcome.website_created,
                    "metric persisted"
                );
                Ok(outcome)
            }
            Err(e) => {
                if !e.is_connection_error() {
                    match conn.rollback().await {
                        Ok(()) => conn.keep(),
                        Err(rollback) => warn!(error = %rollback, "rollback failed"),
                    }
                }
                Err(e)
            }
        }
    }

    async fn close(&self) {
        self.pool.close_all().await;
    }
}

async fn write_metric<S: StorageConnection>(
    conn: &mut S,
    record: &MetricRecord,
) -> Result<PersistOutcome, ContractError> {
    conn.begin().await?;
    let (website_id, website_created) = resolve_website(conn, &record.url, &record.regexp).await?;
    let metric_id = conn.insert_metric(website_id, record).await?;
    conn.commit().await?;

    Ok(PersistOutcome {
        website_id,
        metric_id,
        website_created,
    })
}

/// Insert the website unless present, else fetch the existing id
async fn resolve_website<S: StorageConnection>(
    conn: &mut S,
    url: &str,
    regexp: &str,
) -> Result<(WebsiteId, bool), ContractError> {
    if let Some(id) = conn.insert_website_if_absent(url, regexp).await? {
        return Ok((id, true));
    }
    match conn.find_website(url).await? {
        Some(id) => Ok((id, false)),
        None => Err(ContractError::storage_query(format!(
            "website '{url}' conflicted on insert but is not visible"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryStore};
    use crate::pool::PoolConfig;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn writer(store: &MemoryStore, max_connections: usize) -> StorageWriter<MemoryConnector> {
        let config = PoolConfig {
            min_connections: 0,
            max_connections,
            acquire_timeout: Duration::from_millis(500),
        };
        StorageWriter::new(ConnectionPool::new(MemoryConnector::new(store.clone()), config))
    }

    fn record(url: &str) -> MetricRecord {
        MetricRecord::new(url, "Ex.*", 200, 0.2, None)
    }

    #[tokio::test]
    async fn test_a_b_a_scenario() {
        let store = MemoryStore::new();
        let writer = writer(&store, 2);

        let a1 = writer.persist(&record("https://a.test")).await.unwrap();
        let b = writer.persist(&record("https://b.test")).await.unwrap();
        let a2 = writer.persist(&record("https://a.test")).await.unwrap();

        assert!(a1.website_created);
        assert!(b.website_created);
        assert!(!a2.website_created);
        assert_eq!(a1.website_id, a2.website_id);
        assert_ne!(a1.website_id, b.website_id);
        assert_eq!(store.website_count(), 2);
        assert_eq!(store.metric_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_first_sighting_creates_one_website() {
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(5));
        let writer = Arc::new(writer(&store, 8));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let writer = writer.clone();
                tokio::spawn(async move { writer.persist(&record("https://same.test")).await })
            })
            .collect();

        let mut website_ids = HashSet::new();
        let mut created = 0;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            website_ids.insert(outcome.website_id);
            created += usize::from(outcome.website_created);
        }

        assert_eq!(website_ids.len(), 1);
        assert_eq!(created, 1);
        assert_eq!(store.website_count(), 1);
        assert_eq!(store.metric_count(), 16);
    }

    #[tokio::test]
    async fn test_connection_error_discards_connection() {
        let store = MemoryStore::new();
        store.fail_url("https://bad.test");
        let writer = writer(&store, 1);

        let err = writer.persist(&record("https://bad.test")).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(store.website_count(), 0);
        assert_eq!(writer.pool().metrics().snapshot().discarded, 1);

        // The pool heals: the next metric gets a fresh connection
        writer.persist(&record("https://good.test")).await.unwrap();
        assert_eq!(store.metric_count(), 1);
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_write_discards_connection() {
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(200));
        let writer = writer(&store, 1);

        // Dropped while the transaction is open
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), writer.persist(&record("https://a.test")))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(writer.pool().idle_count(), 0);
        assert_eq!(writer.pool().metrics().snapshot().discarded, 1);
        assert_eq!(store.open_connections(), 0);

        store.set_write_delay(Duration::ZERO);
        writer.persist(&record("https://a.test")).await.unwrap();
        assert_eq!(store.website_count(), 1);
        assert_eq!(store.metric_count(), 1);
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_kept_connection_returns_to_idle() {
        let store = MemoryStore::new();
        let writer = writer(&store, 1);
        writer.persist(&record("https://a.test")).await.unwrap();

        let mut conn = writer.pool().acquire().await.unwrap();
        conn.begin().await.unwrap();
        conn.keep();
        drop(conn);
        assert_eq!(writer.pool().idle_count(), 1);
        assert_eq!(store.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_fails_the_call() {
        let store = MemoryStore::new();
        let writer = writer(&store, 1);
        let _held = writer.pool().acquire().await.unwrap();

        let err = writer.persist(&record("https://a.test")).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(store.metric_count(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_connections() {
        let store = MemoryStore::new();
        let writer = writer(&store, 2);
        writer.persist(&record("https://a.test")).await.unwrap();

        writer.close().await;
        writer.close().await;
        assert_eq!(store.open_connections(), 0);
        assert!(matches!(
            writer.persist(&record("https://a.test")).await,
            Err(ContractError::PoolClosed)
        ));
    }
}
