//! # Integration Tests
//!
//! 跨 crate 的端到端测试。
//!
//! 负责：
//! - 完整管道：MemoryBroker → Poller → Intake → Dispatcher → Workers → StorageWriter → MemoryStore
//! - 去重、关闭策略 (drain / drop)、失败隔离、连接上限、OnPersist 确认

#[cfg(test)]
mod harness {
    use std::sync::Arc;

    use contracts::{MessageSource, PipelineConfig};
    use dispatcher::{DispatchReport, Dispatcher, DispatcherError, WorkerPool, WorkerPoolConfig};
    use ingestion::{
        intake_buffer, BrokerPoller, MemoryBroker, PollerConfig, PollerHandle,
        PollerMetricsSnapshot,
    };
    use storage::{
        ConnectionPool, MemoryConnector, MemoryStore, PoolConfig, PoolMetricsSnapshot,
        StorageWriter,
    };
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    /// Small pipeline sizes so that backpressure shows up quickly
    pub fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.broker.poll_timeout_ms = 20;
        config.broker.max_records = 50;
        config.intake.capacity = 8;
        config.workers.count = 4;
        config.workers.queue_capacity = 4;
        config.storage.min_connections = 1;
        config.storage.max_connections = 4;
        config
    }

    pub fn payload(url: &str, error_code: i32) -> String {
        format!(
            r#"{{"url":"{url}","regex_pattern":"ok","error_code":{error_code},"response_time":0.25,"matched_text":null}}"#
        )
    }

    pub struct Running {
        pub cancel: CancellationToken,
        poller: PollerHandle,
        dispatcher: JoinHandle<Result<DispatchReport, DispatcherError>>,
        pool: ConnectionPool<MemoryConnector>,
    }

    pub struct Finished {
        pub poller: PollerMetricsSnapshot,
        pub report: DispatchReport,
        pub pool: PoolMetricsSnapshot,
    }

    impl Running {
        pub fn pushed(&self) -> u64 {
            self.poller.metrics().snapshot().pushed
        }

        pub async fn join(self) -> Finished {
            let report = self.dispatcher.await.unwrap().unwrap();
            let poller = self.poller.join().await.unwrap();
            Finished {
                poller,
                report,
                pool: self.pool.metrics().snapshot(),
            }
        }
    }

    /// Wire every stage the way the binary does
    pub async fn start(config: &PipelineConfig, broker: &MemoryBroker, store: &MemoryStore) -> Running {
        let mut source = broker.clone();
        source.connect().await.unwrap();

        let pool = ConnectionPool::connect(
            MemoryConnector::new(store.clone()),
            PoolConfig::from_storage(&config.storage),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let (producer, consumer) = intake_buffer(config.intake.capacity);
        let writer = Arc::new(StorageWriter::new(pool.clone()));
        let workers = WorkerPool::spawn(writer, WorkerPoolConfig::from_workers(&config.workers));

        let poller = BrokerPoller::new(
            source,
            producer,
            PollerConfig::from_pipeline(config),
            cancel.clone(),
        )
        .spawn();
        let dispatcher =
            Dispatcher::new(consumer, workers, cancel.clone(), config.shutdown.policy()).spawn();

        Running {
            cancel,
            poller,
            dispatcher,
            pool,
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use contracts::{AckPolicy, MessageOffset};
    use ingestion::MemoryBroker;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use storage::MemoryStore;
    use tokio::time::timeout;

    use crate::harness::{payload, small_config, start};

    const DEADLINE: Duration = Duration::from_secs(10);

    async fn wait_until(mut done: impl FnMut() -> bool) {
        timeout(DEADLINE, async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// N metrics over a random url sequence: N rows, one website per distinct url
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_urls_are_deduplicated() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let urls: Vec<String> = (0..12).map(|i| format!("https://site{i}.example")).collect();

        let broker = MemoryBroker::new("e2e", 32);
        let store = MemoryStore::new();
        let mut expected: HashMap<String, usize> = HashMap::new();
        for _ in 0..300 {
            let url = &urls[rng.random_range(0..urls.len())];
            *expected.entry(url.clone()).or_default() += 1;
            broker.publish(payload(url, 200));
        }
        broker.finish();

        let running = start(&small_config(), &broker, &store).await;
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(finished.report.persisted, 300);
        assert_eq!(finished.report.failed, 0);
        assert_eq!(store.metric_count(), 300);
        assert_eq!(store.website_count(), expected.len());

        let mut per_website: HashMap<contracts::WebsiteId, usize> = HashMap::new();
        for metric in store.metrics() {
            *per_website.entry(metric.website_id).or_default() += 1;
        }
        for (url, count) in &expected {
            let website = store.website_by_url(url).unwrap();
            assert_eq!(per_website[&website.id], *count, "metrics of {url}");
        }
    }

    /// A, B, A → two websites, three metrics, A's metrics share one website
    #[tokio::test]
    async fn test_repeated_url_reuses_website() {
        let broker = MemoryBroker::new("e2e", 10);
        let store = MemoryStore::new();
        broker.publish(payload("https://a.example", 200));
        broker.publish(payload("https://b.example", 404));
        broker.publish(payload("https://a.example", 599));
        broker.finish();

        let running = start(&small_config(), &broker, &store).await;
        timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(store.website_count(), 2);
        assert_eq!(store.metric_count(), 3);
        let a = store.website_by_url("https://a.example").unwrap();
        let mut codes: Vec<i32> = store
            .metrics()
            .into_iter()
            .filter(|m| m.website_id == a.id)
            .map(|m| m.error_code)
            .collect();
        codes.sort_unstable();
        assert_eq!(codes, vec![200, 599]);
    }

    /// Drain: everything that reached the intake buffer is persisted
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drain_shutdown_persists_everything_pushed() {
        let broker = MemoryBroker::new("e2e", 50);
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(10));
        for i in 0..40 {
            broker.publish(payload(&format!("https://drain{}.example", i % 5), 200));
        }

        let mut config = small_config();
        config.workers.count = 2;
        config.workers.queue_capacity = 2;
        let running = start(&config, &broker, &store).await;

        wait_until(|| store.metric_count() >= 3).await;
        running.cancel.cancel();
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(finished.report.discarded, 0);
        assert_eq!(finished.poller.discarded, 0);
        assert_eq!(finished.poller.pushed, finished.poller.fetched);
        assert_eq!(finished.report.persisted, finished.poller.pushed);
        assert_eq!(store.metric_count() as u64, finished.poller.pushed);
    }

    /// Drop-on-abort: buffered metrics are discarded, nothing is lost silently
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drop_shutdown_discards_and_accounts_for_everything() {
        let broker = MemoryBroker::new("e2e", 30);
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(40));
        for i in 0..30 {
            broker.publish(payload(&format!("https://drop{i}.example"), 200));
        }

        let mut config = small_config();
        config.intake.capacity = 5;
        config.workers.count = 1;
        config.workers.queue_capacity = 1;
        config.shutdown.drop_on_abort = true;
        let running = start(&config, &broker, &store).await;

        wait_until(|| store.metric_count() >= 1).await;
        running.cancel.cancel();
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        let persisted = finished.report.persisted;
        assert!(persisted < 30, "drop mode should not persist the whole backlog");
        assert!(finished.report.discarded + finished.poller.discarded > 0);
        assert_eq!(
            persisted
                + finished.report.failed
                + finished.report.discarded
                + finished.poller.discarded,
            finished.poller.fetched
        );
        assert_eq!(store.metric_count() as u64, persisted);
    }

    /// One failing write does not affect the others; the broken connection is replaced
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failing_writes_are_isolated() {
        let broker = MemoryBroker::new("e2e", 10);
        let store = MemoryStore::new();
        store.fail_url("https://bad.example");
        for i in 0..12 {
            let url = if i % 4 == 0 {
                "https://bad.example".to_string()
            } else {
                format!("https://good{i}.example")
            };
            broker.publish(payload(&url, 200));
        }
        broker.finish();

        let running = start(&small_config(), &broker, &store).await;
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(finished.report.failed, 3);
        assert_eq!(finished.report.persisted, 9);
        assert_eq!(store.metric_count(), 9);
        assert!(store.website_by_url("https://bad.example").is_none());
        assert!(finished.pool.discarded >= 3);
        assert_eq!(store.open_connections(), 0);
    }

    /// Open connections never exceed `max_connections`, even with more workers
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connections_stay_within_bound() {
        let broker = MemoryBroker::new("e2e", 20);
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(5));
        for i in 0..60 {
            broker.publish(payload(&format!("https://bound{}.example", i % 7), 200));
        }
        broker.finish();

        let mut config = small_config();
        config.workers.count = 8;
        config.storage.max_connections = 3;
        let running = start(&config, &broker, &store).await;
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(finished.report.persisted, 60);
        assert!(store.max_open_connections() <= 3);
        assert_eq!(finished.pool.timeouts, 0);
    }

    /// OnPersist: commits cover persisted (or undecodable) messages up to the
    /// first one that failed to persist
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_on_persist_commits_after_storage() {
        let broker = MemoryBroker::new("e2e", 10);
        let store = MemoryStore::new();
        store.fail_url("https://bad.example");

        let ok_a = broker.publish(payload("https://a.example", 200));
        let garbage = broker.publish("{not json");
        let bad = broker.publish(payload("https://bad.example", 200));
        let ok_b = broker.publish(payload("https://b.example", 200));
        broker.finish();

        let mut config = small_config();
        config.broker.ack_policy = AckPolicy::OnPersist;
        let running = start(&config, &broker, &store).await;
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        let mut committed: Vec<MessageOffset> = broker.committed();
        committed.sort_by_key(|o| o.offset);

        assert_eq!(committed, vec![ok_a, garbage]);
        assert!(!committed.contains(&bad));
        // Persisted, but behind the failed offset
        assert!(!committed.contains(&ok_b));
        assert_eq!(finished.poller.decode_errors, 1);
        assert_eq!(finished.report.persisted, 2);
        assert_eq!(store.metric_count(), 2);
    }

    /// OnFetch: every fetched batch is committed regardless of persistence
    #[tokio::test]
    async fn test_on_fetch_commits_everything_fetched() {
        let broker = MemoryBroker::new("e2e", 10);
        let store = MemoryStore::new();
        store.fail_url("https://bad.example");
        broker.publish(payload("https://a.example", 200));
        broker.publish(payload("https://bad.example", 200));
        broker.finish();

        let running = start(&small_config(), &broker, &store).await;
        let finished = timeout(DEADLINE, running.join()).await.unwrap();

        assert_eq!(broker.committed().len(), 2);
        assert_eq!(finished.poller.committed, 2);
        assert_eq!(finished.report.failed, 1);
    }
}
