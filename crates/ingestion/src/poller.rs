//! Broker Poller
//!
//! Dedicated task: poll the broker, decode each message and push it onto
//! the Intake Buffer. Push waits for buffer space, so a slow dispatcher
//! stops further fetches.
//!
//! Cancellation is observed before each poll and, under drop-on-abort,
//! before each push. Without drop-on-abort the batch in hand is pushed in
//! full. The producer is dropped on exit so the dispatcher can tell when
//! the buffer will receive nothing more.

use std::ops::ControlFlow;
use std::sync::Arc;

use contracts::{AckPolicy, MessageOffset, MessageSource, RawMessage};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::buffer::IntakeProducer;
use crate::codec::decode;
use crate::config::{PollerConfig, PollerMetrics, PollerMetricsSnapshot};
use crate::envelope::{AckTracker, Envelope};
use crate::error::{IngestionError, Result};

/// Broker Poller
pub struct BrokerPoller<S> {
    source: S,
    producer: IntakeProducer<Envelope>,
    config: PollerConfig,
    cancel: CancellationToken,
    metrics: Arc<PollerMetrics>,
    acks: AckTracker,
}

impl<S> BrokerPoller<S>
where
    S: MessageSource + Send + 'static,
{
    /// Create a poller over an already connected source
    pub fn new(
        source: S,
        producer: IntakeProducer<Envelope>,
        config: PollerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            producer,
            config,
            cancel,
            metrics: Arc::new(PollerMetrics::new()),
            acks: AckTracker::new(),
        }
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<PollerMetrics> {
        self.metrics.clone()
    }

    /// Spawn the poller as a background task
    pub fn spawn(self) -> PollerHandle {
        let metrics = self.metrics.clone();
        let handle = tokio::spawn(self.run());
        PollerHandle { handle, metrics }
    }

    /// Run until cancelled, the source is exhausted or the buffer is closed
    ///
    /// Under `AckPolicy::OnPersist` this returns only after every issued
    /// receipt has been redeemed or dropped.
    #[instrument(name = "broker_poller_run", skip(self))]
    pub async fn run(mut self) -> Result<PollerMetricsSnapshot> {
        info!(
            source = %self.source.name(),
            ack_policy = ?self.config.ack_policy,
            "broker poller started"
        );

        loop {
            if self.cancel.is_cancelled() {
                debug!("cancellation observed, no further fetches");
                break;
            }
            if self.source.is_exhausted() {
                info!("source exhausted");
                break;
            }
            self.commit_ready_acks().await;

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                polled = self.source.poll(self.config.poll_timeout) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.record_poll_error();
                    warn!(error = %e, "poll failed");
                    self.back_off().await;
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            self.metrics.record_fetched(batch.len());
            metrics::counter!("metrics_consumer_messages_fetched_total")
                .increment(batch.len() as u64);

            if self.config.ack_policy == AckPolicy::OnFetch {
                let offsets: Vec<MessageOffset> = batch.iter().map(|m| m.offset).collect();
                self.commit(&offsets).await;
            }

            if self.push_batch(batch).await.is_break() {
                break;
            }
        }

        let Self {
            mut source,
            producer,
            metrics,
            mut acks,
            ..
        } = self;

        // Closes the buffer once the dispatcher has popped everything.
        drop(producer);

        acks.seal();
        if acks.outstanding() > 0 {
            debug!(outstanding = acks.outstanding(), "waiting for persist acknowledgments");
        }
        let pending = acks.settle().await;
        commit_offsets(&mut source, &metrics, &pending).await;
        if acks.outstanding() > 0 {
            warn!(
                unacknowledged = acks.outstanding(),
                "messages not persisted; commit position held below the first of them"
            );
        }

        if let Err(e) = source.close().await {
            warn!(error = %e, "source close failed");
        }

        let snapshot = metrics.snapshot();
        info!(
            fetched = snapshot.fetched,
            pushed = snapshot.pushed,
            decode_errors = snapshot.decode_errors,
            discarded = snapshot.discarded,
            committed = snapshot.committed,
            "broker poller stopped"
        );
        Ok(snapshot)
    }

    /// Decode and push one fetched batch
    async fn push_batch(&mut self, batch: Vec<RawMessage>) -> ControlFlow<()> {
        let drop_on_abort = self.config.shutdown_policy.drops_on_abort();
        let total = batch.len();

        for (idx, raw) in batch.into_iter().enumerate() {
            let record = match decode(&raw) {
                Ok(record) => record,
                Err(e) => {
                    self.metrics.record_decode_error();
                    metrics::counter!("metrics_consumer_decode_errors_total").increment(1);
                    warn!(offset = %raw.offset, error = %e, "skipping malformed message");
                    // Never persistable; acknowledge so it is not redelivered.
                    if self.config.ack_policy == AckPolicy::OnPersist {
                        self.acks.skip(raw.offset);
                    }
                    continue;
                }
            };

            let envelope = match self.config.ack_policy {
                AckPolicy::OnFetch => Some(Envelope::new(record, raw.offset)),
                AckPolicy::OnPersist => self
                    .acks
                    .receipt(raw.offset)
                    .map(|receipt| Envelope::with_receipt(record, receipt)),
            };
            let Some(envelope) = envelope else {
                return ControlFlow::Break(());
            };

            let pushed = if drop_on_abort {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.abandon(total - idx);
                        return ControlFlow::Break(());
                    }
                    pushed = self.producer.push(envelope) => pushed,
                }
            } else {
                self.producer.push(envelope).await
            };

            match pushed {
                Ok(()) => {
                    self.metrics.record_pushed();
                    metrics::counter!("metrics_consumer_messages_decoded_total").increment(1);
                }
                Err(IngestionError::BufferClosed) => {
                    self.abandon(total - idx);
                    return ControlFlow::Break(());
                }
                Err(e) => {
                    warn!(error = %e, "push failed");
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn abandon(&self, count: usize) {
        self.metrics.record_discarded(count);
        metrics::counter!("metrics_consumer_messages_discarded_total").increment(count as u64);
        info!(count, "abandoning in-hand messages on shutdown");
    }

    /// Forward acknowledgments redeemed since the last poll
    async fn commit_ready_acks(&mut self) {
        if self.config.ack_policy != AckPolicy::OnPersist {
            return;
        }
        let ready = self.acks.ready();
        self.commit(&ready).await;
    }

    async fn commit(&mut self, offsets: &[MessageOffset]) {
        commit_offsets(&mut self.source, &self.metrics, offsets).await;
    }

    /// Wait one poll interval (or until cancelled) after a failed poll
    async fn back_off(&mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_timeout) => {}
        }
    }
}

async fn commit_offsets<S: MessageSource>(
    source: &mut S,
    metrics: &PollerMetrics,
    offsets: &[MessageOffset],
) {
    if offsets.is_empty() {
        return;
    }
    match source.commit(offsets).await {
        Ok(()) => metrics.record_committed(offsets.len()),
        Err(e) => {
            metrics.record_commit_error();
            warn!(count = offsets.len(), error = %e, "offset commit failed");
        }
    }
}

/// Handle to a running poller task
pub struct PollerHandle {
    handle: JoinHandle<Result<PollerMetricsSnapshot>>,
    metrics: Arc<PollerMetrics>,
}

impl PollerHandle {
    /// Get live metrics
    pub fn metrics(&self) -> &Arc<PollerMetrics> {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the poller to exit
    pub async fn join(self) -> Result<PollerMetricsSnapshot> {
        self.handle
            .await
            .map_err(|e| IngestionError::task_failed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::intake_buffer;
    use crate::codec::encode;
    use crate::mock::MemoryBroker;
    use crate::replay::ReplayBroker;
    use contracts::{ContractError, MetricRecord, ShutdownPolicy};
    use std::io::Write;
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(url: &str) -> MetricRecord {
        MetricRecord::new(url, "", 200, 0.1, None)
    }

    async fn connected_broker() -> MemoryBroker {
        let mut broker = MemoryBroker::new("mem", 10);
        broker.connect().await.unwrap();
        broker
    }

    fn config(ack_policy: AckPolicy, shutdown_policy: ShutdownPolicy) -> PollerConfig {
        PollerConfig {
            poll_timeout: Duration::from_millis(10),
            ack_policy,
            shutdown_policy,
        }
    }

    #[tokio::test]
    async fn test_pushes_decoded_messages_in_order() {
        let broker = connected_broker().await;
        for url in ["https://a.test", "https://b.test", "https://c.test"] {
            broker.publish_record(&record(url)).unwrap();
        }
        broker.finish();

        let (producer, consumer) = intake_buffer(10);
        let poller = BrokerPoller::new(
            broker.clone(),
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::Drain),
            CancellationToken::new(),
        )
        .spawn();

        let mut urls = Vec::new();
        while let Some(envelope) = consumer.pop().await {
            assert!(!envelope.needs_ack());
            urls.push(envelope.record.url);
        }
        assert_eq!(urls, ["https://a.test", "https://b.test", "https://c.test"]);

        let stats = poller.join().await.unwrap();
        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.pushed, 3);
        assert_eq!(broker.committed().len(), 3);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_message_skipped() {
        let broker = connected_broker().await;
        broker.publish_record(&record("https://a.test")).unwrap();
        broker.publish("{\"url\": 42}");
        broker.publish_record(&record("https://b.test")).unwrap();
        broker.finish();

        let (producer, consumer) = intake_buffer(10);
        let stats = BrokerPoller::new(
            broker,
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::Drain),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.pushed, 2);
        assert_eq!(consumer.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_poll_failure_is_not_fatal() {
        let broker = connected_broker().await;
        broker.fail_next_polls(2);
        broker.publish_record(&record("https://a.test")).unwrap();
        broker.finish();

        let (producer, consumer) = intake_buffer(10);
        let stats = BrokerPoller::new(
            broker,
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::Drain),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.poll_errors, 2);
        assert_eq!(consumer.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_fetching() {
        let broker = connected_broker().await;
        let (producer, _consumer) = intake_buffer(10);
        let cancel = CancellationToken::new();
        let poller = BrokerPoller::new(
            broker.clone(),
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::Drain),
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        timeout(Duration::from_secs(1), poller.join())
            .await
            .expect("poller did not stop")
            .unwrap();

        let polls = broker.poll_count();
        broker.publish_record(&record("https://late.test")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.poll_count(), polls);
        assert_eq!(broker.pending(), 1);
    }

    #[tokio::test]
    async fn test_drain_mode_pushes_batch_in_hand() {
        let broker = connected_broker().await;
        for i in 0..5 {
            broker.publish_record(&record(&format!("https://{i}.test"))).unwrap();
        }
        let (producer, consumer) = intake_buffer(2);
        let cancel = CancellationToken::new();
        let poller = BrokerPoller::new(
            broker,
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::Drain),
            cancel.clone(),
        )
        .spawn();

        // Poller is now blocked on the full buffer with 3 messages in hand
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let mut received = 0;
        while consumer.pop().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);
        let stats = poller.join().await.unwrap();
        assert_eq!(stats.discarded, 0);
    }

    #[tokio::test]
    async fn test_drop_mode_abandons_batch_in_hand() {
        let broker = connected_broker().await;
        for i in 0..5 {
            broker.publish_record(&record(&format!("https://{i}.test"))).unwrap();
        }
        let (producer, consumer) = intake_buffer(2);
        let cancel = CancellationToken::new();
        let poller = BrokerPoller::new(
            broker,
            producer,
            config(AckPolicy::OnFetch, ShutdownPolicy::DropOnAbort),
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let stats = timeout(Duration::from_secs(1), poller.join())
            .await
            .expect("poller blocked despite drop-on-abort")
            .unwrap();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.discarded, 3);
        assert_eq!(consumer.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_on_persist_commit_stops_at_unacknowledged() {
        let broker = connected_broker().await;
        for i in 0..3 {
            broker.publish_record(&record(&format!("https://{i}.test"))).unwrap();
        }
        broker.publish("{not json");
        broker.finish();

        let (producer, consumer) = intake_buffer(10);
        let poller = BrokerPoller::new(
            broker.clone(),
            producer,
            config(AckPolicy::OnPersist, ShutdownPolicy::Drain),
            CancellationToken::new(),
        )
        .spawn();

        while let Some(envelope) = consumer.pop().await {
            let offset = envelope.offset;
            let (_, receipt) = envelope.into_parts();
            let receipt = receipt.unwrap();
            // The second message failed to persist
            if offset.offset == 1 {
                drop(receipt);
            } else {
                receipt.ack();
            }
        }

        let stats = poller.join().await.unwrap();
        assert_eq!(stats.committed, 1);
        assert_eq!(broker.committed(), vec![MessageOffset::new(0, 0)]);
    }

    /// Replay source that publishes its commit watermark to the test
    struct WatermarkSource {
        inner: ReplayBroker,
        watermark: Arc<std::sync::Mutex<Option<MessageOffset>>>,
    }

    impl MessageSource for WatermarkSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn connect(&mut self) -> std::result::Result<(), ContractError> {
            self.inner.connect().await
        }

        async fn poll(
            &mut self,
            timeout: Duration,
        ) -> std::result::Result<Vec<RawMessage>, ContractError> {
            self.inner.poll(timeout).await
        }

        async fn commit(
            &mut self,
            offsets: &[MessageOffset],
        ) -> std::result::Result<(), ContractError> {
            self.inner.commit(offsets).await?;
            *self.watermark.lock().unwrap() = self.inner.committed_through();
            Ok(())
        }

        async fn close(&mut self) -> std::result::Result<(), ContractError> {
            self.inner.close().await
        }

        fn is_exhausted(&self) -> bool {
            self.inner.is_exhausted()
        }
    }

    #[tokio::test]
    async fn test_on_persist_watermark_never_passes_failed_offset() {
        let mut file = tempfile::Builder::new().suffix(".ndjson").tempfile().unwrap();
        for i in 0..3 {
            let line = encode(&record(&format!("https://{i}.test"))).unwrap();
            writeln!(file, "{}", std::str::from_utf8(&line).unwrap()).unwrap();
        }

        let watermark = Arc::new(std::sync::Mutex::new(None));
        let mut source = WatermarkSource {
            inner: ReplayBroker::new(file.path(), 10),
            watermark: watermark.clone(),
        };
        source.connect().await.unwrap();

        let (producer, consumer) = intake_buffer(10);
        let poller = BrokerPoller::new(
            source,
            producer,
            config(AckPolicy::OnPersist, ShutdownPolicy::Drain),
            CancellationToken::new(),
        )
        .spawn();

        // Acknowledge offsets 0 and 2; offset 1 is lost
        while let Some(envelope) = consumer.pop().await {
            let offset = envelope.offset;
            let receipt = envelope.into_parts().1.unwrap();
            if offset.offset != 1 {
                receipt.ack();
            }
        }

        poller.join().await.unwrap();
        assert_eq!(*watermark.lock().unwrap(), Some(MessageOffset::new(0, 0)));
    }
}
