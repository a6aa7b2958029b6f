//! 内存 Broker
//!
//! 用于无真实 broker 环境的测试与演示。可编程发布消息、注入故障，
//! 并记录提交的 offset。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use contracts::{ContractError, MessageOffset, MessageSource, MetricRecord, RawMessage};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::codec::encode;

#[derive(Debug, Default)]
struct BrokerState {
    queue: VecDeque<RawMessage>,
    next_offset: i64,
    committed: Vec<MessageOffset>,
    end_of_stream: bool,
    connected: bool,
    closed: bool,
    fail_connect: bool,
    poll_failures: usize,
    polls: u64,
}

/// 内存 Broker
///
/// 可克隆的句柄：poller 持有一份，测试持有另一份用于发布和检查。
/// 所有消息位于 partition 0。
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    name: String,
    max_records: usize,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    /// 创建新的内存 Broker
    pub fn new(name: impl Into<String>, max_records: usize) -> Self {
        Self {
            name: name.into(),
            max_records: max_records.max(1),
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 发布一条原始消息，返回其 offset
    pub fn publish(&self, payload: impl Into<Bytes>) -> MessageOffset {
        let offset = {
            let mut state = self.state();
            let offset = MessageOffset::new(0, state.next_offset);
            state.next_offset += 1;
            state.queue.push_back(RawMessage::new(offset, payload));
            offset
        };
        self.notify.notify_one();
        offset
    }

    /// 以线上格式发布一条指标
    pub fn publish_record(&self, record: &MetricRecord) -> Result<MessageOffset, ContractError> {
        Ok(self.publish(encode(record)?))
    }

    /// 标记流结束：队列清空后 `is_exhausted` 返回 true
    pub fn finish(&self) {
        self.state().end_of_stream = true;
        self.notify.notify_one();
    }

    /// 下一次 `connect` 失败
    pub fn fail_connect(&self) {
        self.state().fail_connect = true;
    }

    /// 接下来 `n` 次 `poll` 失败
    pub fn fail_next_polls(&self, n: usize) {
        self.state().poll_failures = n;
    }

    /// 已提交的 offset（按提交顺序）
    pub fn committed(&self) -> Vec<MessageOffset> {
        self.state().committed.clone()
    }

    /// 尚未被拉取的消息数
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// `poll` 调用次数
    pub fn poll_count(&self) -> u64 {
        self.state().polls
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// 尝试取出一批消息；流结束或有数据时返回 Some
    fn take_batch(&self) -> Option<Vec<RawMessage>> {
        let mut state = self.state();
        if state.queue.is_empty() {
            return state.end_of_stream.then(Vec::new);
        }
        let n = state.queue.len().min(self.max_records);
        Some(state.queue.drain(..n).collect())
    }
}

impl MessageSource for MemoryBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_connect) {
            return Err(ContractError::broker_connection(
                &self.name,
                "connection refused",
            ));
        }
        state.connected = true;
        debug!(broker = %self.name, "memory broker connected");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawMessage>, ContractError> {
        {
            let mut state = self.state();
            state.polls += 1;
            if !state.connected {
                return Err(ContractError::broker_poll(&self.name, "not connected"));
            }
            if state.poll_failures > 0 {
                state.poll_failures -= 1;
                return Err(ContractError::broker_poll(&self.name, "injected poll failure"));
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(batch) = self.take_batch() {
                trace!(broker = %self.name, count = batch.len(), "memory broker batch");
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, offsets: &[MessageOffset]) -> Result<(), ContractError> {
        self.state().committed.extend_from_slice(offsets);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        let mut state = self.state();
        state.connected = false;
        state.closed = true;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        let state = self.state();
        state.end_of_stream && state.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_respect_max_records() {
        let mut broker = MemoryBroker::new("mem", 2);
        broker.connect().await.unwrap();
        for i in 0..5 {
            broker.publish(format!("m{i}"));
        }

        let batch = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, MessageOffset::new(0, 0));
        assert_eq!(broker.pending(), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let mut broker = MemoryBroker::new("mem", 10);
        broker.connect().await.unwrap();
        let batch = broker.poll(Duration::from_millis(10)).await.unwrap();
        assert!(batch.is_empty());
        assert!(!broker.is_exhausted());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let mut broker = MemoryBroker::new("mem", 10);
        broker.connect().await.unwrap();
        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("late");
        });

        let batch = broker.poll(Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_and_exhaustion() {
        let mut broker = MemoryBroker::new("mem", 10);
        broker.fail_connect();
        assert!(broker.connect().await.is_err());
        broker.connect().await.unwrap();

        broker.fail_next_polls(1);
        assert!(broker.poll(Duration::ZERO).await.is_err());

        broker.publish("x");
        broker.finish();
        assert!(!broker.is_exhausted());
        assert_eq!(broker.poll(Duration::ZERO).await.unwrap().len(), 1);
        assert!(broker.is_exhausted());

        broker.commit(&[MessageOffset::new(0, 0)]).await.unwrap();
        assert_eq!(broker.committed(), vec![MessageOffset::new(0, 0)]);
        broker.close().await.unwrap();
        assert!(broker.is_closed());
    }
}
