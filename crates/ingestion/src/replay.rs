//! NDJSON replay broker
//!
//! Reads one payload per line from a file. Line numbers (starting at 0,
//! blank lines included) are the offsets of partition 0. The source is
//! finite: it reports exhaustion once the end of file has been reached.

use std::path::{Path, PathBuf};
use std::time::Duration;

use contracts::{ContractError, MessageOffset, MessageSource, OffsetReset, RawMessage};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

/// Replay broker over a newline-delimited JSON file
#[derive(Debug)]
pub struct ReplayBroker {
    name: String,
    path: PathBuf,
    max_records: usize,
    offset_reset: OffsetReset,
    lines: Option<Lines<BufReader<File>>>,
    /// Lines read by a poll that was dropped before returning them
    pending: Vec<RawMessage>,
    next_line: i64,
    eof: bool,
    committed_through: Option<MessageOffset>,
}

impl ReplayBroker {
    /// Create a replay broker; the file is opened by `connect`
    pub fn new(path: impl AsRef<Path>, max_records: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("replay:{}", path.display()),
            path,
            max_records: max_records.max(1),
            offset_reset: OffsetReset::Earliest,
            lines: None,
            pending: Vec::new(),
            next_line: 0,
            eof: false,
            committed_through: None,
        }
    }

    /// `Latest` skips everything already in the file
    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    /// Highest offset acknowledged so far
    pub fn committed_through(&self) -> Option<MessageOffset> {
        self.committed_through
    }
}

impl MessageSource for ReplayBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| ContractError::broker_connection(&self.name, e.to_string()))?;
        self.lines = Some(BufReader::new(file).lines());
        self.pending.clear();
        self.next_line = 0;
        self.eof = self.offset_reset == OffsetReset::Latest;
        info!(broker = %self.name, offset_reset = ?self.offset_reset, "replay broker opened");
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Vec<RawMessage>, ContractError> {
        if self.eof {
            return Ok(std::mem::take(&mut self.pending));
        }
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| ContractError::broker_poll(&self.name, "not connected"))?;

        // Read lines go to `self.pending` first so a dropped poll loses nothing.
        while self.pending.len() < self.max_records {
            let line = lines
                .next_line()
                .await
                .map_err(|e| ContractError::broker_poll(&self.name, e.to_string()))?;
            let Some(line) = line else {
                self.eof = true;
                debug!(broker = %self.name, lines = self.next_line, "replay reached end of file");
                break;
            };
            let offset = MessageOffset::new(0, self.next_line);
            self.next_line += 1;
            if line.trim().is_empty() {
                continue;
            }
            self.pending.push(RawMessage::new(offset, line));
        }
        Ok(std::mem::take(&mut self.pending))
    }

    async fn commit(&mut self, offsets: &[MessageOffset]) -> Result<(), ContractError> {
        if let Some(max) = offsets.iter().max().copied() {
            self.committed_through = Some(self.committed_through.map_or(max, |c| c.max(max)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.lines = None;
        debug!(broker = %self.name, committed_through = ?self.committed_through, "replay broker closed");
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn replay_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".ndjson").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_replay_reads_in_batches() {
        let file = replay_file(&["a", "", "b", "c"]);
        let mut broker = ReplayBroker::new(file.path(), 2);
        broker.connect().await.unwrap();

        let first = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].offset, MessageOffset::new(0, 2));
        assert!(!broker.is_exhausted());

        let second = broker.poll(Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(&second[0].payload[..], b"c");
        assert!(broker.is_exhausted());
        assert!(broker.poll(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_polls_lose_no_lines() {
        // Larger than the reader's buffer so some line reads suspend mid-batch
        let payload = "x".repeat(40);
        let lines: Vec<&str> = std::iter::repeat(payload.as_str()).take(2000).collect();
        let file = replay_file(&lines);
        let mut broker = ReplayBroker::new(file.path(), 500);
        broker.connect().await.unwrap();

        let mut offsets = Vec::new();
        for _ in 0..100_000 {
            if broker.is_exhausted() {
                break;
            }
            match tokio::time::timeout(Duration::ZERO, broker.poll(Duration::ZERO)).await {
                Ok(batch) => offsets.extend(batch.unwrap().into_iter().map(|m| m.offset.offset)),
                Err(_) => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }

        assert!(broker.is_exhausted());
        assert_eq!(offsets, (0..2000).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_missing_file_fails_connect() {
        let mut broker = ReplayBroker::new("/nonexistent/metrics.ndjson", 10);
        let err = broker.connect().await.unwrap_err();
        assert!(matches!(err, ContractError::BrokerConnection { .. }));
    }

    #[tokio::test]
    async fn test_latest_skips_existing_lines() {
        let file = replay_file(&["a", "b"]);
        let mut broker = ReplayBroker::new(file.path(), 10).with_offset_reset(OffsetReset::Latest);
        broker.connect().await.unwrap();
        assert!(broker.is_exhausted());
        assert!(broker.poll(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_tracks_highest_offset() {
        let file = replay_file(&["a"]);
        let mut broker = ReplayBroker::new(file.path(), 10);
        broker
            .commit(&[MessageOffset::new(0, 4), MessageOffset::new(0, 2)])
            .await
            .unwrap();
        broker.commit(&[MessageOffset::new(0, 3)]).await.unwrap();
        assert_eq!(broker.committed_through(), Some(MessageOffset::new(0, 4)));
    }
}
