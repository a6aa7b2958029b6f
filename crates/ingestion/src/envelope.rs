//! In-flight message and acknowledgment receipts
//!
//! An `Envelope` is the unit owned by exactly one stage at a time. Under
//! `AckPolicy::OnPersist` it carries an `AckReceipt`; the worker that
//! persisted the record redeems it, and the poller commits the offset.
//! Dropping a receipt without redeeming it leaves the offset uncommitted.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{MessageOffset, MetricRecord};
use tokio::sync::mpsc;

/// Decoded metric plus its broker position
#[derive(Debug)]
pub struct Envelope {
    pub record: MetricRecord,
    pub offset: MessageOffset,
    receipt: Option<AckReceipt>,
}

impl Envelope {
    /// Envelope whose offset was already acknowledged on fetch
    pub fn new(record: MetricRecord, offset: MessageOffset) -> Self {
        Self {
            record,
            offset,
            receipt: None,
        }
    }

    /// Envelope that must be acknowledged after persistence
    pub fn with_receipt(record: MetricRecord, receipt: AckReceipt) -> Self {
        Self {
            record,
            offset: receipt.offset,
            receipt: Some(receipt),
        }
    }

    pub fn needs_ack(&self) -> bool {
        self.receipt.is_some()
    }

    /// Split into the record and its receipt (if any)
    pub fn into_parts(self) -> (MetricRecord, Option<AckReceipt>) {
        (self.record, self.receipt)
    }
}

/// Promise to acknowledge one offset
#[derive(Debug)]
pub struct AckReceipt {
    offset: MessageOffset,
    tx: mpsc::UnboundedSender<MessageOffset>,
}

impl AckReceipt {
    /// Report the message as durably persisted
    pub fn ack(self) {
        // The poller may already be gone; the offset then stays uncommitted.
        let _ = self.tx.send(self.offset);
    }
}

/// Poller-side collector of redeemed receipts
///
/// Offsets are released per partition as a contiguous prefix: an offset is
/// handed back for commit only once every lower offset issued on the same
/// partition was redeemed or skipped. A dropped receipt therefore holds the
/// partition's commit position below it for the rest of the run, so a
/// watermark-based source never marks the lost message as consumed.
#[derive(Debug)]
pub(crate) struct AckTracker {
    tx: Option<mpsc::UnboundedSender<MessageOffset>>,
    rx: mpsc::UnboundedReceiver<MessageOffset>,
    partitions: BTreeMap<i32, PartitionAcks>,
}

#[derive(Debug, Default)]
struct PartitionAcks {
    /// Issued, not redeemed yet
    unacked: BTreeSet<i64>,
    /// Redeemed, waiting behind a lower unacked offset
    held: BTreeSet<i64>,
}

impl PartitionAcks {
    fn release(&mut self, partition: i32, out: &mut Vec<MessageOffset>) {
        let released = match self.unacked.first().copied() {
            Some(floor) => {
                let rest = self.held.split_off(&floor);
                std::mem::replace(&mut self.held, rest)
            }
            None => std::mem::take(&mut self.held),
        };
        out.extend(released.into_iter().map(|o| MessageOffset::new(partition, o)));
    }
}

impl AckTracker {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx,
            partitions: BTreeMap::new(),
        }
    }

    /// Issue a receipt for `offset`
    ///
    /// Returns `None` once [`AckTracker::seal`] was called.
    pub(crate) fn receipt(&mut self, offset: MessageOffset) -> Option<AckReceipt> {
        let tx = self.tx.as_ref()?.clone();
        self.partition(offset.partition).unacked.insert(offset.offset);
        Some(AckReceipt { offset, tx })
    }

    /// Mark `offset` as done without a receipt (e.g. an undecodable message)
    pub(crate) fn skip(&mut self, offset: MessageOffset) {
        self.partition(offset.partition).held.insert(offset.offset);
    }

    /// Offsets that became committable since the last call, without waiting
    pub(crate) fn ready(&mut self) -> Vec<MessageOffset> {
        while let Ok(offset) = self.rx.try_recv() {
            self.redeem(offset);
        }
        self.release()
    }

    /// Stop issuing receipts
    pub(crate) fn seal(&mut self) {
        self.tx = None;
    }

    /// Wait until every issued receipt was redeemed or dropped
    ///
    /// Only terminates after [`AckTracker::seal`]. Returns the offsets that
    /// became committable.
    pub(crate) async fn settle(&mut self) -> Vec<MessageOffset> {
        while let Some(offset) = self.rx.recv().await {
            self.redeem(offset);
        }
        self.release()
    }

    /// Receipts issued and not seen redeemed
    pub(crate) fn outstanding(&self) -> usize {
        self.partitions.values().map(|p| p.unacked.len()).sum()
    }

    fn partition(&mut self, partition: i32) -> &mut PartitionAcks {
        self.partitions.entry(partition).or_default()
    }

    fn redeem(&mut self, offset: MessageOffset) {
        let acks = self.partition(offset.partition);
        if acks.unacked.remove(&offset.offset) {
            acks.held.insert(offset.offset);
        }
    }

    fn release(&mut self) -> Vec<MessageOffset> {
        let mut out = Vec::new();
        for (partition, acks) in &mut self.partitions {
            acks.release(*partition, &mut out);
        }
        out
    }
}
