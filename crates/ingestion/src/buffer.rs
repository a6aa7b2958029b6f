//! Intake Buffer
//!
//! Bounded FIFO hand-off between the Broker Poller (single producer) and the
//! Dispatcher (single consumer). `push` waits while the buffer is full, `pop`
//! waits while it is empty; the poller therefore stops fetching when the
//! dispatcher falls behind.
//!
//! Closing either side ends the hand-off: after the producer is dropped the
//! consumer still pops every resident item and then sees `None`; after the
//! consumer calls [`IntakeConsumer::close`] pending and future pushes fail.

use async_channel::{bounded, Receiver, Sender};
use tracing::trace;

use crate::error::{IngestionError, Result};

/// Create an Intake Buffer of fixed `capacity`
///
/// # Panics
/// If `capacity` is zero (rejected earlier by config validation).
pub fn intake_buffer<T>(capacity: usize) -> (IntakeProducer<T>, IntakeConsumer<T>) {
    let (tx, rx) = bounded(capacity);
    (IntakeProducer { tx }, IntakeConsumer { rx })
}

/// Producer half, owned by the Broker Poller
#[derive(Debug)]
pub struct IntakeProducer<T> {
    tx: Sender<T>,
}

impl<T> IntakeProducer<T> {
    /// Push one item, waiting while the buffer is at capacity
    ///
    /// # Errors
    /// `IngestionError::BufferClosed` once the consumer has closed the
    /// buffer; the item is dropped.
    pub async fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| IngestionError::BufferClosed)?;
        trace!(depth = self.tx.len(), "intake push");
        Ok(())
    }

    /// Items currently buffered
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the Dispatcher
#[derive(Debug)]
pub struct IntakeConsumer<T> {
    rx: Receiver<T>,
}

impl<T> IntakeConsumer<T> {
    /// Pop the oldest item, waiting while the buffer is empty
    ///
    /// Returns `None` once the buffer is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Remove every resident item into `out` without waiting for more
    ///
    /// Returns the number of items moved.
    pub fn drain_into(&self, out: &mut Vec<T>) -> usize {
        let before = out.len();
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out.len() - before
    }

    /// Remove and return every resident item
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.rx.len());
        self.drain_into(&mut out);
        out
    }

    /// Refuse further pushes; resident items can still be popped or drained
    ///
    /// Returns `true` if this call closed the buffer.
    pub fn close(&self) -> bool {
        self.rx.close()
    }

    /// Items currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(usize::MAX)
    }
}
