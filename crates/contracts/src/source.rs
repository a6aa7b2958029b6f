//! MessageSource trait - broker collaborator
//!
//! The consumer never speaks a broker wire protocol itself; it polls a
//! `MessageSource` for batches and tells it which offsets to commit.

use std::time::Duration;

use crate::{ContractError, MessageOffset, RawMessage};

/// Broker consumer abstraction
///
/// Implementations subscribe to one topic under one consumer group. Offset
/// management is driven by the poller's `AckPolicy` through `commit`.
#[trait_variant::make(MessageSource: Send)]
pub trait LocalMessageSource {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Establish the broker session
    ///
    /// # Errors
    /// Failure here is an unrecoverable startup error
    async fn connect(&mut self) -> Result<(), ContractError>;

    /// Fetch the next batch, waiting up to `timeout` when nothing is available
    ///
    /// An empty batch is not an error. The poller drops this future when
    /// it is cancelled, so messages already taken from the broker must stay
    /// in the source for the next call.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<RawMessage>, ContractError>;

    /// Acknowledge consumed offsets
    ///
    /// Offsets arrive ascending per partition and never skip past an
    /// unacknowledged one, so a source may keep only the highest offset
    /// per partition as its commit position.
    async fn commit(&mut self, offsets: &[MessageOffset]) -> Result<(), ContractError>;

    /// Close the session
    async fn close(&mut self) -> Result<(), ContractError>;

    /// Whether a finite source has delivered everything it holds
    fn is_exhausted(&self) -> bool;
}
