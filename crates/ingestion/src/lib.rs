//! # Ingestion
//!
//! Broker-side half of the metrics consumer.
//!
//! Responsibilities:
//! - Decode broker payloads into `MetricRecord` (strict, fixed-field codec)
//! - Bounded Intake Buffer between the poller and the dispatcher
//! - Broker Poller task: poll → decode → push, with backpressure
//! - Offset acknowledgment policy (on fetch / on persist)
//! - In-memory and NDJSON replay brokers
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{intake_buffer, BrokerPoller, PollerConfig, ReplayBroker};
//! use tokio_util::sync::CancellationToken;
//!
//! let (producer, consumer) = intake_buffer(1000);
//! let mut broker = ReplayBroker::new("metrics.ndjson", 500);
//! broker.connect().await?;
//!
//! let cancel = CancellationToken::new();
//! let poller = BrokerPoller::new(broker, producer, PollerConfig::default(), cancel.clone()).spawn();
//! while let Some(envelope) = consumer.pop().await {
//!     // hand to the worker pool
//! }
//! let stats = poller.join().await?;
//! ```

mod buffer;
mod codec;
mod config;
mod envelope;
mod error;
mod mock;
mod poller;
mod replay;

// Re-exports
pub use buffer::{intake_buffer, IntakeConsumer, IntakeProducer};
pub use codec::{decode, encode};
pub use config::{PollerConfig, PollerMetrics, PollerMetricsSnapshot};
pub use contracts::{MetricRecord, RawMessage};
pub use envelope::{AckReceipt, Envelope};
pub use error::{IngestionError, Result};
pub use mock::MemoryBroker;
pub use poller::{BrokerPoller, PollerHandle};
pub use replay::ReplayBroker;
