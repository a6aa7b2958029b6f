//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the metrics consumer:
//! data model, collaborator traits, error taxonomy and configuration schema.
//!
//! ## Data flow
//! broker → `MessageSource` → `RawMessage` → decode → `MetricRecord`
//! → `MetricStore` → `StorageConnection` → database
//!
//! ## Ownership
//! An in-flight `MetricRecord` is held by exactly one stage at a time:
//! the poller while decoding, the intake buffer while queued, a worker while
//! persisting.

mod config;
mod error;
mod message;
mod metric;
mod policy;
mod source;
mod storage;

pub use config::*;
pub use error::*;
pub use message::*;
pub use metric::*;
pub use policy::*;
pub use source::{LocalMessageSource, MessageSource};
pub use storage::{
    Connector, LocalMetricStore, LocalStorageConnection, MetricStore, PersistOutcome,
    StorageConnection,
};
