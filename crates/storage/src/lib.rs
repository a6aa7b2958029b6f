//! # Storage
//!
//! Storage side of the metrics consumer.
//!
//! Responsibilities:
//! - Bounded Connection Pool shared by all workers
//! - Storage Writer: persist one metric (and lazily its website) per call
//! - In-memory store with fault injection (tests, dry runs)
//! - PostgreSQL connector (feature `postgres`)
//!
//! ## Usage Example
//!
//! ```ignore
//! use storage::{ConnectionPool, MemoryConnector, MemoryStore, PoolConfig, StorageWriter};
//!
//! let store = MemoryStore::new();
//! let pool = ConnectionPool::connect(MemoryConnector::new(store.clone()), PoolConfig::default()).await?;
//! let writer = StorageWriter::new(pool);
//! let outcome = writer.persist(&record).await?;
//! ```

mod error;
mod memory;
mod pool;
#[cfg(feature = "postgres")]
mod postgres;
mod writer;

pub use error::{Result, StorageError};
pub use memory::{MemoryConnection, MemoryConnector, MemoryStore, StoredMetric, Website};
pub use pool::{ConnectionPool, PoolConfig, PoolMetrics, PoolMetricsSnapshot, PooledConnection};
#[cfg(feature = "postgres")]
pub use postgres::{PgConnector, PgStorageConnection};
pub use writer::StorageWriter;
