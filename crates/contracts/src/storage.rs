//! Storage collaborator traits
//!
//! `StorageConnection` is one open database session, `Connector` opens new
//! sessions for the connection pool, and `MetricStore` is the "persist one
//! metric" operation the worker pool runs.

use std::future::Future;

use crate::{ContractError, MetricId, MetricRecord, WebsiteId};

/// One database session
///
/// Statements between `begin` and `commit`/`rollback` form one transaction.
#[trait_variant::make(StorageConnection: Send)]
pub trait LocalStorageConnection {
    /// Start a transaction
    async fn begin(&mut self) -> Result<(), ContractError>;

    /// Insert a website row unless one with `url` exists
    ///
    /// Returns the new id, or `None` when the url is already present
    /// (a conflict on the unique url constraint is not an error).
    async fn insert_website_if_absent(
        &mut self,
        url: &str,
        regexp: &str,
    ) -> Result<Option<WebsiteId>, ContractError>;

    /// Look up the website id for `url`
    async fn find_website(&mut self, url: &str) -> Result<Option<WebsiteId>, ContractError>;

    /// Insert one metric row referencing `website_id`
    async fn insert_metric(
        &mut self,
        website_id: WebsiteId,
        record: &MetricRecord,
    ) -> Result<MetricId, ContractError>;

    /// Commit the open transaction
    async fn commit(&mut self) -> Result<(), ContractError>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> Result<(), ContractError>;

    /// Whether the session is unusable and must be discarded
    fn is_broken(&self) -> bool;

    /// Close the session
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Opens storage sessions
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector
    type Connection: StorageConnection + Send + 'static;

    /// Connector name (used for logging)
    fn name(&self) -> &str;

    /// Open a new session
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, ContractError>> + Send;
}

/// Result of persisting one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub website_id: WebsiteId,
    pub metric_id: MetricId,
    /// This call created the website row
    pub website_created: bool,
}

/// Persists metrics, one call per metric
#[trait_variant::make(MetricStore: Send)]
pub trait LocalMetricStore {
    /// Store name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Persist one metric durably
    ///
    /// # Errors
    /// Any failure means the metric is lost for this attempt; there is no retry.
    async fn persist(&self, record: &MetricRecord) -> Result<PersistOutcome, ContractError>;

    /// Release storage resources; idempotent
    async fn close(&self);
}
