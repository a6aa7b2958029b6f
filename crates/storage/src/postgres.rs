//! PostgreSQL 连接器
//!
//! 假定 `websites` / `metrics` 两张表已存在（建表不在本程序职责内）。
//! url 唯一性依赖 `websites.url` 上的唯一约束：
//! `INSERT ... ON CONFLICT (url) DO NOTHING` 未返回行时再按 url 查询。

use contracts::{Connector, ContractError, MetricId, MetricRecord, StorageConnection, WebsiteId};
use sqlx::{Connection, PgConnection};
use tracing::debug;

const INSERT_WEBSITE: &str = "INSERT INTO websites (url, regexp) VALUES ($1, $2) \
     ON CONFLICT (url) DO NOTHING RETURNING id::bigint";

const SELECT_WEBSITE: &str = "SELECT id::bigint FROM websites WHERE url = $1";

const INSERT_METRIC: &str = "INSERT INTO metrics (website_id, error_code, response_time, matched_text) \
     VALUES ($1, $2, $3, $4) RETURNING id::bigint";

/// 将 sqlx 错误映射为契约层错误
fn map_sqlx(e: sqlx::Error) -> ContractError {
    match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            ContractError::storage_constraint(db.constraint().unwrap_or("unknown"), db.message())
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ContractError::storage_connection(e.to_string()),
        _ => ContractError::storage_query(e.to_string()),
    }
}

/// PostgreSQL 连接器
#[derive(Debug, Clone)]
pub struct PgConnector {
    dsn: String,
}

impl PgConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

impl Connector for PgConnector {
    type Connection = PgStorageConnection;

    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> Result<PgStorageConnection, ContractError> {
        let conn = PgConnection::connect(&self.dsn)
            .await
            .map_err(|e| ContractError::storage_connection(e.to_string()))?;
        debug!("postgres connection established");
        Ok(PgStorageConnection {
            conn: Some(conn),
            broken: false,
        })
    }
}

/// PostgreSQL 连接
#[derive(Debug)]
pub struct PgStorageConnection {
    conn: Option<PgConnection>,
    broken: bool,
}

impl PgStorageConnection {
    fn conn(&mut self) -> Result<&mut PgConnection, ContractError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ContractError::storage_connection("connection is closed"))
    }

    /// 记录连接级错误，后续由连接池丢弃该连接
    fn track(&mut self, e: sqlx::Error) -> ContractError {
        let err = map_sqlx(e);
        if err.is_connection_error() {
            self.broken = true;
        }
        err
    }

    async fn execute(&mut self, sql: &'static str) -> Result<(), ContractError> {
        let result = sqlx::query(sql).execute(self.conn()?).await;
        result.map(|_| ()).map_err(|e| self.track(e))
    }
}

impl StorageConnection for PgStorageConnection {
    async fn begin(&mut self) -> Result<(), ContractError> {
        self.execute("BEGIN").await
    }

    async fn insert_website_if_absent(
        &mut self,
        url: &str,
        regexp: &str,
    ) -> Result<Option<WebsiteId>, ContractError> {
        let result = sqlx::query_scalar::<_, i64>(INSERT_WEBSITE)
            .bind(url)
            .bind(regexp)
            .fetch_optional(self.conn()?)
            .await;
        result.map_err(|e| self.track(e))
    }

    async fn find_website(&mut self, url: &str) -> Result<Option<WebsiteId>, ContractError> {
        let result = sqlx::query_scalar::<_, i64>(SELECT_WEBSITE)
            .bind(url)
            .fetch_optional(self.conn()?)
            .await;
        result.map_err(|e| self.track(e))
    }

    async fn insert_metric(
        &mut self,
        website_id: WebsiteId,
        record: &MetricRecord,
    ) -> Result<MetricId, ContractError> {
        let result = sqlx::query_scalar::<_, i64>(INSERT_METRIC)
            .bind(website_id)
            .bind(record.error_code)
            .bind(record.response_time)
            .bind(record.matched_text.as_deref())
            .fetch_one(self.conn()?)
            .await;
        result.map_err(|e| self.track(e))
    }

    async fn commit(&mut self) -> Result<(), ContractError> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), ContractError> {
        self.execute("ROLLBACK").await
    }

    fn is_broken(&self) -> bool {
        self.broken || self.conn.is_none()
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .await
                .map_err(|e| ContractError::storage_connection(e.to_string())),
            None => Ok(()),
        }
    }
}
