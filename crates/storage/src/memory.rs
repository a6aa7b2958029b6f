//! 内存存储
//!
//! 进程内的 `websites` / `metrics` 两张表，语义对齐 PostgreSQL：
//! - `websites.url` 唯一；未提交的插入对其它事务不可见，
//!   并发插入同一 url 时后到者等待先到者提交或回滚
//! - `metrics.website_id` 外键约束
//! - 事务内写入在 `commit` 时生效，`rollback` 时丢弃
//!
//! 同时提供故障注入，用于测试失败隔离与连接池自愈。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    Connector, ContractError, MetricId, MetricRecord, StorageConnection, WebsiteId,
};
use tokio::sync::Notify;
use tracing::trace;

/// `websites` 表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct Website {
    pub id: WebsiteId,
    pub url: String,
    pub regexp: String,
    pub created_at: DateTime<Utc>,
}

/// `metrics` 表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetric {
    pub id: MetricId,
    pub website_id: WebsiteId,
    pub error_code: i32,
    pub response_time: f64,
    pub matched_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    websites: Vec<Website>,
    by_url: HashMap<String, WebsiteId>,
    metrics: Vec<StoredMetric>,
    /// 未提交的 url 插入 → 所属连接
    reserved: HashMap<String, u64>,
    next_website_id: WebsiteId,
    next_metric_id: MetricId,
}

#[derive(Debug, Default)]
struct Faults {
    failing_urls: HashSet<String>,
    connect_failures: usize,
    write_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    released: Notify,
    next_conn_id: AtomicU64,
    connects: AtomicU64,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

/// 内存存储（可克隆句柄）
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.inner.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== 故障注入 =====

    /// 该 url 的指标写入以连接错误失败，连接随之损坏
    pub fn fail_url(&self, url: impl Into<String>) {
        self.faults().failing_urls.insert(url.into());
    }

    /// 接下来 `n` 次建立连接失败
    pub fn fail_next_connects(&self, n: usize) {
        self.faults().connect_failures = n;
    }

    /// 每次指标写入前等待 `delay`
    pub fn set_write_delay(&self, delay: Duration) {
        self.faults().write_delay = Some(delay);
    }

    // ===== 查询 =====

    /// 已提交的 websites（按 id 排序）
    pub fn websites(&self) -> Vec<Website> {
        self.tables().websites.clone()
    }

    /// 已提交的 metrics（按提交顺序）
    pub fn metrics(&self) -> Vec<StoredMetric> {
        self.tables().metrics.clone()
    }

    pub fn website_count(&self) -> usize {
        self.tables().websites.len()
    }

    pub fn metric_count(&self) -> usize {
        self.tables().metrics.len()
    }

    /// 按 url 查找已提交的 website
    pub fn website_by_url(&self, url: &str) -> Option<Website> {
        let tables = self.tables();
        let id = *tables.by_url.get(url)?;
        tables.websites.iter().find(|w| w.id == id).cloned()
    }

    /// 当前打开的连接数
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::Relaxed)
    }

    /// 同时打开连接数的历史峰值
    pub fn max_open_connections(&self) -> usize {
        self.inner.max_open.load(Ordering::Relaxed)
    }

    /// 累计建立的连接数
    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    fn open_connection(&self) -> Result<MemoryConnection, ContractError> {
        {
            let mut faults = self.faults();
            if faults.connect_failures > 0 {
                faults.connect_failures -= 1;
                return Err(ContractError::storage_connection("connection refused"));
            }
        }
        self.inner.connects.fetch_add(1, Ordering::Relaxed);
        let open = self.inner.open.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.max_open.fetch_max(open, Ordering::Relaxed);

        Ok(MemoryConnection {
            id: self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed),
            store: self.clone(),
            in_tx: false,
            staged_websites: Vec::new(),
            staged_metrics: Vec::new(),
            broken: false,
            closed: false,
        })
    }
}

/// 内存存储连接器
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<MemoryConnection, ContractError> {
        self.store.open_connection()
    }
}

/// 内存存储连接
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    store: MemoryStore,
    in_tx: bool,
    staged_websites: Vec<Website>,
    staged_metrics: Vec<StoredMetric>,
    broken: bool,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_usable(&self) -> Result<(), ContractError> {
        if self.broken || self.closed {
            return Err(ContractError::storage_connection("connection is closed"));
        }
        Ok(())
    }

    fn ensure_tx(&self) -> Result<(), ContractError> {
        self.ensure_usable()?;
        if !self.in_tx {
            return Err(ContractError::storage_query("no transaction in progress"));
        }
        Ok(())
    }

    fn staged_url(&self, url: &str) -> Option<WebsiteId> {
        self.staged_websites
            .iter()
            .find(|w| w.url == url)
            .map(|w| w.id)
    }

    /// 结束事务：释放保留的 url 并唤醒等待者
    fn end_tx(&mut self, apply: bool) {
        let websites = std::mem::take(&mut self.staged_websites);
        let metrics = std::mem::take(&mut self.staged_metrics);
        {
            let mut tables = self.store.tables();
            let id = self.id;
            tables.reserved.retain(|_, owner| *owner != id);
            if apply {
                for website in websites {
                    tables.by_url.insert(website.url.clone(), website.id);
                    tables.websites.push(website);
                }
                tables.metrics.extend(metrics);
            }
        }
        self.in_tx = false;
        self.store.inner.released.notify_waiters();
    }

    fn website_visible(&self, tables: &Tables, website_id: WebsiteId) -> bool {
        tables.websites.iter().any(|w| w.id == website_id)
            || self.staged_websites.iter().any(|w| w.id == website_id)
    }
}

impl StorageConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), ContractError> {
        self.ensure_usable()?;
        if self.in_tx {
            self.end_tx(false);
        }
        self.in_tx = true;
        Ok(())
    }

    async fn insert_website_if_absent(
        &mut self,
        url: &str,
        regexp: &str,
    ) -> Result<Option<WebsiteId>, ContractError> {
        self.ensure_tx()?;
        if self.staged_url(url).is_some() {
            return Ok(None);
        }

        loop {
            let released = self.store.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut tables = self.store.tables();
                if tables.by_url.contains_key(url) {
                    return Ok(None);
                }
                if !tables.reserved.contains_key(url) {
                    tables.next_website_id += 1;
                    let id = tables.next_website_id;
                    tables.reserved.insert(url.to_string(), self.id);
                    drop(tables);

                    self.staged_websites.push(Website {
                        id,
                        url: url.to_string(),
                        regexp: regexp.to_string(),
                        created_at: Utc::now(),
                    });
                    trace!(url, website_id = id, conn = self.id, "website staged");
                    return Ok(Some(id));
                }
            }

            // Another transaction holds an uncommitted insert of this url.
            released.await;
        }
    }

    async fn find_website(&mut self, url: &str) -> Result<Option<WebsiteId>, ContractError> {
        self.ensure_tx()?;
        if let Some(id) = self.staged_url(url) {
            return Ok(Some(id));
        }
        Ok(self.store.tables().by_url.get(url).copied())
    }

    async fn insert_metric(
        &mut self,
        website_id: WebsiteId,
        record: &MetricRecord,
    ) -> Result<MetricId, ContractError> {
        self.ensure_tx()?;

        let (delay, fail) = {
            let faults = self.store.faults();
            (faults.write_delay, faults.failing_urls.contains(&record.url))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            self.broken = true;
            return Err(ContractError::storage_connection(format!(
                "server closed the connection while writing metric for '{}'",
                record.url
            )));
        }

        let mut tables = self.store.tables();
        if !self.website_visible(&tables, website_id) {
            return Err(ContractError::storage_constraint(
                "metrics_website_id_fkey",
                format!("website {website_id} does not exist"),
            ));
        }
        tables.next_metric_id += 1;
        let id = tables.next_metric_id;
        drop(tables);

        self.staged_metrics.push(StoredMetric {
            id,
            website_id,
            error_code: record.error_code,
            response_time: record.response_time,
            matched_text: record.matched_text.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn commit(&mut self) -> Result<(), ContractError> {
        self.ensure_tx()?;
        self.end_tx(true);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ContractError> {
        if self.in_tx {
            self.end_tx(false);
        }
        self.ensure_usable()
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        if self.in_tx {
            self.end_tx(false);
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.in_tx {
            self.end_tx(false);
        }
        self.store.inner.open.fetch_sub(1, Ordering::Relaxed);
    }
}
