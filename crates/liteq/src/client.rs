use std::time::Duration;

use serde::Serialize;

use crate::{
    config::Config,
    error::{Error, Result},
    executor::{ExecutorStats, Priority, QueryExecutor, DEFAULT_MAX_QUEUE_SIZE},
    pool::{Pool, PoolConnection, PoolStats},
    query_result::QueryResult,
    row::{Row, Value},
    transaction::Transaction,
};

/// The client facade: one executor and one pool behind a flat API.
///
/// ```no_run
/// use liteq::{Client, Config, Value};
///
/// # async fn run() -> liteq::Result<()> {
/// let mut client = Client::new(Config::in_memory());
/// client.connect().await?;
///
/// client
///     .execute("CREATE TABLE users (name TEXT)", vec![])
///     .await?;
/// client
///     .execute(
///         "INSERT INTO users (name) VALUES (?)",
///         vec![Value::Text("ada".into())],
///     )
///     .await?;
///
/// let rows = client.fetch_all("SELECT name FROM users", vec![]).await?;
/// assert_eq!(rows.len(), 1);
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
///
/// Statements submitted through `execute` / `fetch_*` travel through the
/// priority queue; [`transaction`][Self::transaction] and
/// [`connection`][Self::connection] check a connection out of the pool
/// directly.
pub struct Client {
    config: Config,
    pool: Option<Pool>,
    executor: Option<QueryExecutor>,
}

impl Client {
    pub fn new(config: Config) -> Client {
        Client {
            config,
            pool: None,
            executor: None,
        }
    }

    /// Open the pool and start the executor workers (one per pool slot).
    /// No-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let pool = Pool::new(self.config.clone()).await?;

        let executor = QueryExecutor::new(pool.clone(), DEFAULT_MAX_QUEUE_SIZE);
        executor.start(self.config.pool.max_size as usize);

        self.pool = Some(pool);
        self.executor = Some(executor);

        Ok(())
    }

    /// Stop the executor, then drain and close the pool. No-op when not
    /// connected.
    pub async fn close(&mut self) {
        if let Some(executor) = self.executor.take() {
            executor.stop().await;
        }

        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    fn executor(&self) -> Result<&QueryExecutor> {
        self.executor.as_ref().ok_or(Error::NotConnected)
    }

    fn pool(&self) -> Result<&Pool> {
        self.pool.as_ref().ok_or(Error::NotConnected)
    }

    /// Run one statement at [`Priority::Normal`] with no deadline.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        self.execute_with(sql, params, Priority::Normal, None).await
    }

    /// Run one statement with an explicit priority and optional deadline.
    ///
    /// When the deadline expires the call fails, but the statement still
    /// runs; only its result is discarded.
    pub async fn execute_with(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        self.executor()?.execute(sql, params, priority, timeout).await
    }

    /// Run one statement once per parameter set.
    pub async fn execute_many(
        &self,
        sql: &str,
        batches: Vec<Vec<Value>>,
    ) -> Result<QueryResult> {
        self.execute_many_with(sql, batches, Priority::Normal, None)
            .await
    }

    pub async fn execute_many_with(
        &self,
        sql: &str,
        batches: Vec<Vec<Value>>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        self.executor()?
            .execute_many(sql, batches, priority, timeout)
            .await
    }

    /// The first row produced by the statement, or `None`.
    pub async fn fetch_one(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>> {
        self.fetch_one_with(sql, params, Priority::Normal, None).await
    }

    pub async fn fetch_one_with(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Option<Row>> {
        self.executor()?
            .fetch_one(sql, params, priority, timeout)
            .await
    }

    /// Every row produced by the statement.
    pub async fn fetch_all(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        self.fetch_all_with(sql, params, Priority::Normal, None).await
    }

    pub async fn fetch_all_with(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        self.executor()?
            .fetch_all(sql, params, priority, timeout)
            .await
    }

    /// Begin a transaction on a connection pinned for the caller.
    pub async fn transaction(&self) -> Result<Transaction> {
        let conn = self.pool()?.acquire().await?;
        Transaction::begin(conn).await
    }

    /// Like [`transaction`][Self::transaction], with an explicit bound on
    /// the connection acquisition.
    pub async fn transaction_timeout(&self, timeout: Duration) -> Result<Transaction> {
        let conn = self.pool()?.acquire_timeout(timeout).await?;
        Transaction::begin(conn).await
    }

    /// Check a raw connection out of the pool. It returns to the pool on
    /// drop.
    pub async fn connection(&self) -> Result<PoolConnection> {
        self.pool()?.acquire().await
    }

    pub async fn connection_timeout(&self, timeout: Duration) -> Result<PoolConnection> {
        self.pool()?.acquire_timeout(timeout).await
    }

    /// A snapshot of client, pool, and executor state.
    pub fn stats(&self) -> Stats {
        Stats {
            initialized: self.is_connected(),
            pool: self.pool.as_ref().map(Pool::stats),
            executor: self.executor.as_ref().map(QueryExecutor::stats),
            config: self.config.clone(),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Aggregated snapshot returned by [`Client::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorStats>,
    pub config: Config,
}
