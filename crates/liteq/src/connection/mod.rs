use std::{sync::atomic::Ordering, time::Instant};

use crate::{
    config::ConnectionConfig,
    error::Result,
    query_result::QueryResult,
    row::{Row, Value},
};

mod worker;

use worker::ConnectionWorker;

/// One live session with the SQLite engine.
///
/// Because SQLite is an in-process database accessed by blocking API
/// calls, every `Connection` runs its session on a dedicated background
/// thread and communicates with it over a channel. Commands are processed
/// strictly one at a time, so at most one statement is ever active on the
/// session — including the eager materialisation of its result rows.
///
/// Connections are created and owned by the [`Pool`][crate::Pool];
/// borrowers receive them through a
/// [`PoolConnection`][crate::PoolConnection].
///
/// Dropping a `Connection` asks the worker thread to close the session
/// without waiting for the outcome. Call [`close()`][Self::close] to
/// observe an error instead.
pub struct Connection {
    worker: ConnectionWorker,
    created_at: Instant,
}

impl Connection {
    /// Open a new session. The timestamp used for age-based recycling is
    /// recorded here.
    pub(crate) async fn establish(config: &ConnectionConfig) -> Result<Self> {
        let worker = ConnectionWorker::establish(config.clone()).await?;
        Ok(Self {
            worker,
            created_at: Instant::now(),
        })
    }

    /// Run one statement.
    ///
    /// For a SELECT, every row is materialised into a [`Row`] before this
    /// returns. Outside an explicit transaction the statement is
    /// committed on success and rolled back on failure.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        self.worker.execute(sql, params).await
    }

    /// Run one statement repeatedly, once per parameter set. Produces no
    /// rows.
    pub async fn execute_batch(&self, sql: &str, batches: Vec<Vec<Value>>) -> Result<QueryResult> {
        self.worker.execute_batch(sql, batches).await
    }

    /// The first row produced by the statement, or `None`.
    pub async fn fetch_one(&self, sql: &str, params: Vec<Value>) -> Result<Option<Row>> {
        let mut result = self.execute(sql, params).await?;

        if result.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(result.rows.remove(0)))
        }
    }

    /// Every row produced by the statement.
    pub async fn fetch_all(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params).await?.rows)
    }

    /// Begin an explicit transaction, honouring the configured isolation
    /// level. No-op when one is already open.
    pub async fn begin(&self) -> Result<()> {
        self.worker.begin().await
    }

    /// Commit the open transaction. No-op outside one.
    pub async fn commit(&self) -> Result<()> {
        self.worker.commit().await
    }

    /// Roll back the open transaction. No-op outside one.
    pub async fn rollback(&self) -> Result<()> {
        self.worker.rollback().await
    }

    /// Queue a rollback without waiting for the outcome.
    pub(crate) fn start_rollback(&self) -> Result<()> {
        self.worker.start_rollback()
    }

    /// When the session was opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Statements completed on this session, successes and failures both.
    pub fn query_count(&self) -> u64 {
        self.worker.shared.query_count.load(Ordering::Acquire)
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.worker.shared.in_transaction.load(Ordering::Acquire)
    }

    /// Close the session and join the worker thread.
    ///
    /// The returned future **must** be awaited to ensure the session is
    /// fully closed.
    #[must_use = "futures returned by `Connection::close` must be awaited"]
    pub async fn close(mut self) -> Result<()> {
        self.worker.shutdown().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("query_count", &self.query_count())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.worker.is_shutdown() {
            self.worker.shutdown_nowait();
        }
    }
}
