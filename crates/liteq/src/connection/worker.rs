use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use indexmap::IndexMap;
use rusqlite::OpenFlags;
use tokio::sync::oneshot;

use crate::{
    config::ConnectionConfig,
    error::{Error, Result},
    logger::QueryLogger,
    query_result::{QueryResult, QueryType},
    row::{Row, Value},
};

// Each SQLite session has a dedicated thread. The thread owns the
// `rusqlite::Connection` outright and works through commands one at a
// time, which is what serialises statements on the session: a command is
// fully processed, rows materialised and all, before the next one starts.

static THREAD_ID: AtomicU64 = AtomicU64::new(0);

/// Commands buffered for the worker thread before backpressure is applied.
const COMMAND_CHANNEL_SIZE: usize = 50;

pub(crate) struct ConnectionWorker {
    command_tx: flume::Sender<Command>,
    pub(crate) shared: Arc<WorkerSharedState>,
    join_handle: Option<thread::JoinHandle<()>>,
}

/// Counters the async side can read without a round-trip to the thread.
pub(crate) struct WorkerSharedState {
    pub(crate) query_count: AtomicU64,
    pub(crate) in_transaction: AtomicBool,
}

enum Command {
    Execute {
        sql: Box<str>,
        params: Vec<Value>,
        tx: oneshot::Sender<Result<QueryResult>>,
    },
    ExecuteBatch {
        sql: Box<str>,
        batches: Vec<Vec<Value>>,
        tx: oneshot::Sender<Result<QueryResult>>,
    },
    Begin {
        tx: oneshot::Sender<Result<()>>,
    },
    Commit {
        tx: oneshot::Sender<Result<()>>,
    },
    Rollback {
        tx: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown {
        tx: Option<oneshot::Sender<Result<()>>>,
    },
}

struct Session {
    conn: rusqlite::Connection,
    config: ConnectionConfig,
    shared: Arc<WorkerSharedState>,
}

impl ConnectionWorker {
    pub(crate) async fn establish(config: ConnectionConfig) -> Result<Self> {
        let (establish_tx, establish_rx) = oneshot::channel();
        let thread_name = format!("liteq-conn-{}", THREAD_ID.fetch_add(1, Ordering::AcqRel));

        let join_handle = thread::Builder::new().name(thread_name).spawn(move || {
            let (command_tx, command_rx) = flume::bounded(COMMAND_CHANNEL_SIZE);

            let conn = match open_session(&config) {
                Ok(conn) => conn,
                Err(e) => {
                    establish_tx.send(Err(e)).ok();
                    return;
                }
            };

            let shared = Arc::new(WorkerSharedState {
                query_count: AtomicU64::new(0),
                in_transaction: AtomicBool::new(false),
            });

            if establish_tx
                .send(Ok((command_tx, Arc::clone(&shared))))
                .is_err()
            {
                return;
            }

            let session = Session {
                conn,
                config,
                shared,
            };

            for cmd in command_rx {
                match cmd {
                    Command::Execute { sql, params, tx } => {
                        let res = session.run_statement(&sql, params);
                        session.shared.query_count.fetch_add(1, Ordering::AcqRel);
                        tx.send(res).ok();
                    }
                    Command::ExecuteBatch { sql, batches, tx } => {
                        let res = session.run_batch(&sql, batches);
                        session.shared.query_count.fetch_add(1, Ordering::AcqRel);
                        tx.send(res).ok();
                    }
                    Command::Begin { tx } => {
                        tx.send(session.begin()).ok();
                    }
                    Command::Commit { tx } => {
                        tx.send(session.commit()).ok();
                    }
                    Command::Rollback { tx } => {
                        let res = session.rollback();
                        match tx {
                            Some(tx) => {
                                tx.send(res).ok();
                            }
                            None => {
                                if let Err(error) = res {
                                    tracing::error!(
                                        target: "liteq::connection",
                                        %error,
                                        "rollback on connection return failed"
                                    );
                                }
                            }
                        }
                    }
                    Command::Shutdown { tx } => {
                        let res = session.conn.close().map_err(|(_, e)| Error::Query(e));
                        if let Some(tx) = tx {
                            let _ = tx.send(res);
                        }
                        return;
                    }
                }
            }
        })?;

        let (command_tx, shared) = establish_rx.await.map_err(|_| Error::WorkerCrashed)??;

        Ok(Self {
            command_tx,
            shared,
            join_handle: Some(join_handle),
        })
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.join_handle.is_none()
    }

    pub(crate) async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        self.oneshot_cmd(|tx| Command::Execute {
            sql: sql.into(),
            params,
            tx,
        })
        .await?
    }

    pub(crate) async fn execute_batch(
        &self,
        sql: &str,
        batches: Vec<Vec<Value>>,
    ) -> Result<QueryResult> {
        self.oneshot_cmd(|tx| Command::ExecuteBatch {
            sql: sql.into(),
            batches,
            tx,
        })
        .await?
    }

    pub(crate) async fn begin(&self) -> Result<()> {
        self.oneshot_cmd(|tx| Command::Begin { tx }).await?
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        self.oneshot_cmd(|tx| Command::Commit { tx }).await?
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        self.oneshot_cmd(|tx| Command::Rollback { tx: Some(tx) })
            .await?
    }

    /// Queue a rollback without waiting for the outcome. Used on drop
    /// paths where there is nobody left to report an error to.
    pub(crate) fn start_rollback(&self) -> Result<()> {
        self.command_tx
            .send(Command::Rollback { tx: None })
            .map_err(|_| Error::WorkerCrashed)
    }

    async fn oneshot_cmd<F, T>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (tx, rx) = oneshot::channel();

        self.command_tx
            .send_async(command(tx))
            .await
            .map_err(|_| Error::WorkerCrashed)?;

        rx.await.map_err(|_| Error::WorkerCrashed)
    }

    /// Ask the worker to close the session and end the thread, then join
    /// it.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        let join_handle = self.join_handle.take();
        let (tx, rx) = oneshot::channel();

        let send_res = self
            .command_tx
            .send_async(Command::Shutdown { tx: Some(tx) })
            .await
            .map_err(|_| Error::WorkerCrashed);

        if let Err(e) = send_res {
            if let Some(handle) = join_handle {
                let _ = handle.join();
            }
            return Err(e);
        }

        let res = rx.await.map_err(|_| Error::WorkerCrashed)?;
        res?;

        if let Some(handle) = join_handle {
            handle.join().map_err(|_| Error::WorkerCrashed)?;
        }

        Ok(())
    }

    /// Best-effort shutdown for drop paths: queue the command, detach the
    /// thread.
    pub(crate) fn shutdown_nowait(&mut self) {
        self.join_handle.take();
        let _ = self.command_tx.send(Command::Shutdown { tx: None });
    }
}

fn open_session(config: &ConnectionConfig) -> Result<rusqlite::Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    if config.uri {
        flags |= OpenFlags::SQLITE_OPEN_URI;
    }

    let conn =
        rusqlite::Connection::open_with_flags(&config.database, flags).map_err(Error::Connect)?;

    conn.busy_timeout(config.busy_timeout).map_err(Error::Connect)?;
    conn.set_prepared_statement_cache_capacity(config.cached_statements);

    Ok(conn)
}

impl Session {
    fn run_statement(&self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        let started = Instant::now();
        let query_type = QueryType::of(sql);
        let mut logger = QueryLogger::new(sql, self.config.log_settings.clone());

        let res = self.step_statement(sql, params, query_type, &mut logger);
        let res = self.finish_autocommit(res);

        res.map(|(rows, rows_affected)| QueryResult {
            rows,
            rows_affected,
            last_insert_id: self.conn.last_insert_rowid(),
            execution_time: started.elapsed(),
            query_type,
        })
    }

    fn step_statement(
        &self,
        sql: &str,
        params: Vec<Value>,
        query_type: QueryType,
        logger: &mut QueryLogger<'_>,
    ) -> Result<(Vec<Row>, u64)> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(Error::Query)?;

        let names: Vec<String> = if query_type.returns_rows() {
            stmt.column_names()
                .iter()
                .map(|name| name.to_string())
                .collect()
        } else {
            Vec::new()
        };

        let mut out = Vec::new();

        {
            let mut rows = stmt
                .query(rusqlite::params_from_iter(params))
                .map_err(Error::Query)?;

            // Every statement steps to completion. Rows are materialised
            // for SELECTs only; anything else that happens to produce
            // rows has them discarded, like the driver's execute path.
            while let Some(row) = rows.next().map_err(Error::Query)? {
                if !query_type.returns_rows() {
                    continue;
                }

                let mut columns = IndexMap::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    let value: Value = row.get(i).map_err(Error::Query)?;
                    columns.insert(name.clone(), value);
                }
                logger.increment_rows_returned();
                out.push(Row::new(columns));
            }
        }

        if query_type.returns_rows() {
            let count = out.len() as u64;
            Ok((out, count))
        } else {
            let affected = self.conn.changes() as u64;
            logger.increase_rows_affected(affected);
            Ok((Vec::new(), affected))
        }
    }

    fn run_batch(&self, sql: &str, batches: Vec<Vec<Value>>) -> Result<QueryResult> {
        let started = Instant::now();
        let query_type = QueryType::of(sql);
        let mut logger = QueryLogger::new(sql, self.config.log_settings.clone());

        let res = (|| {
            let mut stmt = self.conn.prepare_cached(sql).map_err(Error::Query)?;
            let mut total = 0u64;

            for params in batches {
                let affected = stmt
                    .execute(rusqlite::params_from_iter(params))
                    .map_err(Error::Query)? as u64;
                logger.increase_rows_affected(affected);
                total += affected;
            }

            Ok(total)
        })();
        let res = self.finish_autocommit(res);

        res.map(|rows_affected| QueryResult {
            rows: Vec::new(),
            rows_affected,
            last_insert_id: self.conn.last_insert_rowid(),
            execution_time: started.elapsed(),
            query_type,
        })
    }

    /// A statement outside an explicit transaction must not leave the
    /// session inside one: commit whatever it started on success, roll it
    /// back on failure.
    fn finish_autocommit<T>(&self, res: Result<T>) -> Result<T> {
        if self.in_transaction() || self.conn.is_autocommit() {
            return res;
        }

        match res {
            Ok(v) => {
                self.conn.execute_batch("COMMIT").map_err(Error::Query)?;
                Ok(v)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn in_transaction(&self) -> bool {
        self.shared.in_transaction.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<()> {
        if self.in_transaction() {
            return Ok(());
        }

        let sql = match self.config.isolation_level {
            Some(level) => format!("BEGIN {}", level.as_str()),
            None => "BEGIN".to_string(),
        };

        self.conn.execute_batch(&sql).map_err(Error::Query)?;
        self.shared.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }

        self.conn.execute_batch("COMMIT").map_err(Error::Query)?;
        self.shared.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }

        self.conn.execute_batch("ROLLBACK").map_err(Error::Query)?;
        self.shared.in_transaction.store(false, Ordering::Release);
        Ok(())
    }
}
