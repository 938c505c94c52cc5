//! An async SQLite client that multiplexes many concurrent callers onto a
//! bounded set of connections, with priority-ordered dispatch.
//!
//! SQLite is an in-process engine whose sessions are not safe for
//! concurrent use. liteq sits between application code and the driver:
//! a bounded [`Pool`] owns the sessions and lends them out one borrower
//! at a time, and a [`QueryExecutor`] schedules submitted statements onto
//! the pool through a bounded priority queue with a fixed worker set.
//! The [`Client`] facade ties the two together; [`Transaction`]s bypass
//! the queue and pin a single connection.

/// The client facade.
mod client;
/// Connection, pool, and server configuration.
mod config;
/// One session with the SQLite engine, on its own worker thread.
mod connection;
/// Error types and result helpers.
pub mod error;
/// The priority-ordered query executor.
mod executor;
/// Statement logging.
mod logger;
/// The bounded connection pool.
mod pool;
/// Query outcomes and statement classification.
mod query_result;
/// Materialised result rows.
mod row;
/// Transaction scopes over pinned pool connections.
mod transaction;

pub use crate::{
    client::{Client, Stats},
    config::{Config, ConnectionConfig, IsolationLevel, PoolConfig, ServerConfig},
    connection::Connection,
    error::{Error, Result},
    executor::{ExecutorStats, Priority, QueryExecutor, DEFAULT_MAX_QUEUE_SIZE},
    logger::LogSettings,
    pool::{CloseEvent, Pool, PoolConnection, PoolStats},
    query_result::{QueryResult, QueryType},
    row::{Row, Value},
    transaction::Transaction,
};
