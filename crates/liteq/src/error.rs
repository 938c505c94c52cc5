//! Types for working with errors produced by liteq.

use std::io;
use std::time::Duration;

/// A specialized `Result` type for liteq.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all the ways a method can fail within liteq.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Opening the underlying SQLite session failed.
    #[error("failed to open database connection: {0}")]
    Connect(#[source] rusqlite::Error),

    /// A statement failed inside the driver.
    #[error("query execution failed: {0}")]
    Query(#[source] rusqlite::Error),

    /// Error communicating with the database backend.
    #[error("error communicating with database: {0}")]
    Io(#[from] io::Error),

    /// The executor's ingress queue stayed full for the whole admission
    /// window. This is the backpressure signal; callers are expected to
    /// retry or shed load.
    #[error("query queue is full")]
    QueueFull,

    /// The submitter's deadline expired before its query completed.
    ///
    /// The statement itself is not cancelled; a worker will still run it
    /// and discard the result.
    #[error("query timed out after {0:?}")]
    QueryTimedOut(Duration),

    /// A [`Pool::acquire`] timed out due to connections not becoming
    /// available within the bound.
    ///
    /// [`Pool::acquire`]: crate::Pool::acquire
    #[error("pool timed out while waiting for an open connection")]
    PoolTimedOut,

    /// [`Pool::close`] was called, or had already been called when
    /// [`Pool::acquire`] started waiting.
    ///
    /// [`Pool::acquire`]: crate::Pool::acquire
    /// [`Pool::close`]: crate::Pool::close
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,

    /// The executor stopped before a queued query was dispatched.
    #[error("executor stopped before the query was executed")]
    ExecutorStopped,

    /// The [`Client`] facade was used before [`Client::connect`].
    ///
    /// [`Client`]: crate::Client
    /// [`Client::connect`]: crate::Client::connect
    #[error("client is not connected")]
    NotConnected,

    /// A connection's background worker has crashed.
    #[error("attempted to communicate with a crashed connection worker")]
    WorkerCrashed,

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}
