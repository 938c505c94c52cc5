use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::{logger::LogSettings, Error, Result};

static IN_MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Locking behaviour requested when a transaction is begun.
///
/// Refer to [SQLite documentation] for the meaning of the transaction
/// behaviours.
///
/// [SQLite documentation]: https://www.sqlite.org/lang_transaction.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IsolationLevel {
    Deferred,
    Immediate,
    Exclusive,
}

impl IsolationLevel {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::Deferred => "DEFERRED",
            IsolationLevel::Immediate => "IMMEDIATE",
            IsolationLevel::Exclusive => "EXCLUSIVE",
        }
    }
}

/// Options applied to every session the pool opens.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Path to the database file, or `":memory:"`.
    pub database: String,

    /// How long the driver waits on a locked database before giving up.
    pub busy_timeout: Duration,

    /// Transaction behaviour used by `BEGIN`. `None` leaves the SQLite
    /// default (deferred).
    pub isolation_level: Option<IsolationLevel>,

    /// Capacity of the per-session prepared statement cache. Passed
    /// through to the driver unchanged.
    pub cached_statements: usize,

    /// Interpret `database` as a URI filename.
    pub uri: bool,

    #[serde(skip)]
    pub log_settings: LogSettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            database: ":memory:".into(),
            busy_timeout: Duration::from_secs(5),
            isolation_level: None,
            cached_statements: 128,
            uri: false,
            log_settings: LogSettings::default(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a fresh in-memory database.
    ///
    /// Every connection to a plain `":memory:"` path opens its own private
    /// database, which breaks pooling. This instead names a shared-cache
    /// in-memory database so all of a pool's connections see the same
    /// data.
    pub fn memory() -> Self {
        let seqno = IN_MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            database: format!("file:liteq-mem-{seqno}?mode=memory&cache=shared"),
            uri: true,
            ..Self::default()
        }
    }

    /// Sets the name of the database file.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the timeout to wait when the database is locked.
    ///
    /// The default busy timeout is 5 seconds.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the transaction behaviour used by `BEGIN`.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Sets the capacity of the per-session prepared statement cache.
    #[must_use]
    pub fn cached_statements(mut self, capacity: usize) -> Self {
        self.cached_statements = capacity;
        self
    }

    /// Interpret the database path as a URI filename.
    #[must_use]
    pub fn uri(mut self, uri: bool) -> Self {
        self.uri = uri;
        self
    }

    #[must_use]
    pub fn log_statements(mut self, level: LevelFilter) -> Self {
        self.log_settings.log_statements(level);
        self
    }

    #[must_use]
    pub fn log_slow_statements(mut self, level: LevelFilter, duration: Duration) -> Self {
        self.log_settings.log_slow_statements(level, duration);
        self
    }
}

/// Sizing and lifecycle policy for the connection pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened up front by [`Pool::new`][crate::Pool::new].
    pub min_size: u32,

    /// Hard cap on live connections; also the number of executor workers
    /// the [`Client`][crate::Client] starts.
    pub max_size: u32,

    /// Retire a connection once it has run this many statements.
    /// `0` disables retirement.
    pub max_queries: u64,

    /// Close an idle connection instead of reusing it when it has sat in
    /// the idle queue longer than this. `None` disables the check.
    pub max_idle_time: Option<Duration>,

    /// Default bound on [`Pool::acquire`][crate::Pool::acquire].
    pub connection_timeout: Duration,

    /// Replace a connection older than this on its next checkout.
    /// `None` disables recycling.
    pub pool_recycle: Option<Duration>,

    /// Log every statement at INFO instead of DEBUG.
    pub echo: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            max_queries: 0,
            max_idle_time: None,
            connection_timeout: Duration::from_secs(30),
            pool_recycle: Some(Duration::from_secs(3600)),
            echo: false,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn max_queries(mut self, max_queries: u64) -> Self {
        self.max_queries = max_queries;
        self
    }

    #[must_use]
    pub fn max_idle_time(mut self, max_idle_time: impl Into<Option<Duration>>) -> Self {
        self.max_idle_time = max_idle_time.into();
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_recycle(mut self, recycle: impl Into<Option<Duration>>) -> Self {
        self.pool_recycle = recycle.into();
        self
    }

    #[must_use]
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Advisory settings for an outer server process. Not consumed by the
/// client core.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub charset: String,
    pub autocommit: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            charset: "utf8mb4".into(),
            autocommit: true,
        }
    }
}

/// Top-level configuration for a [`Client`][crate::Client].
///
/// All fields carry serde defaults, so deserializing an empty document
/// yields the same configuration as [`Config::new`]. Parsing the document
/// itself is left to the caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub pool: PoolConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Construct `Self` with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a fresh shared in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            connection: ConnectionConfig::memory(),
            ..Self::default()
        }
    }

    /// Sets the name of the database file.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.connection.database = database.into();
        self
    }

    /// Set the maximum number of connections the pool maintains.
    #[must_use]
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.pool.max_size = max_size;
        self
    }

    /// Set the number of connections opened up front.
    #[must_use]
    pub fn min_size(mut self, min_size: u32) -> Self {
        self.pool.min_size = min_size;
        self
    }

    /// Set the default bound on connection acquisition.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool.connection_timeout = timeout;
        self
    }

    /// Check the configuration for values the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connection.database.is_empty() {
            return Err(Error::Config("database path is empty".into()));
        }

        if self.pool.max_size == 0 {
            return Err(Error::Config("pool max_size must be at least 1".into()));
        }

        if self.pool.min_size > self.pool.max_size {
            return Err(Error::Config(format!(
                "pool min_size ({}) exceeds max_size ({})",
                self.pool.min_size, self.pool.max_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::new().validate().unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = Config::new().max_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn min_size_above_max_size_is_rejected() {
        let config = Config::new().max_size(2).min_size(3);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn memory_databases_are_distinct() {
        let a = ConnectionConfig::memory();
        let b = ConnectionConfig::memory();
        assert_ne!(a.database, b.database);
        assert!(a.uri);
    }
}
