//! The bounded connection pool.
//!
//! Opening a SQLite session for every statement is wasteful, and a single
//! session cannot be shared by concurrent callers. The pool owns a
//! bounded set of [`Connection`]s, lends them out one borrower at a time,
//! and enforces the lifecycle policy: lazy growth up to `max_size`,
//! FIFO reuse of idle connections, age-based recycling, and retirement by
//! query count.
//!
//! A capacity semaphore is the sole gate on borrower count. Acquisition
//! is fair: waiters are served first-come, first-serve.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use event_listener::EventListener;
use serde::Serialize;

use self::inner::PoolInner;
use crate::{Config, Result};

mod connection;
mod inner;

pub use self::connection::PoolConnection;

/// An asynchronous pool of database connections.
///
/// Create a pool with [`Pool::new`], then call [`Pool::acquire`] to borrow
/// a connection; when the [`PoolConnection`] is dropped it returns to the
/// pool for reuse.
///
/// The pool will not exceed its configured `max_size`; when every
/// connection is checked out, `acquire` waits until one becomes available
/// or its timeout elapses.
///
/// `Pool` is `Send`, `Sync` and `Clone`: it is a reference-counted handle
/// to shared state, intended to be created once and shared with all tasks
/// for the lifetime of the program. Call [`close().await`][Pool::close]
/// during shutdown to drain it deterministically; this also wakes every
/// task waiting in `acquire`.
pub struct Pool(pub(crate) Arc<PoolInner>);

impl Pool {
    /// Validate the configuration, open `min_size` connections up front,
    /// and park them idle. Fails fast if any initial connection cannot be
    /// opened.
    pub async fn new(config: Config) -> Result<Pool> {
        config.validate()?;

        let mut options = config;
        if options.pool.echo {
            options
                .connection
                .log_settings
                .log_statements(log::LevelFilter::Info);
        }

        let inner = PoolInner::new_arc(options);
        inner.open_initial().await?;
        Ok(Pool(inner))
    }

    /// Borrow a connection, waiting at most the configured
    /// `connection_timeout`.
    ///
    /// The borrowed connection may be freshly opened: the pool grows
    /// lazily while under `max_size`, and an idle connection past its
    /// recycle age is replaced before it is handed out.
    pub async fn acquire(&self) -> Result<PoolConnection> {
        self.acquire_timeout(self.0.options.pool.connection_timeout)
            .await
    }

    /// Borrow a connection, waiting at most `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PoolConnection> {
        let shared = self.0.clone();
        shared.acquire(timeout).await.map(|conn| conn.reattach())
    }

    /// Shut down the pool, immediately waking all tasks waiting for a
    /// connection.
    ///
    /// Any waiting or subsequent [`Pool::acquire`] call returns
    /// [`Error::PoolClosed`][crate::Error::PoolClosed]. Idle connections
    /// are closed right away; checked-out connections are closed as they
    /// come back. This method waits for all of them.
    ///
    /// `close()` may safely be called and awaited on multiple handles
    /// concurrently.
    pub async fn close(&self) {
        self.0.close().await
    }

    /// Returns `true` if [`close()`][Pool::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// A future that resolves when [`Pool::close`] is called. Resolves
    /// immediately if the pool is already closed.
    pub fn close_event(&self) -> CloseEvent {
        self.0.close_event()
    }

    /// The number of live connections, idle and lent both.
    pub fn size(&self) -> u32 {
        self.0.size()
    }

    /// The number of idle connections.
    pub fn num_idle(&self) -> usize {
        self.0.num_idle()
    }

    /// A snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.0.size(),
            in_use: self.0.in_use_count(),
            idle: self.0.num_idle(),
            total_acquired: self.0.total_acquired(),
            total_released: self.0.total_released(),
            total_opened: self.0.total_opened(),
            closed: self.0.is_closed(),
        }
    }
}

/// Returns a new [Pool] tied to the same shared state.
impl Clone for Pool {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Pool")
            .field("size", &self.0.size())
            .field("num_idle", &self.0.num_idle())
            .field("is_closed", &self.0.is_closed())
            .finish()
    }
}

/// Cumulative pool counters, read without locking.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub in_use: usize,
    pub idle: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_opened: u64,
    pub closed: bool,
}

/// A future that resolves when the pool is closed.
///
/// See [`Pool::close_event`] for details.
pub struct CloseEvent {
    pub(super) listener: Option<EventListener>,
}

impl Future for CloseEvent {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(listener) = &mut self.listener {
            std::task::ready!(Pin::new(listener).poll(cx));
        }

        // `EventListener` doesn't like being polled after it yields, so
        // once we get our close event we fuse the future to immediately
        // return.
        self.listener = None;

        Poll::Ready(())
    }
}

#[test]
#[allow(dead_code)]
fn assert_pool_traits() {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_clone<T: Clone>() {}

    fn assert_pool() {
        assert_send_sync::<Pool>();
        assert_clone::<Pool>();
    }
}
