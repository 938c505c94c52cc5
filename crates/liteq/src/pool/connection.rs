use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use crate::{Connection, Result};

use super::inner::{DecrementSizeGuard, PoolInner};

/// A connection checked out from a [`Pool`][crate::Pool].
///
/// Returned to the pool on drop (or retired, if it has reached the pool's
/// `max_queries` bound). Use [`release`][Self::release] to return it
/// deterministically, or [`close`][Self::close] to discard it.
pub struct PoolConnection {
    live: Option<Live>,
    pool: Arc<PoolInner>,
}

pub(super) struct Live {
    pub(super) raw: Connection,
}

pub(super) struct Idle {
    pub(super) live: Live,
    pub(super) since: Instant,
}

/// RAII wrapper for connections being handled by functions that may drop
/// them.
pub(super) struct Floating<C> {
    pub(super) inner: C,
    pub(super) guard: DecrementSizeGuard,
}

const EXPECT_MSG: &str = "BUG: inner connection already taken!";

impl Debug for PoolConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection").finish()
    }
}

impl Deref for PoolConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.live.as_ref().expect(EXPECT_MSG).raw
    }
}

impl PoolConnection {
    /// Return the connection to the pool and wait until it has landed.
    ///
    /// Dropping the connection does the same thing from a spawned task;
    /// this method is for callers that need the connection to be visible
    /// in the pool before proceeding.
    pub async fn release(mut self) {
        if let Some(floating) = self.take_floating() {
            floating.return_to_pool().await;
        }
    }

    /// Close this connection, allowing the pool to open a replacement.
    ///
    /// The capacity slot is held for the duration so the pool will not
    /// exceed `max_size`.
    ///
    /// The returned future **must** be awaited to ensure the connection is
    /// fully closed.
    #[must_use = "futures returned by `PoolConnection::close` must be awaited"]
    pub async fn close(mut self) -> Result<()> {
        match self.take_floating() {
            Some(floating) => {
                floating.guard.pool.track_released();
                floating.close().await
            }
            None => Ok(()),
        }
    }

    fn take_floating(&mut self) -> Option<Floating<Live>> {
        self.live.take().map(|live| live.float(self.pool.clone()))
    }

    /// Used by the drop handler: build the return future before moving
    /// into the spawned task, in case that task is never polled.
    fn return_to_pool(&mut self) -> impl Future<Output = ()> + Send + 'static {
        let floating = self.take_floating();

        async move {
            if let Some(floating) = floating {
                floating.return_to_pool().await;
            }
        }
    }
}

/// Returns the connection to the [`Pool`][crate::Pool] it was checked out
/// from.
impl Drop for PoolConnection {
    fn drop(&mut self) {
        if self.live.is_some() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(self.return_to_pool());
                }
                Err(_) => {
                    // No runtime to return on. Dropping the connection
                    // signals its worker thread to close the session.
                    self.live.take();
                }
            }
        }
    }
}

impl Live {
    pub(super) fn float(self, pool: Arc<PoolInner>) -> Floating<Self> {
        Floating {
            inner: self,
            // recreate the guard from the permit forgotten at checkout
            guard: DecrementSizeGuard::new_permit(pool),
        }
    }

    pub(super) fn into_idle(self) -> Idle {
        Idle {
            live: self,
            since: Instant::now(),
        }
    }
}

impl Floating<Live> {
    pub(super) fn new_live(raw: Connection, guard: DecrementSizeGuard) -> Self {
        Self {
            inner: Live { raw },
            guard,
        }
    }

    pub(super) fn reattach(self) -> PoolConnection {
        let Floating { inner, guard } = self;

        let pool = Arc::clone(&guard.pool);

        guard.cancel();
        PoolConnection {
            live: Some(inner),
            pool,
        }
    }

    pub(super) async fn return_to_pool(self) {
        let pool = Arc::clone(&self.guard.pool);
        pool.track_released();

        if pool.is_closed() {
            let _ = self.close().await;
            return;
        }

        // A transaction the borrower left open would poison reuse; queue a
        // rollback before the connection becomes visible to others.
        if self.inner.raw.in_transaction() && self.inner.raw.start_rollback().is_err() {
            let _ = self.close().await;
            return;
        }

        if pool.should_retire(&self.inner.raw) {
            tracing::debug!(
                target: "liteq::pool",
                query_count = self.inner.raw.query_count(),
                "retiring connection at max_queries"
            );
            let _ = self.close().await;
            return;
        }

        pool.release(self);
    }

    pub(super) async fn close(self) -> Result<()> {
        self.inner.raw.close().await
        // the guard drops here, freeing the size slot and permit
    }
}

impl Floating<Idle> {
    pub(super) fn from_idle(
        idle: Idle,
        pool: Arc<PoolInner>,
        permit: tokio::sync::SemaphorePermit<'_>,
    ) -> Self {
        Self {
            inner: idle,
            guard: DecrementSizeGuard::from_permit(pool, permit),
        }
    }

    pub(super) fn into_live(self) -> Floating<Live> {
        Floating {
            inner: self.inner.live,
            guard: self.guard,
        }
    }
}

impl<C> Deref for Floating<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
