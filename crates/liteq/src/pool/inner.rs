use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;

use crate::{pool::CloseEvent, Config, Connection, Error, Result};

use super::connection::{Floating, Idle, Live};

/// The time between the deadline and now, used as the remaining timeout.
///
/// Returns `Error::PoolTimedOut` if the deadline is in the past.
fn deadline_as_timeout(deadline: Instant) -> Result<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .ok_or(Error::PoolTimedOut)
}

pub(crate) struct PoolInner {
    idle_conns: ArrayQueue<Idle>,
    semaphore: tokio::sync::Semaphore,
    size: AtomicU32,
    num_idle: AtomicUsize,
    in_use: AtomicUsize,
    is_closed: AtomicBool,
    on_closed: event_listener::Event,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    total_opened: AtomicU64,
    pub(super) options: Config,
}

impl PoolInner {
    pub(super) fn new_arc(options: Config) -> Arc<Self> {
        Arc::new(Self {
            idle_conns: ArrayQueue::new(options.pool.max_size as usize),
            semaphore: tokio::sync::Semaphore::new(options.pool.max_size as usize),
            size: AtomicU32::new(0),
            num_idle: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            is_closed: AtomicBool::new(false),
            on_closed: event_listener::Event::new(),
            total_acquired: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
            total_opened: AtomicU64::new(0),
            options,
        })
    }

    pub(super) fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub(super) fn num_idle(&self) -> usize {
        // We keep our own count instead of asking the queue: `ArrayQueue::len`
        // waits for the head and tail pointers to settle, which can take a
        // while under churn.
        self.num_idle.load(Ordering::Acquire)
    }

    pub(super) fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub(super) fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::Relaxed)
    }

    pub(super) fn total_released(&self) -> u64 {
        self.total_released.load(Ordering::Relaxed)
    }

    pub(super) fn total_opened(&self) -> u64 {
        self.total_opened.load(Ordering::Relaxed)
    }

    pub(super) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
        self.on_closed.notify(usize::MAX);
    }

    pub(super) fn close_event(&self) -> CloseEvent {
        CloseEvent {
            listener: (!self.is_closed()).then(|| self.on_closed.listen()),
        }
    }

    /// Open the initial `min_size` connections and park them idle.
    ///
    /// Fails fast on the first connection that cannot be opened.
    pub(super) async fn open_initial(self: &Arc<Self>) -> Result<()> {
        let deadline = Instant::now() + self.options.pool.connection_timeout;

        for _ in 0..self.options.pool.min_size {
            let permit = self
                .semaphore
                .try_acquire()
                .map_err(|_| Error::PoolClosed)?;
            let guard = self
                .try_increment_size(permit)
                .map_err(|_| Error::PoolClosed)?;
            let conn = self.connect(deadline, guard).await?;
            self.release(conn);
        }

        Ok(())
    }

    /// Wait for a capacity permit, or for the pool to close, whichever
    /// comes first.
    async fn acquire_permit<'a>(
        self: &'a Arc<Self>,
    ) -> Result<tokio::sync::SemaphorePermit<'a>> {
        let mut close_event = self.close_event();

        tokio::select! {
            biased;

            _ = &mut close_event => Err(Error::PoolClosed),
            permit = self.semaphore.acquire() => permit.map_err(|_| Error::PoolClosed),
        }
    }

    fn pop_idle<'a>(
        self: &'a Arc<Self>,
        permit: tokio::sync::SemaphorePermit<'a>,
    ) -> std::result::Result<Floating<Idle>, tokio::sync::SemaphorePermit<'a>> {
        if let Some(idle) = self.idle_conns.pop() {
            self.num_idle.fetch_sub(1, Ordering::AcqRel);
            Ok(Floating::from_idle(idle, (*self).clone(), permit))
        } else {
            Err(permit)
        }
    }

    pub(super) fn release(&self, floating: Floating<Live>) {
        let Floating { inner: live, guard } = floating;

        if self.idle_conns.push(live.into_idle()).is_err() {
            panic!("BUG: connection queue overflow in release()");
        }

        // The permit goes back only once the connection is visible in the
        // idle queue.
        guard.release_permit();

        self.num_idle.fetch_add(1, Ordering::AcqRel);
    }

    /// Record the end of a borrow, whatever became of the connection.
    pub(super) fn track_released(&self) {
        self.total_released.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }

    /// Try to atomically increment the pool size for a new connection.
    ///
    /// Returns `Err` if the pool is at max capacity already or is closed.
    fn try_increment_size<'a>(
        self: &'a Arc<Self>,
        permit: tokio::sync::SemaphorePermit<'a>,
    ) -> std::result::Result<DecrementSizeGuard, tokio::sync::SemaphorePermit<'a>> {
        match self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                if self.is_closed() {
                    return None;
                }

                size.checked_add(1)
                    .filter(|size| size <= &self.options.pool.max_size)
            }) {
            Ok(_) => Ok(DecrementSizeGuard::from_permit((*self).clone(), permit)),
            Err(_) => Err(permit),
        }
    }

    pub(super) fn should_retire(&self, conn: &Connection) -> bool {
        self.options.pool.max_queries > 0
            && conn.query_count() >= self.options.pool.max_queries
    }

    /// Whether an idle connection must be replaced rather than reused.
    fn should_replace(&self, idle: &Floating<Idle>) -> bool {
        if let Some(recycle) = self.options.pool.pool_recycle {
            if idle.live.raw.created_at().elapsed() > recycle {
                tracing::debug!(
                    target: "liteq::pool",
                    "recycling connection older than pool_recycle"
                );
                return true;
            }
        }

        if let Some(max_idle) = self.options.pool.max_idle_time {
            if idle.since.elapsed() > max_idle {
                tracing::debug!(
                    target: "liteq::pool",
                    "replacing connection idle longer than max_idle_time"
                );
                return true;
            }
        }

        false
    }

    pub(super) async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<Floating<Live>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let deadline = Instant::now() + timeout;

        let acquired = tokio::time::timeout(timeout, async {
            loop {
                // Handles the close event internally.
                let permit = self.acquire_permit().await?;

                match self.pop_idle(permit) {
                    Ok(idle) => {
                        if self.should_replace(&idle) {
                            let Floating { inner: idle, guard } = idle;
                            let _ = idle.live.raw.close().await;
                            // The guard carries over: size stays constant
                            // across the swap.
                            return self.connect(deadline, guard).await;
                        }

                        return Ok(idle.into_live());
                    }
                    Err(permit) => {
                        if let Ok(guard) = self.try_increment_size(permit) {
                            return self.connect(deadline, guard).await;
                        }

                        // The pool is at capacity and the idle queue looked
                        // empty: a returning connection may not have landed
                        // yet. Yield so release tasks can run, then retry.
                        tokio::task::yield_now().await;
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::PoolTimedOut)??;

        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::AcqRel);

        Ok(acquired)
    }

    async fn connect(
        self: &Arc<Self>,
        deadline: Instant,
        guard: DecrementSizeGuard,
    ) -> Result<Floating<Live>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let timeout = deadline_as_timeout(deadline)?;

        match tokio::time::timeout(timeout, Connection::establish(&self.options.connection)).await
        {
            Ok(Ok(raw)) => {
                self.total_opened.fetch_add(1, Ordering::Relaxed);
                Ok(Floating::new_live(raw, guard))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::PoolTimedOut),
        }
    }

    pub(super) async fn close(self: &Arc<Self>) {
        self.mark_closed();

        for permits in 1..=self.options.pool.max_size {
            // Close any currently idle connections.
            while let Some(idle) = self.idle_conns.pop() {
                self.num_idle.fetch_sub(1, Ordering::AcqRel);
                let _ = idle.live.float((*self).clone()).close().await;
            }

            if self.size() == 0 {
                break;
            }

            // Wait for checked-out connections to be returned or closed.
            let _permits = self.semaphore.acquire_many(permits).await;
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// RAII guard for the size slot a connection (or a connection being
/// opened) occupies.
///
/// Dropping it decrements the pool size, so a failed open or a closed
/// connection never leaks capacity.
pub(in crate::pool) struct DecrementSizeGuard {
    pub(crate) pool: Arc<PoolInner>,
    cancelled: bool,
}

impl DecrementSizeGuard {
    /// Create a guard backed by a permit that was previously forgotten at
    /// checkout.
    pub fn new_permit(pool: Arc<PoolInner>) -> Self {
        Self {
            pool,
            cancelled: false,
        }
    }

    pub fn from_permit(pool: Arc<PoolInner>, permit: tokio::sync::SemaphorePermit<'_>) -> Self {
        // take ownership of the permit
        permit.forget();
        Self::new_permit(pool)
    }

    /// Return the permit without decreasing the pool size.
    pub fn release_permit(self) {
        self.pool.semaphore.add_permits(1);
        self.cancel();
    }

    pub fn cancel(mut self) {
        self.cancelled = true;
    }
}

impl Drop for DecrementSizeGuard {
    fn drop(&mut self) {
        if !self.cancelled {
            self.pool.size.fetch_sub(1, Ordering::AcqRel);
            self.pool.semaphore.add_permits(1);
        }
    }
}
