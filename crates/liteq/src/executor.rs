//! The priority-ordered query executor.
//!
//! Callers submit statements with a [`Priority`]; a fixed set of workers
//! drains a bounded priority queue and runs each statement on a pooled
//! connection. Higher priorities always dispatch first; within one
//! priority, tasks run in admission order.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{
    error::{Error, Result},
    pool::Pool,
    query_result::QueryResult,
    row::{Row, Value},
};

/// Default capacity of the ingress queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// How long a submission may wait for a queue slot before it is shed.
const ADMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a worker waits for a task before re-checking the running
/// flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Dispatch priority of a submitted statement.
///
/// A statement of lower priority never dispatches while a
/// higher-priority statement is waiting.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

enum Job {
    Execute {
        sql: String,
        params: Vec<Value>,
    },
    ExecuteBatch {
        sql: String,
        batches: Vec<Vec<Value>>,
    },
}

/// One queued statement plus its completion slot.
///
/// The slot is a oneshot sender, so a task can be completed at most once
/// by construction. `seq` is assigned at admission and breaks priority
/// ties in favour of the earliest submission.
struct QueuedTask {
    priority: Priority,
    seq: u64,
    #[allow(dead_code)]
    created_at: Instant,
    job: Job,
    tx: oneshot::Sender<Result<QueryResult>>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // max-heap: highest priority first, then the smallest seq
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ExecutorShared {
    pool: Pool,
    queue: Mutex<BinaryHeap<QueuedTask>>,
    /// Free ingress slots; admission control.
    slots: tokio::sync::Semaphore,
    /// Queued tasks; what workers wait on.
    items: tokio::sync::Semaphore,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    seq: AtomicU64,
    total_executed: AtomicU64,
    total_failed: AtomicU64,
}

/// Schedules statements onto a [`Pool`] through a bounded priority queue.
///
/// Cloning yields another handle to the same executor. Submissions are
/// accepted as soon as the executor exists; nothing runs until
/// [`start`][Self::start] spawns the workers.
#[derive(Clone)]
pub struct QueryExecutor {
    shared: Arc<ExecutorShared>,
}

impl QueryExecutor {
    pub fn new(pool: Pool, max_queue_size: usize) -> QueryExecutor {
        QueryExecutor {
            shared: Arc::new(ExecutorShared {
                pool,
                queue: Mutex::new(BinaryHeap::new()),
                slots: tokio::sync::Semaphore::new(max_queue_size),
                items: tokio::sync::Semaphore::new(0),
                running: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
                total_executed: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn `worker_count` workers. No-op if the executor is already
    /// running.
    pub fn start(&self, worker_count: usize) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut workers = self.shared.workers.lock().unwrap();
        for id in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(worker_loop(shared, id)));
        }
    }

    /// Stop the workers and fail whatever never dispatched.
    ///
    /// In-flight statements run to completion; tasks still queued are
    /// completed with [`Error::ExecutorStopped`] so no submitter is left
    /// hanging. Subsequent submissions fail the same way; a stopped
    /// executor cannot be restarted.
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);

        let workers: Vec<_> = {
            let mut workers = self.shared.workers.lock().unwrap();
            workers.drain(..).collect()
        };

        for worker in workers {
            let _ = worker.await;
        }

        self.shared.slots.close();
        self.shared.items.close();

        let orphaned: Vec<_> = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.drain().collect()
        };

        for task in orphaned {
            let _ = task.tx.send(Err(Error::ExecutorStopped));
        }
    }

    /// Submit one statement and wait for its result.
    pub async fn execute(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        self.submit(
            Job::Execute {
                sql: sql.to_string(),
                params,
            },
            priority,
            timeout,
        )
        .await
    }

    /// Submit one statement to run once per parameter set.
    pub async fn execute_many(
        &self,
        sql: &str,
        batches: Vec<Vec<Value>>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        self.submit(
            Job::ExecuteBatch {
                sql: sql.to_string(),
                batches,
            },
            priority,
            timeout,
        )
        .await
    }

    /// Submit a statement and return its first row, if any.
    pub async fn fetch_one(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Option<Row>> {
        let mut result = self.execute(sql, params, priority, timeout).await?;

        if result.rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(result.rows.remove(0)))
        }
    }

    /// Submit a statement and return all its rows.
    pub async fn fetch_all(
        &self,
        sql: &str,
        params: Vec<Value>,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params, priority, timeout).await?.rows)
    }

    async fn submit(
        &self,
        job: Job,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        let (tx, rx) = oneshot::channel();

        // Admission control: a full queue sheds this submission after the
        // admission window rather than waiting forever.
        let permit =
            match tokio::time::timeout(ADMIT_TIMEOUT, self.shared.slots.acquire()).await {
                Err(_) => return Err(Error::QueueFull),
                Ok(Err(_)) => return Err(Error::ExecutorStopped),
                Ok(Ok(permit)) => permit,
            };
        permit.forget();

        let task = QueuedTask {
            priority,
            seq: self.shared.seq.fetch_add(1, Ordering::AcqRel),
            created_at: Instant::now(),
            job,
            tx,
        };

        self.shared.queue.lock().unwrap().push(task);
        self.shared.items.add_permits(1);

        // The deadline detaches the submitter only: the task stays queued
        // (or in flight) and a worker will still run it.
        match timeout {
            Some(bound) => match tokio::time::timeout(bound, rx).await {
                Err(_) => Err(Error::QueryTimedOut(bound)),
                Ok(Err(_)) => Err(Error::ExecutorStopped),
                Ok(Ok(result)) => result,
            },
            None => rx.await.map_err(|_| Error::ExecutorStopped)?,
        }
    }

    /// Tasks currently queued (admitted, not yet popped by a worker).
    pub fn queue_size(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Whether [`start`][Self::start] has been called and
    /// [`stop`][Self::stop] has not.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// A snapshot of the executor counters.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            queue_size: self.queue_size(),
            workers: self.shared.workers.lock().unwrap().len(),
            total_executed: self.shared.total_executed.load(Ordering::Relaxed),
            total_failed: self.shared.total_failed.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("QueryExecutor")
            .field("queue_size", &stats.queue_size)
            .field("workers", &stats.workers)
            .field("running", &stats.running)
            .finish()
    }
}

/// Cumulative executor counters, read without locking.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub queue_size: usize,
    pub workers: usize,
    pub total_executed: u64,
    pub total_failed: u64,
    pub running: bool,
}

async fn worker_loop(shared: Arc<ExecutorShared>, id: usize) {
    while shared.running.load(Ordering::Acquire) {
        // A bounded wait, so the running flag is polled even when the
        // queue stays empty.
        let permit = match tokio::time::timeout(POLL_INTERVAL, shared.items.acquire()).await {
            Err(_) => continue,
            Ok(Err(_)) => break,
            Ok(Ok(permit)) => permit,
        };
        permit.forget();

        let task = shared.queue.lock().unwrap().pop();

        let Some(task) = task else {
            continue;
        };

        // The slot frees as soon as the task leaves the queue, not when it
        // finishes: queue capacity bounds queued work, not in-flight work.
        shared.slots.add_permits(1);

        run_task(&shared, task, id).await;
    }
}

async fn run_task(shared: &ExecutorShared, task: QueuedTask, worker_id: usize) {
    let result = match shared.pool.acquire().await {
        Ok(conn) => {
            let result = match task.job {
                Job::Execute { sql, params } => conn.execute(&sql, params).await,
                Job::ExecuteBatch { sql, batches } => conn.execute_batch(&sql, batches).await,
            };

            // Deterministic return; the next task may need this
            // connection.
            conn.release().await;

            result
        }
        Err(e) => Err(e),
    };

    match &result {
        Ok(_) => {
            shared.total_executed.fetch_add(1, Ordering::Relaxed);
        }
        Err(error) => {
            shared.total_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "liteq::executor",
                worker = worker_id,
                seq = task.seq,
                %error,
                "query task failed"
            );
        }
    }

    // The submitter may have hit its deadline and gone; its slot then
    // discards the result.
    let _ = task.tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: Priority, seq: u64) -> QueuedTask {
        let (tx, _rx) = oneshot::channel();
        QueuedTask {
            priority,
            seq,
            created_at: Instant::now(),
            job: Job::Execute {
                sql: String::new(),
                params: Vec::new(),
            },
            tx,
        }
    }

    #[test]
    fn priority_levels_are_ordered() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn heap_pops_highest_priority_first() {
        let mut heap = BinaryHeap::new();
        heap.push(task(Priority::Low, 0));
        heap.push(task(Priority::Critical, 3));
        heap.push(task(Priority::Normal, 1));
        heap.push(task(Priority::High, 2));

        let order: Vec<Priority> = std::iter::from_fn(|| heap.pop())
            .map(|t| t.priority)
            .collect();

        assert_eq!(
            order,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Normal,
                Priority::Low
            ]
        );
    }

    #[test]
    fn heap_breaks_ties_by_admission_order() {
        let mut heap = BinaryHeap::new();
        for seq in [5u64, 1, 4, 2, 3, 0] {
            heap.push(task(Priority::Normal, seq));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|t| t.seq).collect();

        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn priority_dominates_admission_order() {
        let mut heap = BinaryHeap::new();
        heap.push(task(Priority::Critical, 10));
        heap.push(task(Priority::Low, 0));

        assert_eq!(heap.pop().unwrap().priority, Priority::Critical);
    }
}
