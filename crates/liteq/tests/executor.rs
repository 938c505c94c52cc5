use std::time::{Duration, Instant};

use liteq::{Error, Pool, Priority, QueryExecutor, Value};
use tokio::time::sleep;

mod support;

/// Spawn a submission and wait until it is visible in the queue, so
/// admission order (and therefore `seq`) is deterministic.
async fn spawn_insert(
    executor: &QueryExecutor,
    label: &str,
    priority: Priority,
) -> tokio::task::JoinHandle<liteq::Result<liteq::QueryResult>> {
    let expected = executor.queue_size() + 1;
    let executor_for_task = executor.clone();
    let label = label.to_string();

    let handle = tokio::spawn(async move {
        executor_for_task
            .execute(
                "INSERT INTO done (label) VALUES (?)",
                vec![Value::Text(label)],
                priority,
                None,
            )
            .await
    });

    while executor.queue_size() < expected {
        tokio::task::yield_now().await;
    }

    handle
}

async fn completed_labels(pool: &Pool) -> anyhow::Result<Vec<String>> {
    let conn = pool.acquire().await?;
    let rows = conn
        .fetch_all("SELECT label FROM done ORDER BY rowid", vec![])
        .await?;
    conn.release().await;

    Ok(rows
        .iter()
        .map(|row| row.get_text("label").unwrap().to_string())
        .collect())
}

#[tokio::test]
async fn higher_priorities_dispatch_first() -> anyhow::Result<()> {
    let pool = support::pool(1, 1).await?;

    let conn = pool.acquire().await?;
    support::create_label_table(&conn).await?;
    conn.release().await;

    let executor = QueryExecutor::new(pool.clone(), 100);

    // Queue everything before any worker exists, then let a single
    // worker drain it.
    let mut handles = Vec::new();
    for (label, priority) in [
        ("A", Priority::Low),
        ("B", Priority::Normal),
        ("C", Priority::High),
        ("D", Priority::Critical),
    ] {
        handles.push(spawn_insert(&executor, label, priority).await);
    }

    executor.start(1);

    for handle in handles {
        handle.await??;
    }

    assert_eq!(completed_labels(&pool).await?, vec!["D", "C", "B", "A"]);

    executor.stop().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn same_priority_dispatches_in_admission_order() -> anyhow::Result<()> {
    let pool = support::pool(1, 1).await?;

    let conn = pool.acquire().await?;
    support::create_label_table(&conn).await?;
    conn.release().await;

    let executor = QueryExecutor::new(pool.clone(), 100);

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(spawn_insert(&executor, &i.to_string(), Priority::Normal).await);
    }

    executor.start(1);

    for handle in handles {
        handle.await??;
    }

    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(completed_labels(&pool).await?, expected);

    executor.stop().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn full_queue_sheds_submissions() -> anyhow::Result<()> {
    let pool = support::pool(1, 1).await?;

    let conn = pool.acquire().await?;
    support::create_label_table(&conn).await?;
    conn.release().await;

    // No workers: nothing drains the queue.
    let executor = QueryExecutor::new(pool.clone(), 2);

    let first = spawn_insert(&executor, "x", Priority::Normal).await;
    let second = spawn_insert(&executor, "y", Priority::Normal).await;

    let started = Instant::now();
    let res = executor
        .execute("SELECT 1", vec![], Priority::Normal, None)
        .await;

    assert!(matches!(res, Err(Error::QueueFull)));
    assert!(started.elapsed() >= Duration::from_millis(900));

    // Stopping completes the still-queued tasks with a cancellation
    // error.
    executor.stop().await;

    assert!(matches!(first.await?, Err(Error::ExecutorStopped)));
    assert!(matches!(second.await?, Err(Error::ExecutorStopped)));

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn deadline_detaches_the_submitter_but_not_the_task() -> anyhow::Result<()> {
    let pool = support::pool(1, 1).await?;

    let conn = pool.acquire().await?;
    support::create_label_table(&conn).await?;
    conn.release().await;

    let executor = QueryExecutor::new(pool.clone(), 100);
    executor.start(1);

    // Hold the pool's only connection so the task cannot run yet.
    let held = pool.acquire().await?;

    let started = Instant::now();
    let res = executor
        .execute(
            "INSERT INTO done (label) VALUES (?)",
            vec![Value::Text("late".into())],
            Priority::Normal,
            Some(Duration::from_millis(100)),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(res, Err(Error::QueryTimedOut(_))));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));

    // The worker still runs the statement once a connection frees up; the
    // result is simply discarded.
    held.release().await;
    sleep(Duration::from_millis(400)).await;

    assert_eq!(completed_labels(&pool).await?, vec!["late"]);

    let stats = executor.stats();
    assert_eq!(stats.total_executed, 1);

    executor.stop().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn failures_complete_the_submitter_and_spare_the_worker() -> anyhow::Result<()> {
    let pool = support::pool(1, 2).await?;

    let executor = QueryExecutor::new(pool.clone(), 100);
    executor.start(2);

    let res = executor
        .execute("THIS IS NOT SQL", vec![], Priority::Normal, None)
        .await;
    assert!(matches!(res, Err(Error::Query(_))));

    // The worker survives and keeps serving queries.
    let row = executor
        .fetch_one("SELECT 7 AS n", vec![], Priority::Normal, None)
        .await?
        .expect("one row");
    assert_eq!(row.get_i64("n"), Some(7));

    let stats = executor.stats();
    assert_eq!(stats.total_executed, 1);
    assert_eq!(stats.total_failed, 1);
    assert!(stats.running);
    assert_eq!(stats.workers, 2);

    executor.stop().await;
    assert!(!executor.is_running());
    assert_eq!(executor.stats().workers, 0);

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn executor_handles_are_shared() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = Pool::new(support::file_config(&dir.path().join("exec.db"), 1, 4)).await?;

    let conn = pool.acquire().await?;
    support::create_label_table(&conn).await?;
    conn.release().await;

    let executor = QueryExecutor::new(pool.clone(), 1000);
    executor.start(4);

    let mut handles = Vec::new();
    for i in 0..40 {
        let executor_for_task = executor.clone();
        handles.push(tokio::spawn(async move {
            executor_for_task
                .execute(
                    "INSERT INTO done (label) VALUES (?)",
                    vec![Value::Text(format!("task-{i}"))],
                    Priority::Normal,
                    None,
                )
                .await
        }));
    }

    for handle in futures::future::join_all(handles).await {
        handle??;
    }

    assert_eq!(completed_labels(&pool).await?.len(), 40);
    assert_eq!(executor.stats().total_executed, 40);

    executor.stop().await;
    pool.close().await;
    Ok(())
}
