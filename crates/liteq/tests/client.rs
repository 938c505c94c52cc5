use std::sync::Arc;
use std::time::Duration;

use liteq::{Client, Config, Error, Priority, QueryType, Value};

mod support;

#[tokio::test]
async fn facade_requires_connect_first() {
    let client = Client::new(Config::in_memory());

    assert!(!client.is_connected());
    assert!(matches!(
        client.execute("SELECT 1", vec![]).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        client.fetch_all("SELECT 1", vec![]).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(client.transaction().await, Err(Error::NotConnected)));
    assert!(matches!(client.connection().await, Err(Error::NotConnected)));

    let stats = client.stats();
    assert!(!stats.initialized);
    assert!(stats.pool.is_none());
    assert!(stats.executor.is_none());
}

#[tokio::test]
async fn execute_reports_query_metadata() -> anyhow::Result<()> {
    let mut client = Client::new(Config::in_memory());
    client.connect().await?;

    let created = client
        .execute("CREATE TABLE users (name TEXT NOT NULL)", vec![])
        .await?;
    assert_eq!(created.query_type, QueryType::Create);
    assert!(created.rows.is_empty());

    let inserted = client
        .execute(
            "INSERT INTO users (name) VALUES (?)",
            vec![Value::Text("ada".into())],
        )
        .await?;
    assert_eq!(inserted.query_type, QueryType::Insert);
    assert_eq!(inserted.rows_affected, 1);
    assert_eq!(inserted.last_insert_id, 1);
    assert!(inserted.execution_time > Duration::ZERO);

    let selected = client.execute("SELECT name FROM users", vec![]).await?;
    assert_eq!(selected.query_type, QueryType::Select);
    assert_eq!(selected.rows.len(), 1);
    assert_eq!(selected.rows_affected, 1);
    assert_eq!(selected.rows[0].get_text("name"), Some("ada"));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn execute_many_runs_once_per_parameter_set() -> anyhow::Result<()> {
    let mut client = Client::new(Config::in_memory());
    client.connect().await?;

    client
        .execute("CREATE TABLE users (name TEXT NOT NULL)", vec![])
        .await?;

    let result = client
        .execute_many(
            "INSERT INTO users (name) VALUES (?)",
            vec![
                vec![Value::Text("ada".into())],
                vec![Value::Text("grace".into())],
                vec![Value::Text("edsger".into())],
            ],
        )
        .await?;
    assert_eq!(result.rows_affected, 3);
    assert!(result.rows.is_empty());

    let rows = client
        .fetch_all("SELECT name FROM users ORDER BY rowid", vec![])
        .await?;
    let names: Vec<&str> = rows.iter().filter_map(|r| r.get_text("name")).collect();
    assert_eq!(names, vec!["ada", "grace", "edsger"]);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn fetch_one_returns_first_row_or_none() -> anyhow::Result<()> {
    let mut client = Client::new(Config::in_memory());
    client.connect().await?;

    client
        .execute("CREATE TABLE users (name TEXT NOT NULL)", vec![])
        .await?;

    assert!(client
        .fetch_one("SELECT name FROM users", vec![])
        .await?
        .is_none());

    client
        .execute_many(
            "INSERT INTO users (name) VALUES (?)",
            vec![
                vec![Value::Text("first".into())],
                vec![Value::Text("second".into())],
            ],
        )
        .await?;

    let row = client
        .fetch_one("SELECT name FROM users ORDER BY rowid", vec![])
        .await?
        .expect("a row");
    assert_eq!(row.get_text("name"), Some("first"));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn priorities_and_deadlines_pass_through_the_facade() -> anyhow::Result<()> {
    let mut client = Client::new(Config::in_memory());
    client.connect().await?;

    let row = client
        .fetch_one_with(
            "SELECT 42 AS n",
            vec![],
            Priority::Critical,
            Some(Duration::from_secs(5)),
        )
        .await?
        .expect("a row");
    assert_eq!(row.get_i64("n"), Some(42));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn stats_aggregate_pool_and_executor() -> anyhow::Result<()> {
    let mut client = Client::new(support::config(2, 4));
    client.connect().await?;

    client.execute("SELECT 1", vec![]).await?;

    let stats = client.stats();
    assert!(stats.initialized);

    let pool = stats.pool.as_ref().expect("pool stats");
    assert!(pool.size >= 2);
    assert!(!pool.closed);

    let executor = stats.executor.as_ref().expect("executor stats");
    assert!(executor.running);
    assert_eq!(executor.workers, 4);
    assert_eq!(executor.total_executed, 1);

    // The snapshot serialises, config included.
    let json = serde_json::to_value(&stats)?;
    assert_eq!(json["initialized"], true);
    assert_eq!(json["config"]["pool"]["max_size"], 4);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn close_disconnects_and_connect_restores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = support::file_config(&dir.path().join("client.db"), 1, 2);

    let mut client = Client::new(config);
    client.connect().await?;

    client
        .execute("CREATE TABLE users (name TEXT NOT NULL)", vec![])
        .await?;
    client
        .execute(
            "INSERT INTO users (name) VALUES (?)",
            vec![Value::Text("ada".into())],
        )
        .await?;

    client.close().await;
    assert!(!client.is_connected());
    assert!(matches!(
        client.execute("SELECT 1", vec![]).await,
        Err(Error::NotConnected)
    ));

    // Reconnecting opens a fresh pool over the same database file.
    client.connect().await?;
    let row = client
        .fetch_one("SELECT COUNT(*) AS n FROM users", vec![])
        .await?
        .expect("count row");
    assert_eq!(row.get_i64("n"), Some(1));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn echo_keeps_statements_working() -> anyhow::Result<()> {
    support::init_logging();

    let mut config = support::config(1, 1);
    config.pool.echo = true;

    let mut client = Client::new(config);
    client.connect().await?;

    let row = client
        .fetch_one("SELECT 1 AS n", vec![])
        .await?
        .expect("a row");
    assert_eq!(row.get_i64("n"), Some(1));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_callers_share_one_client() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = support::file_config(&dir.path().join("concurrent.db"), 1, 4);

    let mut client = Client::new(config);
    client.connect().await?;
    client
        .execute("CREATE TABLE hits (task INTEGER NOT NULL)", vec![])
        .await?;

    let client = Arc::new(client);

    let mut handles = Vec::new();
    for task in 0..10i64 {
        let client_for_task = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                client_for_task
                    .execute(
                        "INSERT INTO hits (task) VALUES (?)",
                        vec![Value::Integer(task)],
                    )
                    .await?;
            }
            liteq::Result::Ok(())
        }));
    }

    for handle in futures::future::join_all(handles).await {
        handle??;
    }

    let row = client
        .fetch_one("SELECT COUNT(*) AS n FROM hits", vec![])
        .await?
        .expect("count row");
    assert_eq!(row.get_i64("n"), Some(50));

    let stats = client.stats();
    let pool = stats.pool.expect("pool stats");
    assert!(pool.size <= 4);
    assert_eq!(pool.total_acquired - pool.total_released, pool.in_use as u64);

    Ok(())
}
