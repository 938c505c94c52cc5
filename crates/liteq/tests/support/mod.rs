#![allow(dead_code)]

use liteq::{Config, Pool, PoolConnection, Result};

/// Route statement logging through env_logger so `RUST_LOG=liteq=debug`
/// shows it during test runs.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Configuration for a fresh shared in-memory database with the given
/// pool bounds.
pub fn config(min_size: u32, max_size: u32) -> Config {
    let mut config = Config::in_memory();
    config.pool.min_size = min_size;
    config.pool.max_size = max_size;
    config
}

pub async fn pool(min_size: u32, max_size: u32) -> Result<Pool> {
    init_logging();
    Pool::new(config(min_size, max_size)).await
}

/// Configuration for a file-backed database. Used when a test needs
/// several connections writing concurrently: file databases serialise
/// writers through the busy handler, which shared-cache in-memory
/// databases do not.
pub fn file_config(path: &std::path::Path, min_size: u32, max_size: u32) -> Config {
    let mut config = Config::new().database(path.to_str().unwrap());
    config.pool.min_size = min_size;
    config.pool.max_size = max_size;
    config
}

/// Create the table integration tests insert into.
pub async fn create_label_table(conn: &PoolConnection) -> Result<()> {
    conn.execute("CREATE TABLE done (label TEXT NOT NULL)", vec![])
        .await?;
    Ok(())
}
