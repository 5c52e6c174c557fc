use std::path::Path;

use anyhow::{Context, Result};
use tokio_rusqlite::Connection;

pub mod kv;

pub use kv::SqliteVisitorStore;

pub async fn init(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    migrate(&conn).await?;
    Ok(conn)
}

/// In-memory database, used by tests and one-off runs.
pub async fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().await?;
    migrate(&conn).await?;
    Ok(conn)
}

async fn migrate(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await?;

    Ok(())
}
