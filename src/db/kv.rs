use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_rusqlite::{Connection, params, rusqlite::OptionalExtension};

use crate::core::visitor::VisitorIdStore;

const VISITOR_ID_KEY: &str = "visitor_id";

pub async fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let key = key.to_string();
    let value = conn
        .call(move |c| {
            c.query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
        .await?;

    Ok(value)
}

/// Insert a value only if the key is absent. Returns the value now stored.
pub async fn get_or_insert(conn: &Connection, key: &str, value: &str) -> Result<String> {
    let key = key.to_string();
    let value = value.to_string();
    let stored = conn
        .call(move |c| {
            let tx = c.transaction()?;
            tx.execute(
                "INSERT INTO client_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO NOTHING",
                params![&key, &value],
            )?;
            let stored: String = tx.query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![&key],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok::<String, tokio_rusqlite::rusqlite::Error>(stored)
        })
        .await?;

    Ok(stored)
}

/// Visitor id kept in the local SQLite database.
pub struct SqliteVisitorStore {
    path: Option<PathBuf>,
    conn: OnceCell<Connection>,
}

impl SqliteVisitorStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            path: None,
            conn: OnceCell::new_with(Some(conn)),
        }
    }

    /// Open (and migrate) the database at `path` on first access.
    pub fn open_lazily(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: OnceCell::new(),
        }
    }

    async fn conn(&self) -> Result<&Connection> {
        self.conn.get_or_try_init(|| open(self.path.clone())).await
    }
}

async fn open(path: Option<PathBuf>) -> Result<Connection> {
    match path {
        Some(path) => super::init(&path).await,
        None => anyhow::bail!("No database configured for the visitor id"),
    }
}

#[async_trait]
impl VisitorIdStore for SqliteVisitorStore {
    async fn load(&self) -> Result<Option<String>> {
        get(self.conn().await?, VISITOR_ID_KEY).await
    }

    async fn save(&self, id: &str) -> Result<String> {
        // Another process may have stored an id first; that one wins.
        get_or_insert(self.conn().await?, VISITOR_ID_KEY, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::visitor::VisitorIdentity;
    use crate::db;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_get_or_insert_keeps_first_value() {
        let conn = db::init_in_memory().await.unwrap();

        assert_eq!(get(&conn, "k").await.unwrap(), None);
        assert_eq!(get_or_insert(&conn, "k", "first").await.unwrap(), "first");
        assert_eq!(get_or_insert(&conn, "k", "second").await.unwrap(), "first");
        assert_eq!(get(&conn, "k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_visitor_id_persists_across_connections() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.db");

        let first = {
            let conn = db::init(&path).await.unwrap();
            VisitorIdentity::new(Arc::new(SqliteVisitorStore::new(conn)))
                .get()
                .await
                .unwrap()
        };

        let conn = db::init(&path).await.unwrap();
        let second = VisitorIdentity::new(Arc::new(SqliteVisitorStore::new(conn)))
            .get()
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_lazy_store_creates_database_on_first_use() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.db");

        let store = SqliteVisitorStore::open_lazily(&path);
        assert!(!path.exists());

        let id = VisitorIdentity::new(Arc::new(store)).get().await.unwrap();
        assert!(path.exists());

        let conn = db::init(&path).await.unwrap();
        assert_eq!(get(&conn, VISITOR_ID_KEY).await.unwrap(), Some(id));
    }

    /// Misses the row on load, as when another process writes it in between.
    struct LateReader(SqliteVisitorStore);

    #[async_trait]
    impl VisitorIdStore for LateReader {
        async fn load(&self) -> Result<Option<String>> {
            Ok(None)
        }

        async fn save(&self, id: &str) -> Result<String> {
            self.0.save(id).await
        }
    }

    #[tokio::test]
    async fn test_concurrently_stored_id_wins() {
        let conn = db::init_in_memory().await.unwrap();
        get_or_insert(&conn, VISITOR_ID_KEY, "stored-by-other-process")
            .await
            .unwrap();

        let store = LateReader(SqliteVisitorStore::new(conn.clone()));
        let id = VisitorIdentity::new(Arc::new(store)).get().await.unwrap();

        assert_eq!(id, "stored-by-other-process");
        assert_eq!(
            get(&conn, VISITOR_ID_KEY).await.unwrap().as_deref(),
            Some("stored-by-other-process")
        );
    }
}
