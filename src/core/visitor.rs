//! Anonymous visitor identifier.
//!
//! Created once, persisted, and reused for every later run. The identity is
//! resolved lazily on first access and cached for the life of the process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use uuid::Uuid;

/// Backing storage for the visitor id.
#[async_trait]
pub trait VisitorIdStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    /// Store `id` unless an id is already present. Returns the stored id.
    async fn save(&self, id: &str) -> Result<String>;
}

/// Process-wide accessor for the visitor id.
#[derive(Clone)]
pub struct VisitorIdentity {
    store: Arc<dyn VisitorIdStore>,
    cell: Arc<OnceCell<String>>,
}

impl VisitorIdentity {
    pub fn new(store: Arc<dyn VisitorIdStore>) -> Self {
        Self {
            store,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Return the stored id, creating and storing a new one if none exists.
    pub async fn get(&self) -> Result<String> {
        let id = self
            .cell
            .get_or_try_init(|| load_or_create(self.store.as_ref()))
            .await?;
        Ok(id.clone())
    }
}

async fn load_or_create(store: &dyn VisitorIdStore) -> Result<String> {
    if let Some(existing) = store.load().await? {
        if !existing.trim().is_empty() {
            debug!(visitor_id = %existing, "Loaded visitor id");
            return Ok(existing);
        }
    }

    let created = Uuid::now_v7().to_string();
    let stored = store
        .save(&created)
        .await
        .context("Failed to persist visitor id")?;
    if stored == created {
        info!(visitor_id = %stored, "Created visitor id");
    } else {
        debug!(visitor_id = %stored, "Visitor id was stored concurrently, reusing it");
    }
    Ok(stored)
}

/// Stores the id as the sole contents of a text file.
pub struct FileVisitorStore {
    path: PathBuf,
}

impl FileVisitorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VisitorIdStore for FileVisitorStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn save(&self, id: &str) -> Result<String> {
        if let Some(existing) = self.load().await? {
            if !existing.is_empty() {
                return Ok(existing);
            }
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, id)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(id.to_string())
    }
}

#[derive(Default)]
pub struct MemoryVisitorStore {
    value: Mutex<Option<String>>,
}

#[async_trait]
impl VisitorIdStore for MemoryVisitorStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().await.clone())
    }

    async fn save(&self, id: &str) -> Result<String> {
        let mut value = self.value.lock().await;
        Ok(value.get_or_insert_with(|| id.to_string()).clone())
    }
}
