//! In-memory view of the jobs currently being watched.
//!
//! Holds the latest `JobStatus` per job so the `watch` command can report
//! failed checks and a final summary without going back to the server.
//! Nothing here is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::JobStatus;

/// Latest status of one job and when it was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub status: JobStatus,
    pub observed_at: DateTime<Utc>,
    /// Failed status checks since the last good response.
    pub failed_checks: u32,
}

/// Thread-safe store shared via `AppContext`.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<String, TrackedJob>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh status for a job.
    pub async fn update(&self, status: JobStatus) {
        let mut map = self.inner.write().await;
        map.insert(
            status.id.clone(),
            TrackedJob {
                status,
                observed_at: Utc::now(),
                failed_checks: 0,
            },
        );
    }

    /// Count a failed check against a job already being tracked.
    pub async fn record_failure(&self, job_id: &str) {
        let mut map = self.inner.write().await;
        if let Some(job) = map.get_mut(job_id) {
            job.failed_checks += 1;
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<TrackedJob> {
        let map = self.inner.read().await;
        map.get(job_id).cloned()
    }

    pub async fn get_all(&self) -> HashMap<String, TrackedJob> {
        let map = self.inner.read().await;
        map.clone()
    }

    /// Jobs that have not reached 100% yet.
    pub async fn active_count(&self) -> usize {
        let map = self.inner.read().await;
        map.values()
            .filter(|job| job.status.percentage_completed < 100.0)
            .count()
    }

    /// Mean completion across every tracked job, 0 when nothing is tracked.
    pub async fn overall_percentage(&self) -> f64 {
        let map = self.inner.read().await;
        if map.is_empty() {
            return 0.0;
        }
        let sum: f64 = map
            .values()
            .map(|job| job.status.percentage_completed.clamp(0.0, 100.0))
            .sum();
        sum / map.len() as f64
    }
}
