mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{NotificationChannelType, NotificationConfig};

pub use slack::SlackNotifier;

/// Events surfaced to the user as transient notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A status fetch failed; polling carries on.
    PollFailed {
        job_id: String,
        attempt: u32,
        error: String,
    },
    Completed {
        job_id: String,
        total: u32,
        failed: u32,
    },
    /// The server rejected a scene order.
    ReorderFailed { list_id: String, error: String },
}

/// Trait for notification channel implementations (log, Slack, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: JobEvent) -> Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, event: JobEvent) -> Result<()> {
        match event {
            JobEvent::PollFailed {
                job_id,
                attempt,
                error,
            } => warn!(job_id = %job_id, attempt, error = %error, "Status check failed, retrying"),
            JobEvent::Completed {
                job_id,
                total,
                failed,
            } => info!(job_id = %job_id, total, failed, "Job complete"),
            JobEvent::ReorderFailed { list_id, error } => {
                warn!(list_id = %list_id, error = %error, "Scene order was not saved")
            }
        }
        Ok(())
    }
}

/// Build the notifier selected by config.
///
/// A Slack channel without a webhook falls back to the log.
pub fn create_notifier(config: &NotificationConfig) -> Arc<dyn NotificationChannel> {
    match &config.channel {
        NotificationChannelType::Log => Arc::new(LogNotifier),
        NotificationChannelType::Slack => match config.slack_webhook.as_deref() {
            Some(webhook) if !webhook.is_empty() => {
                Arc::new(SlackNotifier::new(webhook.to_string()))
            }
            _ => {
                warn!("Slack notifications selected without a webhook, logging instead");
                Arc::new(LogNotifier)
            }
        },
    }
}

/// Deliver a notification, logging instead of failing when the channel errors.
pub async fn deliver(channel: &dyn NotificationChannel, event: JobEvent) {
    if let Err(e) = channel.notify(event).await {
        warn!(error = %e, "Failed to deliver notification");
    }
}
