use super::{JobEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &JobEvent) -> serde_json::Value {
        let (header, fields, detail) = match event {
            JobEvent::PollFailed {
                job_id,
                attempt,
                error,
            } => (
                "Status Check Failed",
                vec![
                    format!("*Job ID:*\n`{}`", short_id(job_id)),
                    format!("*Attempt:*\n{}", attempt),
                ],
                Some(error.as_str()),
            ),
            JobEvent::Completed {
                job_id,
                total,
                failed,
            } => (
                "Job Complete",
                vec![
                    format!("*Job ID:*\n`{}`", short_id(job_id)),
                    format!("*Units:*\n{} ({} failed)", total, failed),
                ],
                None,
            ),
            JobEvent::ReorderFailed { list_id, error } => (
                "Scene Order Not Saved",
                vec![format!("*Video:*\n`{}`", list_id)],
                Some(error.as_str()),
            ),
        };

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": { "type": "plain_text", "text": header, "emoji": true }
            }),
            json!({
                "type": "section",
                "fields": fields
                    .into_iter()
                    .map(|text| json!({ "type": "mrkdwn", "text": text }))
                    .collect::<Vec<_>>()
            }),
        ];

        if let Some(error) = detail {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n```{}```", error) }
            }));
        }

        json!({ "blocks": blocks })
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: JobEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
