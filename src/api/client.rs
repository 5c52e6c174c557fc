//! HTTP client for the backend API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::protocol::{CreateJobRequest, ErrorBody, PersistOrderRequest};
use crate::config::AppConfig;
use crate::core::models::{JobStatus, Scene, SubmissionStatus};
use crate::core::poller::StatusSource;
use crate::core::reorder::OrderStore;

/// Error returned by API client operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid API base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

/// Client for the property/video backend.
#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot carry a path".to_string(),
            });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base,
            token,
            client: builder.build()?,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.api_base_url,
            config.api_token.clone(),
            config.request_timeout(),
        )
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        self.send_json(self.request(Method::GET, &["jobs", job_id, "status"]))
            .await
    }

    pub async fn create_job(&self, total: u32) -> Result<JobStatus, ApiError> {
        self.send_json(
            self.request(Method::POST, &["jobs"])
                .json(&CreateJobRequest { total }),
        )
        .await
    }

    pub async fn submission_status(&self, submission_id: &str) -> Result<SubmissionStatus, ApiError> {
        self.send_json(self.request(Method::GET, &["submissions", submission_id]))
            .await
    }

    pub async fn list_scenes(&self, video_id: &str) -> Result<Vec<Scene>, ApiError> {
        self.send_json(self.request(Method::GET, &["videos", video_id, "scenes"]))
            .await
    }

    /// Replace the server's scene order for `video_id`.
    pub async fn save_scene_order(
        &self,
        video_id: &str,
        ordered_ids: &[String],
    ) -> Result<(), ApiError> {
        let body = PersistOrderRequest {
            ordered_ids: ordered_ids.to_vec(),
        };
        let response = self
            .request(Method::PUT, &["videos", video_id, "scenes", "order"])
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let url = self.url(segments);
        debug!(%method, %url, "API request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::check_status(request.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                } else {
                    text
                }
            });

        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl StatusSource<JobStatus> for ApiClient {
    async fn fetch_status(&self, job_id: &str) -> anyhow::Result<JobStatus> {
        Ok(self.job_status(job_id).await?)
    }
}

#[async_trait]
impl StatusSource<SubmissionStatus> for ApiClient {
    async fn fetch_status(&self, submission_id: &str) -> anyhow::Result<SubmissionStatus> {
        Ok(self.submission_status(submission_id).await?)
    }
}

#[async_trait]
impl OrderStore for ApiClient {
    async fn persist_order(&self, list_id: &str, ordered_ids: &[String]) -> anyhow::Result<()> {
        Ok(self.save_scene_order(list_id, ordered_ids).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_extend_base_path_and_escape_ids() {
        let client = ApiClient::new("http://api.example.com/v1/", None, None).unwrap();
        assert_eq!(
            client.url(&["jobs", "a b/c", "status"]).as_str(),
            "http://api.example.com/v1/jobs/a%20b%2Fc/status"
        );

        let bare = ApiClient::new("http://api.example.com", None, None).unwrap();
        assert_eq!(
            bare.url(&["videos", "v1", "scenes"]).as_str(),
            "http://api.example.com/videos/v1/scenes"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            ApiClient::new("not a url", None, None),
            Err(ApiError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            ApiClient::new("mailto:someone@example.com", None, None),
            Err(ApiError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn not_found_detection() {
        let err = ApiError::Status {
            status: 404,
            message: "job not found".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Server returned 404: job not found");
    }
}
