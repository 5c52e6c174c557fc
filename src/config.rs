use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Config file read from the working directory unless `REELSYNC_CONFIG` points elsewhere.
pub const CONFIG_FILE: &str = "reelsync.toml";
pub const ENV_PREFIX: &str = "REELSYNC_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub staging_poll_interval_secs: u64,
    pub submission_poll_interval_secs: u64,
    /// No per-request timeout unless set; a hung request stalls that poll iteration.
    pub request_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
    pub reorder: ReorderConfig,
    pub notifications: NotificationConfig,
    pub database_path: PathBuf,
    pub simulator: SimulatorConfig,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8787".to_string(),
            api_token: None,
            staging_poll_interval_secs: 15,
            submission_poll_interval_secs: 2,
            request_timeout_secs: None,
            retry: RetryPolicy::default(),
            reorder: ReorderConfig::default(),
            notifications: NotificationConfig::default(),
            database_path: PathBuf::from("reelsync.db"),
            simulator: SimulatorConfig::default(),
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `REELSYNC_*` variables and finally CLI flags.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `REELSYNC_RETRY__MAX_CONSECUTIVE_FAILURES=5`.
    pub fn new<T: Serialize>(cli_args: Option<&T>) -> Result<Self> {
        let path = std::env::var("REELSYNC_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::load(Toml::file(path), cli_args)
    }

    fn load<T: Serialize>(file: figment::providers::Data<Toml>, cli_args: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        let config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }
        if self.staging_poll_interval_secs == 0 || self.submission_poll_interval_secs == 0 {
            anyhow::bail!("poll intervals must be at least one second");
        }
        Ok(())
    }

    pub fn staging_poll_interval(&self) -> Duration {
        Duration::from_secs(self.staging_poll_interval_secs)
    }

    pub fn submission_poll_interval(&self) -> Duration {
        Duration::from_secs(self.submission_poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// How the poller reacts to failed status fetches.
///
/// The default retries forever at the fixed poll interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_consecutive_failures: Option<u32>,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// Wait the regular poll interval after a failure.
    #[default]
    Fixed,
    /// Double the wait after each consecutive failure, capped at `max_secs`.
    Exponential { max_secs: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReorderFailurePolicy {
    /// Leave the optimistic order on screen.
    #[default]
    Keep,
    /// Restore the last order the server confirmed.
    Revert,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReorderConfig {
    pub failure_policy: ReorderFailurePolicy,
    pub guard_while_persisting: bool,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            failure_policy: ReorderFailurePolicy::Keep,
            guard_while_persisting: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannelType {
    #[default]
    Log,
    Slack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatorConfig {
    pub bind: SocketAddr,
    /// Work units a simulated job advances per status request.
    pub units_per_poll: u32,
    /// Fail every Nth status request with a 503.
    pub fail_every: Option<u32>,
    /// Status requests a submission needs before it reports success.
    pub submission_polls: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            units_per_poll: 2,
            fail_every: None,
            submission_polls: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Flags {
        #[serde(skip_serializing_if = "Option::is_none")]
        api_base_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verbose: Option<bool>,
    }

    #[test]
    fn defaults_match_observed_intervals() {
        let config = AppConfig::default();
        assert_eq!(config.staging_poll_interval(), Duration::from_secs(15));
        assert_eq!(config.submission_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.retry.max_consecutive_failures, None);
        assert_eq!(config.reorder.failure_policy, ReorderFailurePolicy::Keep);
    }

    #[test]
    fn file_values_and_flags_are_layered() {
        let file = Toml::string(
            r#"
            api_base_url = "http://from-file:1"
            staging_poll_interval_secs = 30

            [reorder]
            failure_policy = "revert"

            [retry]
            max_consecutive_failures = 4
            backoff = { kind = "exponential", max_secs = 60 }
            "#,
        );
        let flags = Flags {
            api_base_url: Some("http://from-flag:2".to_string()),
            verbose: None,
        };

        let config = AppConfig::load(file, Some(&flags)).unwrap();

        assert_eq!(config.api_base_url, "http://from-flag:2");
        assert_eq!(config.staging_poll_interval_secs, 30);
        assert_eq!(config.reorder.failure_policy, ReorderFailurePolicy::Revert);
        assert!(config.reorder.guard_while_persisting);
        assert_eq!(config.retry.max_consecutive_failures, Some(4));
        assert_eq!(config.retry.backoff, Backoff::Exponential { max_secs: 60 });
        assert!(!config.verbose);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let file = Toml::string("submission_poll_interval_secs = 0");
        assert!(AppConfig::load(file, None::<&Flags>).is_err());
    }

    #[test]
    fn config_renders_as_toml() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("staging_poll_interval_secs = 15"));
        assert!(rendered.contains("[simulator]"));
    }
}
