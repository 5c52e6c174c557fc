//! Logging and tracing initialization for reelsync.
//!
//! Structured logging via the `tracing` ecosystem, either as pretty console
//! output or as JSON for machine parsing. Logs go to stderr so command output
//! on stdout stays clean.

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
    /// Suppress all output unless `RUST_LOG` asks for it. Used while the TUI
    /// owns the terminal.
    pub quiet: bool,
}

impl LogConfig {
    fn default_directive(&self) -> String {
        if self.quiet {
            return "off".to_string();
        }
        let level = if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        format!("reelsync={}", level.as_str().to_lowercase())
    }
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once, early in `main()`, after config is loaded. The level can be
/// overridden at runtime via the `RUST_LOG` environment variable.
///
/// # Examples
///
/// ```ignore
/// reelsync::logging::init(LogConfig { verbose: true, ..Default::default() });
/// ```
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}
