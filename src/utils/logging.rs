//! Logging setup and log-flood protection.
//!
//! `init_logging` installs a `tracing-subscriber` registry with an
//! `EnvFilter` (a set `RUST_LOG` wins over the configured level) and either a
//! human-readable or a JSON formatter.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// # Errors
/// `ConfigError` if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.log_level.as_str().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to initialize logging: {e}")))?;

    info!(level = %level, json = config.json_format, "Logging initialized");
    Ok(())
}

/// Lets one warning through per interval and counts the ones it holds back.
///
/// Used for events a hostile peer can trigger at will, such as admission
/// rejections.
#[derive(Debug)]
pub struct RateLimitedWarn {
    interval: Duration,
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl RateLimitedWarn {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed_since_last)` when a warning should be logged
    /// now, `None` when it should be swallowed.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        let due = self
            .last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}
