//! Tracing setup and rate limiting for ripper progress output.
//!
//! Every event is filtered under the `discd` target. `RUST_LOG` replaces the
//! default filter entirely.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line, for journald and log shippers. Closed `rip`
    /// spans are included so each rip's duration is recorded.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            format: if config.json_logs {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            verbose: config.verbose,
        }
    }
}

impl LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "discd=debug"
        } else {
            "discd=info"
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

/// Decides which ripper progress lines are worth logging.
///
/// Rippers print progress many times per second. A line goes through when
/// the stage changes or when `interval` has passed since the last one.
/// Owned by a single progress reader, so no locking.
#[derive(Debug)]
pub struct ProgressLog {
    interval: Duration,
    last: Option<(Instant, String)>,
}

impl ProgressLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_log(&mut self, stage: &str) -> bool {
        self.should_log_at(stage, Instant::now())
    }

    fn should_log_at(&mut self, stage: &str, now: Instant) -> bool {
        let due = match &self.last {
            None => true,
            Some((at, last_stage)) => {
                last_stage != stage || now.saturating_duration_since(*at) >= self.interval
            }
        };

        if due {
            self.last = Some((now, stage.to_string()));
        }
        due
    }
}
