//! Tracing Infrastructure
//!
//! Structured logging for cycling runs, built on `tracing` and `tracing-subscriber`:
//! - Structured events with per-cycle fields (`cycle`, `v_min`, `v_end`, ...)
//! - Multiple output formats (pretty, compact, JSON)
//! - Environment-based filtering (`RUST_LOG` overrides the configured level)
//!
//! # Example
//! ```no_run
//! use charge_cycler::{config::RunConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::default();
//! logging::init_from_config(&config)?;
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::RunConfig;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Console log format, selected by `application.log_format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Resolved logging settings for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Console format
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Resolve the `[application]` section.
    pub fn from_run_config(config: &RunConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
        })
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Install the global subscriber described by the run configuration.
///
/// A subscriber installed earlier (by a test harness or an embedding binary)
/// is left in place.
pub fn init_from_config(config: &RunConfig) -> Result<(), String> {
    let tracing_config = TracingConfig::from_run_config(config)?;
    init(&tracing_config);
    Ok(())
}

fn init(config: &TracingConfig) {
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
        OutputFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(layer.with_filter(config.env_filter()))
        .try_init()
    {
        tracing::debug!(error = %e, "Keeping existing tracing subscriber");
    }
}

const LEVELS: [(&str, Level); 5] = [
    ("trace", Level::TRACE),
    ("debug", Level::DEBUG),
    ("info", Level::INFO),
    ("warn", Level::WARN),
    ("error", Level::ERROR),
];

/// Parse a case-insensitive level name.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    LEVELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(level.trim()))
        .map(|(_, parsed)| *parsed)
        .ok_or_else(|| {
            format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                level
            )
        })
}
