//! Tracing setup.
//!
//! Stage threads are named `stackline-<stage>`, and every event inside a
//! stage carries the `stage` span with the pipeline's run id, so thread
//! names are on by default. `RUST_LOG` wins over the configured level.
//!
//! # Example
//! ```no_run
//! use stackline::{config::PipelineConfig, telemetry};
//!
//! let config = PipelineConfig::load_from("config/stackline.toml")?;
//! telemetry::init_from_config(&config)?;
//! tracing::info!("Application started");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::PipelineConfig;
use stackline_core::{PipelineError, PipelineResult};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log line layout, `application.log_format` in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(PipelineError::Configuration(format!(
                "unknown log format '{}' (expected pretty, compact or json)",
                other
            ))),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: LogFormat,
    /// Log stage span open/close, useful when chasing shutdown order
    pub span_events: bool,
    /// Source file and line on every event
    pub source_location: bool,
    /// Emitting thread name, i.e. the stage
    pub thread_names: bool,
    /// Colour codes; only the pretty layout uses them
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            span_events: false,
            source_location: false,
            thread_names: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Settings from the `[application]` section.
    pub fn from_pipeline_config(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            level: parse_level(&config.application.log_level)?,
            format: config.application.log_format.parse()?,
            ..Default::default()
        })
    }

    /// Defaults at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the line layout.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Log span open/close.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Colour output for the pretty layout.
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }
}

/// Install the global subscriber from a [`PipelineConfig`].
pub fn init_from_config(config: &PipelineConfig) -> PipelineResult<()> {
    init(TelemetryConfig::from_pipeline_config(config)?)
}

/// Install the global subscriber.
///
/// A second call is a no-op, so tests and embedding applications can call
/// it freely.
pub fn init(config: TelemetryConfig) -> PipelineResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));
    let spans = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(spans)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_names(config.thread_names);
    let layer = match config.format {
        LogFormat::Pretty => base.pretty().with_ansi(config.ansi).with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Json => base.json().with_filter(filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(PipelineError::Configuration(format!(
            "cannot install tracing subscriber: {}",
            e
        ))),
    }
}

fn parse_level(level: &str) -> PipelineResult<Level> {
    Level::from_str(level.trim()).map_err(|_| {
        PipelineError::Configuration(format!(
            "unknown log level '{}' (expected trace, debug, info, warn or error)",
            level
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_ignores_case() {
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_level("Debug").unwrap(), Level::DEBUG);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_settings_follow_application_section() {
        let mut config = PipelineConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = "json".to_string();

        let telemetry = TelemetryConfig::from_pipeline_config(&config).unwrap();
        assert_eq!(telemetry.level, Level::DEBUG);
        assert_eq!(telemetry.format, LogFormat::Json);
        assert!(telemetry.thread_names);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let mut config = PipelineConfig::default();
        config.application.log_format = "xml".to_string();
        assert!(matches!(
            TelemetryConfig::from_pipeline_config(&config),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = TelemetryConfig::new(Level::ERROR)
            .with_format(LogFormat::Compact)
            .with_ansi(false);
        init(config.clone()).unwrap();
        init(config).unwrap();
    }
}
