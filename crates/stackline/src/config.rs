//! Pipeline configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `STACKLINE_`, nested keys
//!    separated by `__` (e.g. `STACKLINE_POOL__BUFFER_COUNT=8`)
//!
//! Every section has serde defaults, so an empty file yields a working
//! configuration. [`PipelineConfig::validate`] runs after extraction and
//! rejects values the pipeline cannot honour.
//!
//! # Example
//! ```no_run
//! use stackline::config::PipelineConfig;
//!
//! let config = PipelineConfig::load_from("config/stackline.toml")?;
//! println!("buffers: {}", config.pool.buffer_count);
//! # Ok::<(), stackline::config::ConfigError>(())
//! ```

use crate::scaling::{ScalingMode, MAX_INTENSITY};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use stackline_core::{PipelineError, RetryPolicy, SaveFormat, StackShape};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STACKLINE_";

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Figment could not read or extract the sources.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Values were read but are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Raw buffer pool
    pub pool: PoolConfig,
    /// Acquisition stage
    pub acquisition: AcquisitionConfig,
    /// Accumulation stage
    pub accumulation: AccumulationConfig,
    /// Display stage
    pub display: DisplayConfig,
    /// Persistence defaults
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, used in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "stackline".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Raw buffer pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of raw buffers
    pub buffer_count: usize,
    /// Allocation shape; every later shape must fit within it
    pub max_shape: StackShape,
    /// Logical shape at startup (defaults to `max_shape`)
    pub initial_shape: Option<StackShape>,
    /// Default wait for a free buffer in `load`, in milliseconds
    pub load_timeout_ms: u64,
    /// Wait for all buffers to drain in `reshape`, in milliseconds
    pub reshape_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            max_shape: StackShape::new(16, 512, 512),
            initial_shape: None,
            load_timeout_ms: 5000,
            reshape_timeout_ms: 5000,
        }
    }
}

impl PoolConfig {
    /// Shape in effect at startup.
    #[must_use]
    pub fn starting_shape(&self) -> StackShape {
        self.initial_shape.unwrap_or(self.max_shape)
    }

    /// `load_timeout_ms` as a duration.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// `reshape_timeout_ms` as a duration.
    #[must_use]
    pub fn reshape_timeout(&self) -> Duration {
        Duration::from_millis(self.reshape_timeout_ms)
    }
}

/// Acquisition stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Retry policy for transient device errors
    pub retry: RetryPolicy,
}

/// Accumulation stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationConfig {
    /// Stop folding after this many stacks per accumulation (unbounded if unset)
    pub max_accumulated_frames: Option<u64>,
    /// Feed freed accumulation buffers straight back as switch requests
    pub auto_project: bool,
    /// Wait for a spare accumulation buffer in `project`, in milliseconds
    pub project_timeout_ms: u64,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            max_accumulated_frames: None,
            auto_project: false,
            project_timeout_ms: 5000,
        }
    }
}

impl AccumulationConfig {
    /// `project_timeout_ms` as a duration.
    #[must_use]
    pub fn project_timeout(&self) -> Duration {
        Duration::from_millis(self.project_timeout_ms)
    }
}

/// Display stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Initial scaling mode
    pub mode: ScalingMode,
    /// Initial lower bound
    pub low: i64,
    /// Initial upper bound
    pub high: i64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: ScalingMode::Linear,
            low: 0,
            high: i64::from(MAX_INTENSITY),
        }
    }
}

/// Persistence defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for saved stacks
    pub output_dir: PathBuf,
    /// Default save format
    pub format: SaveFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            format: SaveFormat::Raw,
        }
    }
}

impl PipelineConfig {
    /// Figment with defaults, the TOML file at `path`, then environment.
    ///
    /// Exposed so binaries can extract extra sections from the same sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration from `path` and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate from an existing figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.pool.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "pool.buffer_count must be greater than 0".to_string(),
            ));
        }
        if self.pool.max_shape.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pool.max_shape {} has an empty dimension",
                self.pool.max_shape
            )));
        }
        let start = self.pool.starting_shape();
        if start.is_empty() || !start.fits_within(&self.pool.max_shape) {
            return Err(ConfigError::Invalid(format!(
                "pool.initial_shape {} must be non-empty and fit within {}",
                start, self.pool.max_shape
            )));
        }

        if self.acquisition.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.accumulation.max_accumulated_frames == Some(0) {
            return Err(ConfigError::Invalid(
                "accumulation.max_accumulated_frames must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pool.starting_shape(), config.pool.max_shape);
        assert!(!config.accumulation.auto_project);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PipelineConfig::from_figment(
            &Figment::from(Serialized::defaults(PipelineConfig::default()))
                .merge(Toml::file("/nonexistent/stackline.toml")),
        )
        .unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let file = write_toml(
            r#"
            [pool]
            buffer_count = 3
            max_shape = { frames = 4, height = 8, width = 8 }
            initial_shape = { frames = 2, height = 8, width = 8 }

            [acquisition.retry]
            max_attempts = 5
            backoff_delay = 2

            [accumulation]
            max_accumulated_frames = 10
            auto_project = true

            [display]
            mode = "median_filter_autoscale"

            [storage]
            format = "tiff"
            "#,
        );

        let config = PipelineConfig::from_figment(
            &Figment::from(Serialized::defaults(PipelineConfig::default()))
                .merge(Toml::file(file.path())),
        )
        .unwrap();

        assert_eq!(config.pool.buffer_count, 3);
        assert_eq!(config.pool.starting_shape(), StackShape::new(2, 8, 8));
        assert_eq!(config.acquisition.retry.max_attempts, 5);
        assert_eq!(config.acquisition.retry.backoff_delay, Duration::from_millis(2));
        assert_eq!(config.accumulation.max_accumulated_frames, Some(10));
        assert!(config.accumulation.auto_project);
        assert_eq!(config.display.mode, ScalingMode::MedianAutoscale);
        assert_eq!(config.storage.format, SaveFormat::Tiff);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.pool.buffer_count = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pool.initial_shape = Some(StackShape::new(1, 1024, 8));
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.accumulation.max_accumulated_frames = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_error_maps_to_pipeline_error() {
        let err: PipelineError = ConfigError::Invalid("bad".to_string()).into();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
