//! Error types shared by every pipeline crate.
//!
//! Two layers exist:
//!
//! - [`DeviceError`]: what a [`FrameSource`](crate::source::FrameSource) reports
//!   when a fill fails. Carries a [`DeviceErrorKind`] so the acquisition stage
//!   can tell transient glitches (retry locally) from hard faults (stop).
//! - [`PipelineError`]: what callers of the pipeline handle see.
//!
//! ## Error Categories
//!
//! 1. **Configuration** - `Configuration`, `InvalidShape`, `FeatureNotEnabled`.
//!    Rejected synchronously, previous state stays in effect.
//! 2. **Resource exhaustion** - `BufferExhausted`, `Timeout`.
//!    Reported to the caller of `load`/`reshape`, never silently dropped.
//! 3. **Runtime** - `Device`, `Persistence`, `StageFailed`, `Closed`, `Io`.
//!    Surfaced through the call that observed them or through the monitor.

use crate::shape::StackShape;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Device Errors
// =============================================================================

/// Classification of a frame-source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// The device did not deliver the stack in time.
    Timeout,
    /// A transfer glitch corrupted or interrupted the readout.
    Transfer,
    /// The device reported a fault that will not clear by retrying.
    Hardware,
    /// The device rejected its settings or the requested shape.
    Configuration,
}

impl DeviceErrorKind {
    /// Whether a retry has a chance of succeeding.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, DeviceErrorKind::Timeout | DeviceErrorKind::Transfer)
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::Transfer => "transfer",
            DeviceErrorKind::Hardware => "hardware",
            DeviceErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a frame source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct DeviceError {
    /// Name of the device that failed.
    pub device: String,
    /// Failure class.
    pub kind: DeviceErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DeviceError {
    /// Build a device error.
    pub fn new(device: impl Into<String>, kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`DeviceErrorKind::is_transient`].
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

// =============================================================================
// Pipeline Errors
// =============================================================================

/// Convenience alias for results using the pipeline error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Primary error type returned by the pipeline handle.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A configuration value or request argument is semantically invalid.
    ///
    /// **Recovery Strategy**: fix the argument; nothing was changed.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A requested stack shape is empty or exceeds the allocation.
    #[error("Invalid shape {requested}: must be non-empty and fit within {capacity}")]
    InvalidShape {
        /// Shape the caller asked for.
        requested: StackShape,
        /// Shape the pool was allocated with.
        capacity: StackShape,
    },

    /// No idle raw buffer became available before the deadline.
    ///
    /// `dispatched` slips were already handed to acquisition and stay in
    /// flight; the remaining `requested - dispatched` were not started.
    #[error("Buffer pool exhausted: dispatched {dispatched} of {requested} requested acquisitions")]
    BufferExhausted {
        /// Number of acquisitions requested.
        requested: usize,
        /// Number actually dispatched before the timeout.
        dispatched: usize,
    },

    /// A wait on the pipeline exceeded its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// A frame source failed in a way the acquisition stage could not absorb.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Writing a saved stack failed. The buffer itself was still recycled.
    #[error("Failed to persist buffer {index} to {}: {message}", path.display())]
    Persistence {
        /// Raw buffer index that was being saved.
        index: usize,
        /// Destination that failed.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },

    /// A stage worker stopped or crashed and can no longer accept work.
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed {
        /// Stage name.
        stage: String,
        /// Reason recorded by the stage or the monitor.
        message: String,
    },

    /// The pipeline is shutting down or has shut down.
    #[error("Pipeline is closed")]
    Closed,

    /// Functionality compiled out via cargo features.
    #[error("Feature '{0}' is not enabled. Please rebuild with --features {0}")]
    FeatureNotEnabled(String),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::StageFailed`].
    pub fn stage_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::StageFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(DeviceErrorKind::Timeout.is_transient());
        assert!(DeviceErrorKind::Transfer.is_transient());
        assert!(!DeviceErrorKind::Hardware.is_transient());
        assert!(!DeviceErrorKind::Configuration.is_transient());
    }

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::new("synthetic", DeviceErrorKind::Timeout, "no trigger");
        assert_eq!(
            err.to_string(),
            "Device 'synthetic' timeout error: no trigger"
        );
    }

    #[test]
    fn test_device_error_converts() {
        let err: PipelineError =
            DeviceError::new("cam", DeviceErrorKind::Hardware, "sensor fault").into();
        assert!(matches!(err, PipelineError::Device(_)));
    }

    #[test]
    fn test_exhausted_message() {
        let err = PipelineError::BufferExhausted {
            requested: 4,
            dispatched: 1,
        };
        assert!(err.to_string().contains("dispatched 1 of 4"));
    }
}
