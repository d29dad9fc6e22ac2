//! Operational modes for the synthetic source.
//!
//! - **Instant**: no readout delay, deterministic content, for unit tests
//! - **Realistic**: sleeps for the configured readout time per frame
//! - **Chaos**: realistic timing plus random transient failures

use serde::{Deserialize, Serialize};

/// Operational modes for the synthetic source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests and demos
    Realistic,
    /// Hardware-like timing with random transient failures
    Chaos,
}

impl MockMode {
    /// Whether fills sleep for the readout time.
    #[must_use]
    pub fn simulates_timing(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
