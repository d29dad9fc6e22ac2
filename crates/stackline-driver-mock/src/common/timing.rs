//! Readout timing for realistic mode.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Readout time per frame in milliseconds
    #[serde(default)]
    pub frame_readout_ms: u64,
    /// One-off delay when the source is armed
    #[serde(default)]
    pub arm_delay_ms: u64,
}

impl TimingConfig {
    /// sCMOS-like readout: 10 ms per frame, 20 ms to arm.
    #[must_use]
    pub fn camera() -> Self {
        Self {
            frame_readout_ms: 10,
            arm_delay_ms: 20,
        }
    }

    /// Total readout time for `frames` frames.
    #[must_use]
    pub fn stack_readout(&self, frames: usize) -> Duration {
        Duration::from_millis(self.frame_readout_ms.saturating_mul(frames as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.frame_readout_ms, 0);
        assert_eq!(config.stack_readout(100), Duration::ZERO);
    }

    #[test]
    fn test_camera_timing() {
        let config = TimingConfig::camera();
        assert_eq!(config.stack_readout(4), Duration::from_millis(40));
    }
}
