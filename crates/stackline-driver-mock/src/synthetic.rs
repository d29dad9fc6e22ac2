//! Synthetic camera implementing [`FrameSource`].

use crate::common::{ErrorConfig, MockMode, TimingConfig};
use crate::pattern::{PatternGenerator, StackPattern};
use serde::{Deserialize, Serialize};
use stackline_core::{DeviceError, DeviceErrorKind, FillReport, FrameSource, StackShape};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Configuration for [`SyntheticCamera`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Device name used in logs and errors (default: "synthetic")
    #[serde(default = "default_name")]
    pub name: String,

    /// Stack content
    #[serde(default)]
    pub pattern: StackPattern,

    /// Timing behaviour
    #[serde(default)]
    pub mode: MockMode,

    /// Readout timing for realistic and chaos modes
    #[serde(default)]
    pub timing: TimingConfig,

    /// Transient failure probability per fill in chaos mode
    #[serde(default = "default_chaos_rate")]
    pub chaos_failure_rate: f64,
}

fn default_name() -> String {
    "synthetic".to_string()
}
fn default_chaos_rate() -> f64 {
    0.05
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            pattern: StackPattern::default(),
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            chaos_failure_rate: default_chaos_rate(),
        }
    }
}

/// Counters shared between a camera and whoever inspects it.
#[derive(Debug, Default)]
pub struct SyntheticStats {
    fills: AtomicU64,
    failures: AtomicU64,
    armed: AtomicBool,
}

impl SyntheticStats {
    /// Successful fills.
    pub fn fills(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }

    /// Failed fill attempts, injected or not.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Whether the camera is currently armed.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }
}

/// Deterministic stand-in for a camera.
///
/// Writes the configured [`StackPattern`] into each stack and can be told to
/// fail through an [`ErrorConfig`].
#[derive(Debug)]
pub struct SyntheticCamera {
    name: String,
    generator: PatternGenerator,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    stats: Arc<SyntheticStats>,
}

impl SyntheticCamera {
    /// Instant-mode camera producing `pattern`.
    #[must_use]
    pub fn new(pattern: StackPattern) -> Self {
        Self::with_config(SyntheticConfig {
            pattern,
            ..SyntheticConfig::default()
        })
    }

    /// Camera cycling constant stacks through `values`.
    #[must_use]
    pub fn constant(values: impl Into<Vec<u16>>) -> Self {
        Self::new(StackPattern::Constant {
            values: values.into(),
        })
    }

    /// Camera built from configuration.
    #[must_use]
    pub fn with_config(config: SyntheticConfig) -> Self {
        let errors = match config.mode {
            MockMode::Chaos => ErrorConfig::random_failures_seeded(config.chaos_failure_rate, None),
            _ => ErrorConfig::none(),
        };
        Self {
            name: config.name,
            generator: PatternGenerator::new(config.pattern),
            mode: config.mode,
            timing: config.timing,
            errors,
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    /// Replace the fault injection.
    #[must_use]
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Shared counters, readable after the camera moved into a pipeline.
    #[must_use]
    pub fn stats(&self) -> Arc<SyntheticStats> {
        Arc::clone(&self.stats)
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn arm(&mut self) -> Result<(), DeviceError> {
        if self.mode.simulates_timing() && self.timing.arm_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.timing.arm_delay_ms));
        }
        self.stats.armed.store(true, Ordering::Relaxed);
        tracing::debug!(device = %self.name, pattern = ?self.generator.pattern(), "Synthetic camera armed");
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), DeviceError> {
        self.stats.armed.store(false, Ordering::Relaxed);
        tracing::debug!(device = %self.name, fills = self.stats.fills(), "Synthetic camera disarmed");
        Ok(())
    }

    fn fill(
        &mut self,
        stack: &mut [u16],
        shape: StackShape,
        sequence: u64,
    ) -> Result<FillReport, DeviceError> {
        let started = Instant::now();

        if stack.len() < shape.len() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            return Err(DeviceError::new(
                &self.name,
                DeviceErrorKind::Configuration,
                format!(
                    "buffer holds {} samples, shape {} needs {}",
                    stack.len(),
                    shape,
                    shape.len()
                ),
            ));
        }

        if let Err(err) = self.errors.check_fill(&self.name) {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        if self.mode.simulates_timing() {
            std::thread::sleep(self.timing.stack_readout(shape.frames));
        }

        self.generator.fill_stack(stack, shape, sequence);
        self.errors.record_success();
        self.stats.fills.fetch_add(1, Ordering::Relaxed);

        Ok(FillReport {
            frames: shape.frames,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    #[test]
    fn test_fill_reports_frames() {
        let mut camera = SyntheticCamera::constant([7]);
        let shape = StackShape::new(3, 2, 2);
        let mut stack = vec![0u16; shape.len()];

        let report = camera.fill(&mut stack, shape, 0).unwrap();
        assert_eq!(report.frames, 3);
        assert!(stack.iter().all(|&v| v == 7));
        assert_eq!(camera.stats().fills(), 1);
    }

    #[test]
    fn test_short_buffer_is_configuration_error() {
        let mut camera = SyntheticCamera::constant([1]);
        let mut stack = vec![0u16; 3];
        let err = camera
            .fill(&mut stack, StackShape::new(1, 2, 2), 0)
            .unwrap_err();
        assert_eq!(err.kind, DeviceErrorKind::Configuration);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_injected_errors_counted() {
        let mut camera = SyntheticCamera::constant([1]).with_errors(ErrorConfig::scenario(
            ErrorScenario::HardwareFault { code: 42 },
        ));
        let shape = StackShape::new(1, 1, 1);
        let mut stack = vec![0u16; 1];
        assert!(camera.fill(&mut stack, shape, 0).is_err());
        assert_eq!(camera.stats().failures(), 1);
        assert_eq!(camera.stats().fills(), 0);
    }

    #[test]
    fn test_arm_disarm_tracked() {
        let mut camera = SyntheticCamera::constant([1]);
        let stats = camera.stats();
        camera.arm().unwrap();
        assert!(stats.is_armed());
        camera.disarm().unwrap();
        assert!(!stats.is_armed());
    }
}
