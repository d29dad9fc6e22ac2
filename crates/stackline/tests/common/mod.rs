//! Shared helpers for pipeline integration tests.

#![allow(dead_code)]

use stackline::{PipelineConfig, StackShape};
use stackline_driver_mock::{MockMode, StackPattern, SyntheticCamera, SyntheticConfig, TimingConfig};
use std::time::Duration;

/// Generous bound for anything that should complete promptly.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// The shape used throughout: 4 frames of 8×8.
pub const SHAPE: StackShape = StackShape::new(4, 8, 8);

/// Camera that sleeps `frame_ms` per frame, to keep buffers in flight.
pub fn slow_camera(values: &[u16], frame_ms: u64) -> SyntheticCamera {
    SyntheticCamera::with_config(SyntheticConfig {
        pattern: StackPattern::Constant {
            values: values.to_vec(),
        },
        mode: MockMode::Realistic,
        timing: TimingConfig {
            frame_readout_ms: frame_ms,
            arm_delay_ms: 0,
        },
        ..SyntheticConfig::default()
    })
}

/// Default configuration with `buffers` raw buffers of [`SHAPE`].
pub fn config(buffers: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.pool.buffer_count = buffers;
    config.pool.max_shape = SHAPE;
    config
}
