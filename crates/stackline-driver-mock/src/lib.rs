//! Synthetic frame source for stackline.
//!
//! Provides [`SyntheticCamera`], a [`FrameSource`](stackline_core::FrameSource)
//! that writes deterministic stack content without hardware. Used by the
//! pipeline tests, the benches and the `stackline run` CLI.
//!
//! # Modes
//!
//! - Instant: no delays, for unit tests
//! - Realistic: sleeps for the configured readout time (~10 ms per frame)
//! - Chaos: realistic timing plus random transient failures
//!
//! Deterministic failure scenarios are injected with [`ErrorConfig`]:
//!
//! ```
//! use stackline_core::DeviceErrorKind;
//! use stackline_driver_mock::{ErrorConfig, ErrorScenario, SyntheticCamera};
//!
//! let camera = SyntheticCamera::constant([10, 20, 30]).with_errors(ErrorConfig::scenario(
//!     ErrorScenario::Transient { count: 2, kind: DeviceErrorKind::Timeout },
//! ));
//! ```

pub mod common;
mod pattern;
mod synthetic;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use pattern::{PatternGenerator, StackPattern};
pub use synthetic::{SyntheticCamera, SyntheticConfig, SyntheticStats};
