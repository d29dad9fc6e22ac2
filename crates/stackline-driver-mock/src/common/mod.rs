//! Common infrastructure for the synthetic source.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Readout timing for realistic mode
//! - **errors**: Fault injection
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
