//! Fault injection for the synthetic source.
//!
//! Scenarios are checked in order before every fill. Random failures, when
//! configured, are always transient (`Transfer`) so they exercise the retry
//! path rather than stopping acquisition.

use super::rng::MockRng;
use parking_lot::Mutex;
use stackline_core::{DeviceError, DeviceErrorKind};
use std::sync::Arc;

/// Error injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Probability of a transient failure per fill (0.0 to 1.0)
    failure_rate: f64,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// A deterministic failure pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// The next `count` fills fail with a transient error of `kind`.
    Transient {
        /// Number of consecutive failing fills
        count: u32,
        /// Must be a transient kind to be retried
        kind: DeviceErrorKind,
    },
    /// Fail permanently after `count` successful fills.
    FailAfterN {
        /// Successful fills before the fault
        count: u32,
    },
    /// Fail permanently with a hardware fault code.
    HardwareFault {
        /// Fault code reported in the message
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Fills attempted so far
    attempts: u32,
    /// Fills that succeeded so far
    successes: u32,
    /// Latched hardware fault code (0 = no fault)
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    #[must_use]
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Random transient failures at `rate`, seeded for reproducibility.
    #[must_use]
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rate: rate,
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Create error config with a single scenario
    #[must_use]
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    #[must_use]
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            failure_rate: 0.0,
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(Some(0))),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check whether the next fill should fail.
    ///
    /// Counts the attempt either way; call [`record_success`](Self::record_success)
    /// after a fill that went through.
    pub fn check_fill(&self, device: &str) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.hardware_fault_code != 0 {
            return Err(DeviceError::new(
                device,
                DeviceErrorKind::Hardware,
                format!("Hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match *scenario {
                ErrorScenario::Transient { count, kind } if state.attempts <= count => {
                    return Err(DeviceError::new(
                        device,
                        kind,
                        format!("Injected {} failure {} of {}", kind, state.attempts, count),
                    ));
                }
                ErrorScenario::FailAfterN { count } if state.successes >= count => {
                    state.hardware_fault_code = 1;
                    return Err(DeviceError::new(
                        device,
                        DeviceErrorKind::Hardware,
                        format!("Injected failure after {} fills", count),
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = code.max(1);
                    return Err(DeviceError::new(
                        device,
                        DeviceErrorKind::Hardware,
                        format!("Hardware fault: {}", code),
                    ));
                }
                _ => {}
            }
        }

        if self.rng.should_fail(self.failure_rate) {
            return Err(DeviceError::new(
                device,
                DeviceErrorKind::Transfer,
                "Random transfer glitch",
            ));
        }
        Ok(())
    }

    /// Count a successful fill.
    pub fn record_success(&self) {
        self.state.lock().successes += 1;
    }

    /// Clear counters and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
