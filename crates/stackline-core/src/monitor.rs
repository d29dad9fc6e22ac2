//! Stage liveness and fault tracking.
//!
//! Every stage worker registers itself with the [`StageMonitor`], updates its
//! state as it starts and exits, and bumps an activity counter per processed
//! item. Faults that must not be swallowed (persistence failures, fatal
//! device errors) are pushed into a bounded history that callers drain
//! through the pipeline handle.
//!
//! The monitor never restarts anything. A failed stage stays failed until the
//! caller closes and rebuilds the pipeline.

use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Severity level for recorded faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultSeverity {
    /// Data was lost or degraded but the pipeline keeps running
    Error = 0,
    /// A stage can no longer do its job
    Critical = 1,
}

impl std::fmt::Display for FaultSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultSeverity::Error => write!(f, "ERROR"),
            FaultSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What went wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// A requested save failed; the buffer was still recycled.
    Persistence {
        /// Raw buffer index being saved
        index: usize,
        /// Destination path
        path: PathBuf,
    },
    /// The frame source failed beyond its retry budget.
    Device,
    /// A stage worker exited abnormally.
    StageExit,
}

/// A recorded fault
#[derive(Debug, Clone)]
pub struct PipelineFault {
    /// Stage that reported it
    pub stage: String,
    /// Fault class
    pub kind: FaultKind,
    /// Severity
    pub severity: FaultSeverity,
    /// Human-readable message
    pub message: String,
    /// When it happened
    pub timestamp: Instant,
}

/// Lifecycle state of a stage worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    /// Thread spawned, loop not entered yet
    Starting,
    /// Servicing its channels
    Running,
    /// Exited after a poison token
    Stopped,
    /// Exited or degraded because of an unrecoverable error
    Failed(String),
}

impl StageState {
    /// Running or starting.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, StageState::Starting | StageState::Running)
    }
}

/// Snapshot of one stage
#[derive(Debug, Clone)]
pub struct StageHealth {
    /// Stage name
    pub name: String,
    /// Current state
    pub state: StageState,
    /// Items processed since start
    pub processed: u64,
    /// Last time the stage touched an item or a control message
    pub last_activity: Instant,
}

/// Overall pipeline health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemHealth {
    /// All stages alive, no faults recorded
    Healthy,
    /// All stages alive, but data-loss faults were recorded
    Degraded,
    /// At least one stage failed
    Critical,
}

struct MonitorState {
    stages: BTreeMap<&'static str, StageHealth>,
    faults: VecDeque<PipelineFault>,
    max_faults: usize,
}

/// Shared stage monitor.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct StageMonitor {
    state: Arc<RwLock<MonitorState>>,
}

impl StageMonitor {
    /// Create a monitor keeping at most `max_faults` faults.
    #[must_use]
    pub fn new(max_faults: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState {
                stages: BTreeMap::new(),
                faults: VecDeque::new(),
                max_faults: max_faults.max(1),
            })),
        }
    }

    /// Register a stage in the `Starting` state.
    pub fn register(&self, stage: &'static str) {
        let mut state = self.state.write();
        state.stages.insert(
            stage,
            StageHealth {
                name: stage.to_string(),
                state: StageState::Starting,
                processed: 0,
                last_activity: Instant::now(),
            },
        );
    }

    /// Move a stage to `new_state`.
    ///
    /// A `Failed` stage stays failed: later `Stopped` transitions are ignored
    /// so an orderly shutdown does not hide the failure.
    pub fn set_state(&self, stage: &'static str, new_state: StageState) {
        let mut state = self.state.write();
        if let Some(health) = state.stages.get_mut(stage) {
            if matches!(health.state, StageState::Failed(_)) && new_state == StageState::Stopped {
                return;
            }
            health.state = new_state;
            health.last_activity = Instant::now();
        }
    }

    /// Count one processed item.
    pub fn record_activity(&self, stage: &'static str) {
        let mut state = self.state.write();
        if let Some(health) = state.stages.get_mut(stage) {
            health.processed += 1;
            health.last_activity = Instant::now();
        }
    }

    /// Record a fault.
    pub fn report_fault(
        &self,
        stage: &'static str,
        kind: FaultKind,
        severity: FaultSeverity,
        message: impl Into<String>,
    ) {
        let fault = PipelineFault {
            stage: stage.to_string(),
            kind,
            severity,
            message: message.into(),
            timestamp: Instant::now(),
        };

        let mut state = self.state.write();
        state.faults.push_back(fault);
        if state.faults.len() > state.max_faults {
            state.faults.pop_front();
        }
    }

    /// State of one stage, if registered.
    #[must_use]
    pub fn stage_state(&self, stage: &str) -> Option<StageState> {
        self.state.read().stages.get(stage).map(|h| h.state.clone())
    }

    /// Snapshot of all stages, in name order.
    #[must_use]
    pub fn stages(&self) -> Vec<StageHealth> {
        self.state.read().stages.values().cloned().collect()
    }

    /// Recorded faults, oldest first.
    #[must_use]
    pub fn faults(&self) -> Vec<PipelineFault> {
        self.state.read().faults.iter().cloned().collect()
    }

    /// Drain recorded faults, oldest first.
    pub fn take_faults(&self) -> Vec<PipelineFault> {
        self.state.write().faults.drain(..).collect()
    }

    /// Overall health.
    #[must_use]
    pub fn system_health(&self) -> SystemHealth {
        let state = self.state.read();
        let any_failed = state
            .stages
            .values()
            .any(|h| matches!(h.state, StageState::Failed(_)));
        if any_failed {
            SystemHealth::Critical
        } else if !state.faults.is_empty() {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        }
    }
}

impl std::fmt::Debug for StageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("StageMonitor")
            .field("stages", &state.stages.len())
            .field("faults", &state.faults.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle() {
        let monitor = StageMonitor::new(16);
        monitor.register("accumulation");
        assert_eq!(
            monitor.stage_state("accumulation"),
            Some(StageState::Starting)
        );

        monitor.set_state("accumulation", StageState::Running);
        monitor.record_activity("accumulation");
        monitor.record_activity("accumulation");

        let stages = monitor.stages();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].processed, 2);
        assert!(stages[0].state.is_alive());
        assert_eq!(monitor.system_health(), SystemHealth::Healthy);
    }

    #[test]
    fn test_failed_is_sticky() {
        let monitor = StageMonitor::new(16);
        monitor.register("acquisition");
        monitor.set_state("acquisition", StageState::Failed("sensor fault".into()));
        monitor.set_state("acquisition", StageState::Stopped);

        assert_eq!(
            monitor.stage_state("acquisition"),
            Some(StageState::Failed("sensor fault".into()))
        );
        assert_eq!(monitor.system_health(), SystemHealth::Critical);
    }

    #[test]
    fn test_fault_history_is_bounded() {
        let monitor = StageMonitor::new(3);
        for index in 0..5 {
            monitor.report_fault(
                "persistence",
                FaultKind::Persistence {
                    index,
                    path: PathBuf::from("/nowhere"),
                },
                FaultSeverity::Error,
                format!("write {} failed", index),
            );
        }

        let faults = monitor.faults();
        assert_eq!(faults.len(), 3);
        assert_eq!(faults[0].message, "write 2 failed");
        assert_eq!(monitor.system_health(), SystemHealth::Degraded);

        assert_eq!(monitor.take_faults().len(), 3);
        assert!(monitor.faults().is_empty());
    }

    #[test]
    fn test_unknown_stage_is_ignored() {
        let monitor = StageMonitor::new(4);
        monitor.set_state("ghost", StageState::Running);
        monitor.record_activity("ghost");
        assert!(monitor.stage_state("ghost").is_none());
    }
}
