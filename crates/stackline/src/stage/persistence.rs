//! Persistence: save requested stacks, then return every buffer to the pool.
//!
//! This is the only place raw buffers are released. Save failures are logged
//! and recorded with the monitor; they never keep a buffer from coming home.

use super::{ack_passive, PERSISTENCE};
use crate::message::{ControlMessage, Token};
use stackline_core::{FaultKind, FaultSeverity, PipelineResult, StageMonitor};
use stackline_pool::{Holder, PermissionSlip, RawBufferPool};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub(crate) struct PersistenceStage {
    pub(crate) pool: Arc<RawBufferPool>,
    pub(crate) monitor: StageMonitor,
    pub(crate) control: mpsc::Receiver<ControlMessage>,
    pub(crate) input: mpsc::Receiver<Token<PermissionSlip>>,
}

impl PersistenceStage {
    pub(crate) async fn run(mut self) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.control.recv() => ack_passive(PERSISTENCE, message),

                token = self.input.recv() => match token {
                    Some(Token::Item(slip)) => self.persist(slip),
                    Some(Token::Poison) | None => break,
                },
            }
        }
        Ok(())
    }

    fn persist(&self, slip: PermissionSlip) {
        if let Some(save) = slip.save_info() {
            let index = slip.index().get();
            if slip.is_acquired() {
                let result = {
                    let stack = self.pool.lock(&slip, Holder::Persistence);
                    stackline_storage::save_stack(&stack, slip.shape(), slip.sequence(), save)
                };
                match result {
                    Ok(saved) => debug!(
                        index,
                        sequence = slip.sequence(),
                        files = saved.data.len(),
                        path = ?save.path,
                        "Stack saved"
                    ),
                    Err(e) => {
                        error!(index, path = ?save.path, error = %format!("{:#}", e), "Failed to save stack");
                        self.monitor.report_fault(
                            PERSISTENCE,
                            FaultKind::Persistence {
                                index,
                                path: save.path.clone(),
                            },
                            FaultSeverity::Error,
                            format!("{:#}", e),
                        );
                    }
                }
            } else {
                warn!(index, path = ?save.path, "Stack was not acquired; save skipped");
                self.monitor.report_fault(
                    PERSISTENCE,
                    FaultKind::Persistence {
                        index,
                        path: save.path.clone(),
                    },
                    FaultSeverity::Error,
                    "stack was not acquired; save skipped",
                );
            }
        }

        self.monitor.record_activity(PERSISTENCE);
        self.pool.release(slip);
    }
}
