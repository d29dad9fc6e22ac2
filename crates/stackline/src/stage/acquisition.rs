//! Acquisition: fill raw buffers from the frame source.
//!
//! Transient device errors are retried under the configured
//! [`RetryPolicy`]. Anything else (or an exhausted retry budget) puts the
//! stage into a failed state: the failure is reported to the monitor, and
//! this and every later slip is forwarded with `acquired = false` so buffers
//! still travel the only path back to the pool.

use super::{ack_passive, forward_slip, ACCUMULATION, ACQUISITION};
use crate::message::{ControlMessage, Token};
use stackline_core::{
    retry_transient, DeviceError, Exhausted, FaultKind, FaultSeverity, FrameSource,
    PipelineResult, RetryPolicy, StageMonitor, StageState,
};
use stackline_pool::{Holder, PermissionSlip, RawBufferPool};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub(crate) struct AcquisitionStage {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) pool: Arc<RawBufferPool>,
    pub(crate) retry: RetryPolicy,
    pub(crate) monitor: StageMonitor,
    pub(crate) control: mpsc::Receiver<ControlMessage>,
    pub(crate) input: mpsc::Receiver<Token<PermissionSlip>>,
    pub(crate) output: mpsc::Sender<Token<PermissionSlip>>,
}

impl AcquisitionStage {
    pub(crate) async fn run(mut self) -> PipelineResult<()> {
        let mut failure = match self.source.arm() {
            Ok(()) => {
                info!(device = self.source.name(), "Frame source armed");
                None
            }
            Err(e) => {
                self.fail(&e, 1);
                Some(e.to_string())
            }
        };

        loop {
            tokio::select! {
                biased;

                Some(message) = self.control.recv() => ack_passive(ACQUISITION, message),

                token = self.input.recv() => match token {
                    Some(Token::Item(slip)) => self.acquire(slip, &mut failure).await?,
                    Some(Token::Poison) | None => break,
                },
            }
        }

        if let Err(e) = self.source.disarm() {
            warn!(device = self.source.name(), error = %e, "Failed to disarm frame source");
        }
        Ok(())
    }

    async fn acquire(
        &mut self,
        mut slip: PermissionSlip,
        failure: &mut Option<String>,
    ) -> PipelineResult<()> {
        if let Some(reason) = failure.as_deref() {
            debug!(
                index = %slip.index(),
                sequence = slip.sequence(),
                reason,
                "Acquisition failed earlier; forwarding buffer unfilled"
            );
            slip.set_acquired(false);
            return forward_slip(&self.output, &self.pool, slip, ACQUISITION, ACCUMULATION).await;
        }

        let shape = slip.shape();
        let sequence = slip.sequence();
        let pool = &self.pool;
        let source = &mut self.source;

        let result = retry_transient(
            &self.retry,
            |_| {
                let mut stack = pool.lock(&slip, Holder::Acquisition);
                source.fill(&mut stack[..shape.len()], shape, sequence)
            },
            DeviceError::is_transient,
        )
        .await;

        match result {
            Ok((report, attempts)) => {
                if attempts > 1 {
                    info!(sequence, attempts, "Acquisition recovered after transient errors");
                }
                debug!(
                    index = %slip.index(),
                    sequence,
                    frames = report.frames,
                    elapsed_us = report.elapsed.as_micros() as u64,
                    "Stack acquired"
                );
                slip.set_acquired(true);
                self.monitor.record_activity(ACQUISITION);
            }
            Err(Exhausted { error, attempts }) => {
                self.fail(&error, attempts);
                *failure = Some(error.to_string());
                slip.set_acquired(false);
            }
        }

        forward_slip(&self.output, &self.pool, slip, ACQUISITION, ACCUMULATION).await
    }

    fn fail(&self, error: &DeviceError, attempts: u32) {
        error!(
            device = %error.device,
            kind = %error.kind,
            attempts,
            error = %error,
            "Frame source failed; acquisition stopped"
        );
        self.monitor.report_fault(
            ACQUISITION,
            FaultKind::Device,
            FaultSeverity::Critical,
            error.to_string(),
        );
        self.monitor
            .set_state(ACQUISITION, StageState::Failed(error.to_string()));
    }
}
