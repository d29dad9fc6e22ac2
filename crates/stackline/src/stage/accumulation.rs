//! Accumulation: fold acquired stacks into the active accumulation buffer.
//!
//! The stage owns one of the two accumulation buffers at a time. A switch
//! request names the spare buffer; serving it hands the active buffer to
//! projection and makes the spare active and empty. Switch requests are
//! checked ahead of data on every iteration.
//!
//! A switch that arrives while the active buffer is still empty is held
//! until the first stack lands, so projection never receives an empty
//! accumulation.

use super::{forward_slip, ACCUMULATION, PERSISTENCE};
use crate::message::{ControlMessage, Handoff, Token};
use stackline_core::{PipelineError, PipelineResult, StackShape, StageMonitor};
use stackline_pool::{
    AccumulationPair, AccumulationState, FoldOutcome, Holder, PairIndex, PermissionSlip,
    RawBufferPool,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Running totals kept by the accumulation stage.
#[derive(Debug, Default)]
pub struct AccumulationStats {
    folded: AtomicU64,
    skipped: AtomicU64,
    handoffs: AtomicU64,
}

/// Point-in-time copy of [`AccumulationStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccumulationSnapshot {
    /// Stacks folded into an accumulation buffer
    pub folded: u64,
    /// Stacks dropped because the accumulation cap was reached
    pub skipped: u64,
    /// Accumulations handed to projection
    pub handoffs: u64,
}

impl AccumulationStats {
    /// Copy the counters.
    #[must_use]
    pub fn snapshot(&self) -> AccumulationSnapshot {
        AccumulationSnapshot {
            folded: self.folded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct AccumulationStage {
    pub(crate) pool: Arc<RawBufferPool>,
    pub(crate) accumulators: Arc<AccumulationPair>,
    pub(crate) monitor: StageMonitor,
    pub(crate) stats: Arc<AccumulationStats>,
    pub(crate) cap: Option<u64>,
    pub(crate) shape: StackShape,
    pub(crate) active: PairIndex,
    pub(crate) pending: Option<PairIndex>,
    pub(crate) control: mpsc::Receiver<ControlMessage>,
    pub(crate) switch: mpsc::Receiver<PairIndex>,
    pub(crate) input: mpsc::Receiver<Token<PermissionSlip>>,
    pub(crate) output: mpsc::Sender<Token<PermissionSlip>>,
    pub(crate) handoff: mpsc::Sender<Token<Handoff>>,
}

impl AccumulationStage {
    pub(crate) async fn run(mut self) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.control.recv() => self.handle_control(message),

                Some(spare) = self.switch.recv(), if self.pending.is_none() => {
                    self.request_switch(spare).await?;
                }

                token = self.input.recv() => match token {
                    Some(Token::Item(slip)) => self.accumulate(slip).await?,
                    Some(Token::Poison) | None => break,
                },
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Reshape { shape, ack } => {
                let mut active = self.accumulators.lock(self.active, Holder::Accumulation);
                if active.state() == AccumulationState::Accumulating {
                    info!(
                        discarded_stacks = active.stacks(),
                        "Discarding partial accumulation for reshape"
                    );
                }
                active.reset(shape);
                self.shape = shape;
                debug!(%shape, "Reshape acknowledged");
                let _ = ack.send(Ok(()));
            }
            ControlMessage::SetScaling { ack, .. } => {
                let _ = ack.send(Err(PipelineError::Configuration(
                    "accumulation stage does not handle scaling".to_string(),
                )));
            }
        }
    }

    async fn request_switch(&mut self, spare: PairIndex) -> PipelineResult<()> {
        if spare == self.active {
            warn!(index = %spare, "Ignoring switch to the active accumulation buffer");
            return Ok(());
        }
        self.pending = Some(spare);

        let state = self.accumulators.lock(self.active, Holder::Accumulation).state();
        if state == AccumulationState::Empty {
            debug!(index = %spare, "Switch held until the active buffer receives a stack");
            return Ok(());
        }
        self.switch_now().await
    }

    async fn accumulate(&mut self, slip: PermissionSlip) -> PipelineResult<()> {
        if slip.is_acquired() {
            let outcome = {
                let stack = self.pool.lock(&slip, Holder::Accumulation);
                let mut active = self.accumulators.lock(self.active, Holder::Accumulation);
                let outcome = active.fold(&stack, slip.shape(), self.cap);
                if outcome == FoldOutcome::Skipped && active.skipped() == 1 {
                    warn!(
                        cap = self.cap,
                        index = %self.active,
                        "Accumulation cap reached; further stacks are persisted but not accumulated"
                    );
                }
                outcome
            };

            match outcome {
                FoldOutcome::Skipped => self.stats.skipped.fetch_add(1, Ordering::Relaxed),
                FoldOutcome::Copied | FoldOutcome::Folded => {
                    self.stats.folded.fetch_add(1, Ordering::Relaxed)
                }
            };
            self.monitor.record_activity(ACCUMULATION);
        } else {
            debug!(index = %slip.index(), "Skipping unacquired buffer");
        }

        forward_slip(&self.output, &self.pool, slip, ACCUMULATION, PERSISTENCE).await?;

        if self.pending.is_some() {
            let state = self.accumulators.lock(self.active, Holder::Accumulation).state();
            if state != AccumulationState::Empty {
                self.switch_now().await?;
            }
        }
        Ok(())
    }

    async fn switch_now(&mut self) -> PipelineResult<()> {
        let Some(spare) = self.pending.take() else {
            return Ok(());
        };

        let handoff = {
            let mut finished = self.accumulators.lock(self.active, Holder::Accumulation);
            finished.hand_off();
            Handoff {
                index: self.active,
                shape: finished.shape(),
                stacks: finished.stacks(),
            }
        };
        self.accumulators
            .lock(spare, Holder::Accumulation)
            .reset(self.shape);
        self.active = spare;

        debug!(
            handed_off = %handoff.index,
            active = %spare,
            stacks = handoff.stacks,
            "Accumulation buffers switched"
        );
        self.stats.handoffs.fetch_add(1, Ordering::Relaxed);

        self.handoff
            .send(Token::Item(handoff))
            .await
            .map_err(|_| PipelineError::stage_failed(ACCUMULATION, "projection input closed"))
    }
}
