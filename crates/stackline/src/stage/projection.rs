//! Projection: reduce a finished accumulation to a 2-D max projection.
//!
//! Holds at most one accumulation buffer and one display buffer at a time.
//! A handoff is only taken once a free display buffer is in hand.

use super::{ack_passive, PROJECTION};
use crate::message::{ControlMessage, Handoff, Token};
use stackline_core::{PipelineError, PipelineResult, StageMonitor};
use stackline_pool::{AccumulationPair, DisplayPair, Holder, PairIndex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) struct ProjectionStage {
    pub(crate) accumulators: Arc<AccumulationPair>,
    pub(crate) displays: Arc<DisplayPair>,
    pub(crate) monitor: StageMonitor,
    pub(crate) control: mpsc::Receiver<ControlMessage>,
    pub(crate) input: mpsc::Receiver<Token<Handoff>>,
    /// Display buffers handed back by the display stage
    pub(crate) free_display: mpsc::Receiver<PairIndex>,
    /// Projected display buffers for the display stage
    pub(crate) output: mpsc::Sender<Token<PairIndex>>,
    /// Where freed accumulation buffers go: the spare channel, or straight
    /// back to accumulation as a switch request in auto-project mode
    pub(crate) returned: mpsc::Sender<PairIndex>,
    pub(crate) spare_display: Option<PairIndex>,
}

impl ProjectionStage {
    pub(crate) async fn run(mut self) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.control.recv() => ack_passive(PROJECTION, message),

                Some(index) = self.free_display.recv(), if self.spare_display.is_none() => {
                    self.spare_display = Some(index);
                }

                token = self.input.recv(), if self.spare_display.is_some() => match token {
                    Some(Token::Item(handoff)) => self.project(handoff).await?,
                    Some(Token::Poison) | None => break,
                },

                else => break,
            }
        }
        Ok(())
    }

    async fn project(&mut self, handoff: Handoff) -> PipelineResult<()> {
        let Some(target) = self.spare_display.take() else {
            return Err(PipelineError::stage_failed(
                PROJECTION,
                "handoff received without a free display buffer",
            ));
        };

        {
            let accumulation = self.accumulators.lock(handoff.index, Holder::Projection);
            let mut display = self.displays.lock(target, Holder::Projection);
            accumulation.project_into(&mut display);
        }
        debug!(
            accumulation = %handoff.index,
            display = %target,
            shape = %handoff.shape,
            stacks = handoff.stacks,
            "Projected accumulation"
        );
        self.monitor.record_activity(PROJECTION);

        if self.returned.send(handoff.index).await.is_err() {
            warn!(index = %handoff.index, "Nobody is waiting for the freed accumulation buffer");
        }

        self.output
            .send(Token::Item(target))
            .await
            .map_err(|_| PipelineError::stage_failed(PROJECTION, "display input closed"))
    }
}
