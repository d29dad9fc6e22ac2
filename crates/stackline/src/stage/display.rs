//! Display: render the current projection through the intensity scaling.
//!
//! The stage owns the render [`Surface`]: which display buffer is current,
//! the scaling policy and the rendered 8-bit frame. The surface sits behind
//! a `RwLock` so the pipeline handle can read the current projection while
//! the stage keeps running. The lock order is always surface, then display
//! buffer.

use super::DISPLAY;
use crate::message::{ControlMessage, DisplayUpdate, Token};
use crate::scaling::IntensityScaling;
use parking_lot::RwLock;
use stackline_core::{PipelineError, PipelineResult, StageMonitor};
use stackline_pool::{DisplayBuffer, DisplayPair, Holder, PairIndex};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Render state shared between the display stage and the pipeline handle.
#[derive(Debug)]
pub struct Surface {
    pub(crate) current: PairIndex,
    pub(crate) scaling: IntensityScaling,
    pub(crate) rendered: Vec<u8>,
    pub(crate) height: usize,
    pub(crate) width: usize,
    pub(crate) stacks: u64,
    pub(crate) sequence: u64,
}

impl Surface {
    /// Surface showing `current`, rendered with `scaling`.
    pub(crate) fn new(current: PairIndex, scaling: IntensityScaling, displays: &DisplayPair) -> Self {
        let mut surface = Self {
            current,
            scaling,
            rendered: Vec::new(),
            height: 0,
            width: 0,
            stacks: 0,
            sequence: 0,
        };
        let buffer = displays.lock(current, Holder::Display);
        surface.render_from(&buffer);
        surface
    }

    fn render_from(&mut self, buffer: &DisplayBuffer) {
        let (height, width) = buffer.dims();
        self.scaling
            .render(buffer.pixels(), height, width, &mut self.rendered);
        self.height = height;
        self.width = width;
        self.stacks = buffer.stacks();
    }

    pub(crate) fn update(&self) -> DisplayUpdate {
        let snapshot = self.scaling.snapshot();
        DisplayUpdate {
            sequence: self.sequence,
            height: self.height,
            width: self.width,
            stacks: self.stacks,
            low: snapshot.low,
            high: snapshot.high,
        }
    }
}

pub(crate) struct DisplayStage {
    pub(crate) displays: Arc<DisplayPair>,
    pub(crate) surface: Arc<RwLock<Surface>>,
    pub(crate) updates: watch::Sender<DisplayUpdate>,
    pub(crate) monitor: StageMonitor,
    pub(crate) control: mpsc::Receiver<ControlMessage>,
    pub(crate) input: mpsc::Receiver<Token<PairIndex>>,
    /// Previous display buffers, back to projection
    pub(crate) free: mpsc::Sender<PairIndex>,
}

impl DisplayStage {
    pub(crate) async fn run(mut self) -> PipelineResult<()> {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.control.recv() => self.handle_control(message),

                token = self.input.recv() => match token {
                    Some(Token::Item(index)) => self.show(index).await,
                    Some(Token::Poison) | None => break,
                },
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SetScaling {
                mode,
                low,
                high,
                ack,
            } => {
                let (snapshot, update) = {
                    let mut surface = self.surface.write();
                    surface.scaling.set(mode, low, high);
                    let buffer = self.displays.lock(surface.current, Holder::Display);
                    surface.render_from(&buffer);
                    surface.sequence += 1;
                    (surface.scaling.snapshot(), surface.update())
                };
                debug!(
                    mode = %snapshot.mode,
                    low = snapshot.low,
                    high = snapshot.high,
                    "Scaling changed"
                );
                self.updates.send_replace(update);
                let _ = ack.send(Ok(snapshot));
            }
            ControlMessage::Reshape { shape, ack } => {
                debug!(%shape, "Reshape acknowledged");
                let _ = ack.send(Ok(()));
            }
        }
    }

    async fn show(&mut self, index: PairIndex) {
        let (previous, update) = {
            let mut surface = self.surface.write();
            {
                let buffer = self.displays.lock(index, Holder::Display);
                surface.render_from(&buffer);
            }
            let previous = std::mem::replace(&mut surface.current, index);
            surface.sequence += 1;
            (previous, surface.update())
        };

        debug!(
            index = %index,
            sequence = update.sequence,
            stacks = update.stacks,
            low = update.low,
            high = update.high,
            "Projection displayed"
        );
        self.monitor.record_activity(DISPLAY);
        self.updates.send_replace(update);

        if self.free.send(previous).await.is_err() {
            debug!(index = %previous, "Projection stage gone; display buffer not returned");
        }
    }
}

/// Error for scaling requests that reach a closed display stage.
pub(crate) fn display_closed() -> PipelineError {
    PipelineError::stage_failed(DISPLAY, "display stage is not running")
}
