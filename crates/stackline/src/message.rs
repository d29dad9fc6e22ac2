//! Messages exchanged between stages and the pipeline handle.

use crate::scaling::{ScalingMode, ScalingSnapshot};
use stackline_core::{PipelineResult, StackShape};
use stackline_pool::PairIndex;
use tokio::sync::oneshot;

/// Data channel item: a payload, or the request to shut down.
#[derive(Debug)]
pub enum Token<T> {
    /// Work to do
    Item(T),
    /// Stop after everything queued ahead of this token
    Poison,
}

/// Out-of-band command, drained ahead of data on every stage.
#[derive(Debug)]
pub enum ControlMessage {
    /// Adopt a new logical shape. Sent only while every raw buffer is
    /// reserved by the pipeline handle.
    Reshape {
        /// New shape
        shape: StackShape,
        /// Acknowledgment
        ack: oneshot::Sender<PipelineResult<()>>,
    },
    /// Change the display scaling and re-render (display stage only).
    SetScaling {
        /// New mode
        mode: ScalingMode,
        /// New lower bound, if given
        low: Option<i64>,
        /// New upper bound, if given
        high: Option<i64>,
        /// Resulting `(mode, low, high)`
        ack: oneshot::Sender<PipelineResult<ScalingSnapshot>>,
    },
}

/// A finished accumulation on its way to projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    /// Accumulation buffer holding the result
    pub index: PairIndex,
    /// Shape of the accumulated stacks
    pub shape: StackShape,
    /// Stacks folded into it
    pub stacks: u64,
}

/// Published by the display stage after every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayUpdate {
    /// Render counter, starts at 0 before the first projection
    pub sequence: u64,
    /// Frame height
    pub height: usize,
    /// Frame width
    pub width: usize,
    /// Raw stacks behind the projection
    pub stacks: u64,
    /// Lower bound used for the render
    pub low: u16,
    /// Upper bound used for the render
    pub high: u16,
}
