//! Frame source capability consumed by the acquisition stage.
//!
//! Hardware drivers (or the synthetic source in `stackline-driver-mock`)
//! implement [`FrameSource`]. The pipeline only looks at pass/fail and the
//! report; it never interprets pixel content.

use crate::error::DeviceError;
use crate::shape::StackShape;
use std::time::Duration;

/// Outcome of a successful fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillReport {
    /// Frames written into the stack.
    pub frames: usize,
    /// Wall time the device needed.
    pub elapsed: Duration,
}

/// A device that writes whole frame stacks into caller-owned memory.
///
/// `fill` is synchronous: the acquisition stage runs on its own OS thread and
/// holds the raw buffer lock for exactly the duration of the call.
///
/// # Contract
/// - `stack.len() == shape.len()`; the source must write every sample.
/// - Transient problems are reported with a transient
///   [`DeviceErrorKind`](crate::error::DeviceErrorKind) so the stage retries.
pub trait FrameSource: Send + 'static {
    /// Short device name used in logs and errors.
    fn name(&self) -> &str;

    /// Prepare the device for triggered readout.
    ///
    /// Called once when the acquisition stage starts.
    fn arm(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Undo [`arm`](Self::arm). Called once when the acquisition stage exits.
    fn disarm(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Fill `stack` with one frame stack of `shape`.
    ///
    /// `sequence` counts stacks since the pipeline started and is what a
    /// deterministic source keys its content on.
    fn fill(
        &mut self,
        stack: &mut [u16],
        shape: StackShape,
        sequence: u64,
    ) -> Result<FillReport, DeviceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn arm(&mut self) -> Result<(), DeviceError> {
        (**self).arm()
    }

    fn disarm(&mut self) -> Result<(), DeviceError> {
        (**self).disarm()
    }

    fn fill(
        &mut self,
        stack: &mut [u16],
        shape: StackShape,
        sequence: u64,
    ) -> Result<FillReport, DeviceError> {
        (**self).fill(stack, shape, sequence)
    }
}
