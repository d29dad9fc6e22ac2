//! Core types and traits for the stackline acquisition pipeline.
//!
//! This crate holds the vocabulary every other crate speaks:
//!
//! - [`shape::StackShape`]: logical `(frames, height, width)` geometry
//! - [`error`]: [`DeviceError`] from frame sources, [`PipelineError`] for callers
//! - [`source::FrameSource`]: the narrow capability the acquisition stage consumes
//! - [`retry`]: bounded retry for transient device errors
//! - [`save`]: save requests carried by permission slips
//! - [`monitor`]: stage liveness and fault history behind `status()`

pub mod error;
pub mod monitor;
pub mod retry;
pub mod save;
pub mod shape;
pub mod source;

pub use error::{DeviceError, DeviceErrorKind, PipelineError, PipelineResult};
pub use monitor::{
    FaultKind, FaultSeverity, PipelineFault, StageHealth, StageMonitor, StageState, SystemHealth,
};
pub use retry::{retry_transient, Exhausted, RetryPolicy};
pub use save::{SaveFormat, SaveInfo};
pub use shape::StackShape;
pub use source::{FillReport, FrameSource};
