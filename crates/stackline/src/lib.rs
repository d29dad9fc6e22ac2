//! Zero-copy, multi-stage frame-stack acquisition pipeline.
//!
//! A fixed arena of raw frame stacks circulates through five stages, each on
//! its own thread:
//!
//! 1. **Acquisition** fills a raw buffer from a [`FrameSource`]
//! 2. **Accumulation** folds it into a running elementwise maximum
//! 3. **Persistence** optionally saves it, then returns it to the pool
//! 4. **Projection** reduces a finished accumulation over the frame axis
//! 5. **Display** renders the projection to 8 bits through an
//!    [`IntensityScaling`]
//!
//! Only buffer indices travel between stages; pixel data stays where it was
//! allocated. Accumulation and display are double-buffered so neither side
//! waits on the other for a whole stack.
//!
//! The [`Pipeline`] handle is the only entry point: `load`, `reshape`,
//! `project`, `set_scaling`, `get_scaling`, `status`, `close`, plus waits
//! and read-outs for tests and viewers.
//!
//! # Modules
//!
//! - [`config`]: figment-backed [`PipelineConfig`]
//! - [`telemetry`]: `tracing-subscriber` setup
//! - [`scaling`]: intensity scaling and its lookup table
//! - [`pipeline`]: the [`Pipeline`] handle and [`PipelineBuilder`]
//! - [`stage`]: stage workers
//! - [`message`]: what travels over the stage channels

pub mod config;
pub mod message;
pub mod pipeline;
pub mod scaling;
pub mod stage;
pub mod telemetry;

pub use config::{ConfigError, PipelineConfig};
pub use message::DisplayUpdate;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineStatus, Projection, RenderedFrame};
pub use scaling::{IntensityScaling, ScalingMode, ScalingSnapshot};
pub use stage::accumulation::AccumulationSnapshot;

pub use stackline_core::{
    DeviceError, DeviceErrorKind, FillReport, FrameSource, PipelineError, PipelineFault,
    PipelineResult, RetryPolicy, SaveFormat, SaveInfo, StackShape, StageState, SystemHealth,
};
pub use stackline_pool::{AccumulationPair, DisplayPair, Holder, PairIndex, PoolCensus};
