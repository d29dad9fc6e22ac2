//! The pipeline handle.
//!
//! [`Pipeline`] owns the buffer arena, the stage threads and every channel
//! between them. All caller-facing operations go through it; there is no
//! module-level state.
//!
//! # Example
//!
//! ```no_run
//! use stackline::{Pipeline, StackShape};
//! use stackline_driver_mock::SyntheticCamera;
//! use std::time::Duration;
//!
//! # async fn example() -> stackline::PipelineResult<()> {
//! let pipeline = Pipeline::create(3, StackShape::new(4, 8, 8), SyntheticCamera::constant([10, 20, 30]))?;
//! pipeline.load(3, None, None).await?;
//! pipeline.project().await?;
//! let update = pipeline.wait_for_display(0, Duration::from_secs(1)).await?;
//! assert_eq!(update.stacks, 3);
//! pipeline.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::PipelineConfig;
use crate::message::{ControlMessage, DisplayUpdate, Handoff, Token};
use crate::scaling::{IntensityScaling, ScalingMode, ScalingSnapshot};
use crate::stage::accumulation::{AccumulationSnapshot, AccumulationStage, AccumulationStats};
use crate::stage::acquisition::AcquisitionStage;
use crate::stage::display::{display_closed, DisplayStage, Surface};
use crate::stage::persistence::PersistenceStage;
use crate::stage::projection::ProjectionStage;
use crate::stage::{
    spawn_stage, StageHandle, ACCUMULATION, ACQUISITION, DISPLAY, PERSISTENCE, PROJECTION,
};
use parking_lot::{Mutex, RwLock};
use stackline_core::{
    FaultKind, FaultSeverity, FrameSource, PipelineError, PipelineFault, PipelineResult,
    RetryPolicy, SaveFormat, SaveInfo, StackShape, StageHealth, StageMonitor, StageState,
    SystemHealth,
};
use stackline_pool::{
    AccumulationPair, DisplayPair, Holder, PairIndex, PermissionSlip, PoolCensus, RawBufferPool,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Faults kept by the monitor before the oldest are dropped.
const MAX_FAULTS: usize = 256;
const CONTROL_CAPACITY: usize = 8;
const PAIR_CAPACITY: usize = 2;
const HANDOFF_CAPACITY: usize = 3;

/// Copy of the current 2-D max projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Row-major pixels, `height * width` long
    pub pixels: Vec<u16>,
    /// Frame height
    pub height: usize,
    /// Frame width
    pub width: usize,
    /// Raw stacks folded into it
    pub stacks: u64,
    /// Display sequence it was rendered at
    pub sequence: u64,
}

/// Copy of the current 8-bit render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    /// Row-major display pixels
    pub pixels: Vec<u8>,
    /// Frame height
    pub height: usize,
    /// Frame width
    pub width: usize,
    /// Display sequence
    pub sequence: u64,
}

/// Snapshot returned by [`Pipeline::status`].
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    /// Identifier of this pipeline instance, also attached to stage spans
    pub run_id: Uuid,
    /// Logical shape in effect
    pub shape: StackShape,
    /// Allocation shape
    pub capacity: StackShape,
    /// Raw buffer occupancy
    pub census: PoolCensus,
    /// Per-stage state, in name order
    pub stages: Vec<StageHealth>,
    /// Overall health
    pub health: SystemHealth,
    /// Faults currently recorded
    pub faults: usize,
    /// Latest display update
    pub display: DisplayUpdate,
    /// Active scaling
    pub scaling: ScalingSnapshot,
    /// Accumulation counters
    pub accumulation: AccumulationSnapshot,
    /// Whether projection cadence is automatic
    pub auto_project: bool,
    /// Whether `close` was called
    pub closed: bool,
}

/// Builder for [`Pipeline`], starting from [`PipelineConfig`] defaults.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of raw buffers.
    #[must_use]
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.config.pool.buffer_count = count;
        self
    }

    /// Allocation shape.
    #[must_use]
    pub fn shape(mut self, shape: StackShape) -> Self {
        self.config.pool.max_shape = shape;
        self
    }

    /// Logical shape at startup, if smaller than the allocation.
    #[must_use]
    pub fn initial_shape(mut self, shape: StackShape) -> Self {
        self.config.pool.initial_shape = Some(shape);
        self
    }

    /// Retry policy for transient device errors.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.acquisition.retry = policy;
        self
    }

    /// Stop folding after `frames` stacks per accumulation.
    #[must_use]
    pub fn max_accumulated_frames(mut self, frames: u64) -> Self {
        self.config.accumulation.max_accumulated_frames = Some(frames);
        self
    }

    /// Project continuously instead of on [`Pipeline::project`].
    #[must_use]
    pub fn auto_project(mut self, enabled: bool) -> Self {
        self.config.accumulation.auto_project = enabled;
        self
    }

    /// Initial display scaling.
    #[must_use]
    pub fn scaling(mut self, mode: ScalingMode, low: i64, high: i64) -> Self {
        self.config.display.mode = mode;
        self.config.display.low = low;
        self.config.display.high = high;
        self
    }

    /// Default wait for free buffers in [`Pipeline::load`].
    #[must_use]
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.load_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate the configuration, allocate every buffer and start the
    /// stage threads.
    ///
    /// # Errors
    /// `Configuration` or `InvalidShape` for a bad configuration, `Io` if a
    /// stage thread cannot be spawned.
    pub fn build<S: FrameSource>(self, source: S) -> PipelineResult<Pipeline> {
        Pipeline::start(self.config, Box::new(source))
    }
}

/// Handle to a running pipeline.
///
/// Shareable behind an `Arc`; `load` and `reshape` serialize against each
/// other, everything else runs concurrently.
pub struct Pipeline {
    run_id: Uuid,
    config: PipelineConfig,
    pool: Arc<RawBufferPool>,
    accumulators: Arc<AccumulationPair>,
    displays: Arc<DisplayPair>,
    surface: Arc<RwLock<Surface>>,
    updates: watch::Receiver<DisplayUpdate>,
    monitor: StageMonitor,
    stats: Arc<AccumulationStats>,

    acquisition_tx: mpsc::Sender<Token<PermissionSlip>>,
    accumulation_tx: mpsc::Sender<Token<PermissionSlip>>,
    persistence_tx: mpsc::Sender<Token<PermissionSlip>>,
    handoff_tx: mpsc::Sender<Token<Handoff>>,
    display_tx: mpsc::Sender<Token<PairIndex>>,
    controls: Vec<(&'static str, mpsc::Sender<ControlMessage>)>,
    switch_tx: mpsc::Sender<PairIndex>,
    spare_rx: tokio::sync::Mutex<mpsc::Receiver<PairIndex>>,

    ops: tokio::sync::Mutex<()>,
    stages: Mutex<Vec<StageHandle>>,
    closed: AtomicBool,
}

impl Pipeline {
    /// Pipeline with `buffer_count` raw buffers of `shape` and default
    /// settings otherwise.
    ///
    /// # Errors
    /// As [`PipelineBuilder::build`].
    pub fn create<S: FrameSource>(
        buffer_count: usize,
        shape: StackShape,
        source: S,
    ) -> PipelineResult<Self> {
        Self::builder()
            .buffer_count(buffer_count)
            .shape(shape)
            .build(source)
    }

    /// Start a [`PipelineBuilder`].
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    fn start(config: PipelineConfig, source: Box<dyn FrameSource>) -> PipelineResult<Self> {
        config.validate()?;

        let run_id = Uuid::new_v4();
        let capacity = config.pool.max_shape;
        let shape = config.pool.starting_shape();
        let buffer_count = config.pool.buffer_count;
        let auto_project = config.accumulation.auto_project;

        let pool = RawBufferPool::with_shape(buffer_count, capacity, shape)?;
        let accumulators = Arc::new(AccumulationPair::new(capacity));
        let displays = Arc::new(DisplayPair::new(capacity));
        let scaling = IntensityScaling::new(
            config.display.mode,
            config.display.low,
            config.display.high,
        );
        let surface = Surface::new(PairIndex::First, scaling, &displays);
        let (updates_tx, updates) = watch::channel(surface.update());
        let surface = Arc::new(RwLock::new(surface));
        let monitor = StageMonitor::new(MAX_FAULTS);
        let stats = Arc::new(AccumulationStats::default());

        // One slot more than there are buffers so a poison token always fits.
        let slip_capacity = buffer_count + 1;
        let (acquisition_tx, acquisition_rx) = mpsc::channel(slip_capacity);
        let (accumulation_tx, accumulation_rx) = mpsc::channel(slip_capacity);
        let (persistence_tx, persistence_rx) = mpsc::channel(slip_capacity);
        let (handoff_tx, handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (display_tx, display_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (free_display_tx, free_display_rx) = mpsc::channel(PAIR_CAPACITY);
        let (switch_tx, switch_rx) = mpsc::channel(PAIR_CAPACITY);
        let (spare_tx, spare_rx) = mpsc::channel(PAIR_CAPACITY);

        // Accumulation starts on First; Second is the spare. In auto mode it
        // goes straight in as the first switch request.
        let returned = if auto_project {
            switch_tx.clone()
        } else {
            spare_tx
        };
        returned
            .try_send(PairIndex::Second)
            .map_err(|e| PipelineError::stage_failed(ACCUMULATION, e.to_string()))?;

        let mut controls = Vec::with_capacity(5);
        let mut control = |stage: &'static str| {
            let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
            controls.push((stage, tx));
            rx
        };
        let acquisition_control = control(ACQUISITION);
        let accumulation_control = control(ACCUMULATION);
        let persistence_control = control(PERSISTENCE);
        let projection_control = control(PROJECTION);
        let display_control = control(DISPLAY);

        // Spawned upstream first; close joins in this order.
        let mut stages = Vec::with_capacity(5);

        let acquisition = AcquisitionStage {
            source,
            pool: Arc::clone(&pool),
            retry: config.acquisition.retry.clone(),
            monitor: monitor.clone(),
            control: acquisition_control,
            input: acquisition_rx,
            output: accumulation_tx.clone(),
        };
        stages.push(spawn_stage(ACQUISITION, run_id, monitor.clone(), move || {
            acquisition.run()
        })?);

        let accumulation = AccumulationStage {
            pool: Arc::clone(&pool),
            accumulators: Arc::clone(&accumulators),
            monitor: monitor.clone(),
            stats: Arc::clone(&stats),
            cap: config.accumulation.max_accumulated_frames,
            shape,
            active: PairIndex::First,
            pending: None,
            control: accumulation_control,
            switch: switch_rx,
            input: accumulation_rx,
            output: persistence_tx.clone(),
            handoff: handoff_tx.clone(),
        };
        stages.push(spawn_stage(ACCUMULATION, run_id, monitor.clone(), move || {
            accumulation.run()
        })?);

        let persistence = PersistenceStage {
            pool: Arc::clone(&pool),
            monitor: monitor.clone(),
            control: persistence_control,
            input: persistence_rx,
        };
        stages.push(spawn_stage(PERSISTENCE, run_id, monitor.clone(), move || {
            persistence.run()
        })?);

        let projection = ProjectionStage {
            accumulators: Arc::clone(&accumulators),
            displays: Arc::clone(&displays),
            monitor: monitor.clone(),
            control: projection_control,
            input: handoff_rx,
            free_display: free_display_rx,
            output: display_tx.clone(),
            returned,
            spare_display: Some(PairIndex::Second),
        };
        stages.push(spawn_stage(PROJECTION, run_id, monitor.clone(), move || {
            projection.run()
        })?);

        let display = DisplayStage {
            displays: Arc::clone(&displays),
            surface: Arc::clone(&surface),
            updates: updates_tx,
            monitor: monitor.clone(),
            control: display_control,
            input: display_rx,
            free: free_display_tx,
        };
        stages.push(spawn_stage(DISPLAY, run_id, monitor.clone(), move || {
            display.run()
        })?);

        info!(
            run = %run_id,
            buffers = buffer_count,
            %capacity,
            %shape,
            auto_project,
            "Pipeline started"
        );

        Ok(Self {
            run_id,
            config,
            pool,
            accumulators,
            displays,
            surface,
            updates,
            monitor,
            stats,
            acquisition_tx,
            accumulation_tx,
            persistence_tx,
            handoff_tx,
            display_tx,
            controls,
            switch_tx,
            spare_rx: tokio::sync::Mutex::new(spare_rx),
            ops: tokio::sync::Mutex::new(()),
            stages: Mutex::new(stages),
            closed: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Acquisition control
    // =========================================================================

    /// Dispatch `count` acquisitions.
    ///
    /// Waits for buffers returned by persistence until `timeout` (or the
    /// configured load timeout) runs out. `save_info`, when given, must hold
    /// one entry per acquisition, in order.
    ///
    /// Returns the number of acquisitions dispatched.
    ///
    /// # Errors
    /// - `Configuration` if `save_info` has the wrong length
    /// - `FeatureNotEnabled` for TIFF saves without `storage_tiff`
    /// - `StageFailed` once acquisition has failed
    /// - `BufferExhausted` if buffers ran out before the deadline; the
    ///   acquisitions already dispatched stay in flight
    /// - `Closed` after [`close`](Self::close), including when `close` is
    ///   called while this load is still waiting for buffers
    pub async fn load(
        &self,
        count: usize,
        save_info: Option<Vec<SaveInfo>>,
        timeout: Option<Duration>,
    ) -> PipelineResult<usize> {
        self.ensure_open()?;
        if let Some(saves) = &save_info {
            if saves.len() != count {
                return Err(PipelineError::Configuration(format!(
                    "save_info has {} entries for {} acquisitions",
                    saves.len(),
                    count
                )));
            }
            if !cfg!(feature = "storage_tiff") && saves.iter().any(|s| s.format == SaveFormat::Tiff)
            {
                return Err(PipelineError::FeatureNotEnabled("storage_tiff".to_string()));
            }
        }
        match self.monitor.stage_state(ACQUISITION) {
            Some(StageState::Failed(message)) => {
                return Err(PipelineError::stage_failed(ACQUISITION, message))
            }
            Some(StageState::Stopped) => return Err(PipelineError::Closed),
            _ => {}
        }

        let _ops = self.ops.lock().await;
        let timeout = timeout.unwrap_or_else(|| self.config.pool.load_timeout());
        let deadline = Instant::now() + timeout;
        let mut saves = save_info.map(Vec::into_iter);

        for dispatched in 0..count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(mut slip) = self.pool.take_timeout(remaining).await else {
                warn!(
                    requested = count,
                    dispatched,
                    timeout_ms = timeout.as_millis() as u64,
                    "Load ran out of raw buffers"
                );
                return Err(PipelineError::BufferExhausted {
                    requested: count,
                    dispatched,
                });
            };
            if self.is_closed() {
                self.pool.release(slip);
                return Err(PipelineError::Closed);
            }
            if let Some(saves) = saves.as_mut() {
                slip.set_save_info(saves.next());
            }
            debug!(index = %slip.index(), sequence = slip.sequence(), "Dispatching acquisition");

            if let Err(mpsc::error::SendError(token)) =
                self.acquisition_tx.send(Token::Item(slip)).await
            {
                if let Token::Item(slip) = token {
                    self.pool.release(slip);
                }
                return Err(PipelineError::Closed);
            }
        }
        Ok(count)
    }

    /// Change the logical stack shape.
    ///
    /// Waits for every raw buffer to come home, has every stage acknowledge
    /// the new shape, then reopens the pool. A partial accumulation is
    /// discarded.
    ///
    /// # Errors
    /// `InvalidShape` for an empty or oversized shape, `Timeout` if buffers
    /// do not drain or a stage does not answer in time, `StageFailed` if a
    /// stage is gone. On any error the previous shape stays in effect.
    pub async fn reshape(&self, shape: StackShape) -> PipelineResult<()> {
        self.ensure_open()?;
        self.pool.validate_shape(shape)?;

        let _ops = self.ops.lock().await;
        self.ensure_open()?;
        let previous = self.pool.shape();
        let timeout = self.config.pool.reshape_timeout();

        let Some(reservation) = self.pool.reserve_all(timeout).await else {
            return Err(PipelineError::Timeout(format!(
                "all {} raw buffers to become idle",
                self.pool.size()
            )));
        };

        let result = match self.broadcast_reshape(shape, timeout).await {
            Ok(()) => self.pool.set_shape(&reservation, shape),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(%previous, requested = %shape, error = %e, "Reshape failed; restoring previous shape");
            if let Err(rollback) = self.broadcast_reshape(previous, timeout).await {
                error!(%previous, error = %rollback, "Stages did not accept the previous shape");
            }
        }
        self.pool.release_all(reservation);

        if result.is_ok() {
            info!(%previous, %shape, "Pipeline reshaped");
        }
        result
    }

    async fn broadcast_reshape(&self, shape: StackShape, timeout: Duration) -> PipelineResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = Vec::with_capacity(self.controls.len());
        for (stage, control) in &self.controls {
            let (ack, answer) = oneshot::channel();
            control
                .send(ControlMessage::Reshape { shape, ack })
                .await
                .map_err(|_| PipelineError::stage_failed(*stage, "control channel closed"))?;
            pending.push((*stage, answer));
        }

        for (stage, answer) in pending {
            match tokio::time::timeout_at(deadline, answer).await {
                Ok(Ok(result)) => result?,
                Ok(Err(_)) => {
                    return Err(PipelineError::stage_failed(
                        stage,
                        "dropped the reshape acknowledgment",
                    ))
                }
                Err(_) => {
                    return Err(PipelineError::Timeout(format!(
                        "{} stage to acknowledge reshape",
                        stage
                    )))
                }
            }
        }
        Ok(())
    }

    /// Hand the current accumulation to projection.
    ///
    /// Waits for a spare accumulation buffer (bounded by the configured
    /// project timeout). If nothing has been accumulated yet, the switch
    /// happens when the next stack lands.
    ///
    /// # Errors
    /// `Configuration` in auto-project mode, `Timeout` if no spare buffer
    /// came back in time, `StageFailed` if accumulation is gone.
    pub async fn project(&self) -> PipelineResult<()> {
        self.ensure_open()?;
        if self.config.accumulation.auto_project {
            return Err(PipelineError::Configuration(
                "projection is automatic in auto_project mode".to_string(),
            ));
        }

        let spare = {
            let mut spare_rx = self.spare_rx.lock().await;
            match tokio::time::timeout(self.config.accumulation.project_timeout(), spare_rx.recv())
                .await
            {
                Ok(Some(index)) => index,
                Ok(None) => {
                    return Err(PipelineError::stage_failed(PROJECTION, "projection stage is gone"))
                }
                Err(_) => {
                    return Err(PipelineError::Timeout(
                        "a spare accumulation buffer".to_string(),
                    ))
                }
            }
        };

        debug!(spare = %spare, "Requesting accumulation switch");
        self.switch_tx
            .send(spare)
            .await
            .map_err(|_| PipelineError::stage_failed(ACCUMULATION, "switch channel closed"))
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Change the scaling policy and re-render the current projection.
    ///
    /// Bounds left as `None` keep their value. Returns the resulting
    /// `(mode, low, high)`.
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close), `StageFailed` if the display
    /// stage is gone.
    pub async fn set_scaling(
        &self,
        mode: ScalingMode,
        low: Option<i64>,
        high: Option<i64>,
    ) -> PipelineResult<ScalingSnapshot> {
        self.ensure_open()?;
        let control = self.control(DISPLAY).ok_or_else(display_closed)?;
        let (ack, answer) = oneshot::channel();
        control
            .send(ControlMessage::SetScaling {
                mode,
                low,
                high,
                ack,
            })
            .await
            .map_err(|_| display_closed())?;
        answer.await.map_err(|_| display_closed())?
    }

    /// Active `(mode, low, high)`.
    ///
    /// In auto modes the bounds are those of the latest render.
    #[must_use]
    pub fn get_scaling(&self) -> ScalingSnapshot {
        self.surface.read().scaling.snapshot()
    }

    /// Wait for a display update newer than `after_sequence`.
    ///
    /// # Errors
    /// `Timeout` if none arrives in time, `Closed` if the display stage
    /// stopped first.
    pub async fn wait_for_display(
        &self,
        after_sequence: u64,
        timeout: Duration,
    ) -> PipelineResult<DisplayUpdate> {
        let mut updates = self.updates.clone();
        let changed = updates.wait_for(|u| u.sequence > after_sequence);
        let waited = tokio::time::timeout(timeout, changed)
            .await
            .map(|changed| changed.map(|update| *update));
        match waited {
            Ok(Ok(update)) => Ok(update),
            Ok(Err(_)) => Err(PipelineError::Closed),
            Err(_) => Err(PipelineError::Timeout(format!(
                "display update after sequence {}",
                after_sequence
            ))),
        }
    }

    /// Latest display update.
    #[must_use]
    pub fn display_update(&self) -> DisplayUpdate {
        *self.updates.borrow()
    }

    /// Copy of the projection currently on display.
    #[must_use]
    pub fn current_projection(&self) -> Projection {
        let surface = self.surface.read();
        let buffer = self.displays.lock(surface.current, Holder::External);
        let (height, width) = buffer.dims();
        Projection {
            pixels: buffer.pixels().to_vec(),
            height,
            width,
            stacks: buffer.stacks(),
            sequence: surface.sequence,
        }
    }

    /// Copy of the current 8-bit render.
    #[must_use]
    pub fn rendered_frame(&self) -> RenderedFrame {
        let surface = self.surface.read();
        RenderedFrame {
            pixels: surface.rendered.clone(),
            height: surface.height,
            width: surface.width,
            sequence: surface.sequence,
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Wait until every raw buffer is back in the pool.
    ///
    /// # Errors
    /// `Timeout` if buffers are still in flight when `timeout` expires.
    pub async fn wait_idle(&self, timeout: Duration) -> PipelineResult<()> {
        if self.pool.wait_idle(timeout).await {
            Ok(())
        } else {
            let census = self.pool.census();
            Err(PipelineError::Timeout(format!(
                "{} raw buffers still in flight",
                census.in_flight
            )))
        }
    }

    /// Snapshot of pool, stages, display and counters.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            run_id: self.run_id,
            shape: self.pool.shape(),
            capacity: self.pool.capacity(),
            census: self.pool.census(),
            stages: self.monitor.stages(),
            health: self.monitor.system_health(),
            faults: self.monitor.faults().len(),
            display: self.display_update(),
            scaling: self.get_scaling(),
            accumulation: self.stats.snapshot(),
            auto_project: self.config.accumulation.auto_project,
            closed: self.is_closed(),
        }
    }

    /// Recorded faults, oldest first.
    #[must_use]
    pub fn faults(&self) -> Vec<PipelineFault> {
        self.monitor.faults()
    }

    /// Drain recorded faults, oldest first.
    pub fn take_faults(&self) -> Vec<PipelineFault> {
        self.monitor.take_faults()
    }

    /// Identifier attached to every stage span.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Configuration the pipeline was built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Raw buffer pool, for instrumentation.
    #[must_use]
    pub fn pool(&self) -> &Arc<RawBufferPool> {
        &self.pool
    }

    /// Accumulation buffers, for instrumentation.
    #[must_use]
    pub fn accumulators(&self) -> &Arc<AccumulationPair> {
        &self.accumulators
    }

    /// Display buffers, for instrumentation.
    #[must_use]
    pub fn displays(&self) -> &Arc<DisplayPair> {
        &self.displays
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop every stage, upstream first.
    ///
    /// Waits for an in-progress `load` or `reshape`, then gives each stage
    /// a poison token behind its queued work and joins it before the next
    /// one is poisoned. A `load` racing with `close` either dispatches a
    /// slip before the poison or releases it and returns `Closed`. Calling
    /// `close` again is a no-op.
    ///
    /// # Errors
    /// `StageFailed` if a stage thread panicked; the remaining stages are
    /// still shut down.
    pub async fn close(&self) -> PipelineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(run = %self.run_id, "Closing pipeline");

        // A load or reshape in progress finishes first; its slips are queued
        // ahead of the poison tokens.
        let _ops = self.ops.lock().await;
        let handles = std::mem::take(&mut *self.stages.lock());
        let mut result = Ok(());
        for handle in handles {
            let stage = handle.name;
            if !self.poison(stage).await {
                debug!(stage, "Stage input already closed");
            }

            let joined = tokio::task::spawn_blocking(move || handle.thread.join()).await;
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(_)) => Some("stage thread panicked".to_string()),
                Err(e) => Some(format!("failed to join stage thread: {}", e)),
            };
            if let Some(message) = failure {
                error!(stage, %message, "Stage did not shut down cleanly");
                self.monitor.report_fault(
                    stage,
                    FaultKind::StageExit,
                    FaultSeverity::Critical,
                    message.clone(),
                );
                self.monitor
                    .set_state(stage, StageState::Failed(message.clone()));
                if result.is_ok() {
                    result = Err(PipelineError::stage_failed(stage, message));
                }
            } else {
                debug!(stage, "Stage joined");
            }
        }

        let census = self.pool.census();
        info!(
            run = %self.run_id,
            idle = census.idle,
            in_flight = census.in_flight,
            faults = self.monitor.faults().len(),
            "Pipeline closed"
        );
        result
    }

    async fn poison(&self, stage: &'static str) -> bool {
        match stage {
            ACQUISITION => self.acquisition_tx.send(Token::Poison).await.is_ok(),
            ACCUMULATION => self.accumulation_tx.send(Token::Poison).await.is_ok(),
            PERSISTENCE => self.persistence_tx.send(Token::Poison).await.is_ok(),
            PROJECTION => self.handoff_tx.send(Token::Poison).await.is_ok(),
            DISPLAY => self.display_tx.send(Token::Poison).await.is_ok(),
            _ => false,
        }
    }

    fn control(&self, stage: &str) -> Option<&mpsc::Sender<ControlMessage>> {
        self.controls
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, tx)| tx)
    }

    fn ensure_open(&self) -> PipelineResult<()> {
        if self.is_closed() {
            Err(PipelineError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        // Stages wind down as their inputs close; threads are detached.
        warn!(run = %self.run_id, "Pipeline dropped without close()");
        let _ = self.acquisition_tx.try_send(Token::Poison);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("run_id", &self.run_id)
            .field("pool", &self.pool)
            .field("auto_project", &self.config.accumulation.auto_project)
            .field("closed", &self.is_closed())
            .finish()
    }
}
