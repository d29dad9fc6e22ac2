//! Stage workers.
//!
//! Every stage runs on a dedicated, named OS thread hosting a current-thread
//! Tokio runtime, so stages execute in parallel and block only on their own
//! channels. Each loop polls with `tokio::select! { biased; ... }`: the
//! control channel first, then any stage-specific side channel, then data.
//!
//! ```text
//! load() ──slip──▶ Acquisition ──slip──▶ Accumulation ──slip──▶ Persistence ──▶ pool
//!                                            │    ▲
//!                                    handoff │    │ switch (spare accumulation index)
//!                                            ▼    │
//!                                         Projection ──display index──▶ Display
//!                                            ▲                             │
//!                                            └──────── previous index ─────┘
//! ```

pub mod accumulation;
pub mod acquisition;
pub mod display;
pub mod persistence;
pub mod projection;

use crate::message::{ControlMessage, Token};
use stackline_core::{
    FaultKind, FaultSeverity, PipelineError, PipelineResult, StageMonitor, StageState,
};
use stackline_pool::{PermissionSlip, RawBufferPool};
use std::future::Future;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Acquisition stage name.
pub const ACQUISITION: &str = "acquisition";
/// Accumulation stage name.
pub const ACCUMULATION: &str = "accumulation";
/// Persistence stage name.
pub const PERSISTENCE: &str = "persistence";
/// Projection stage name.
pub const PROJECTION: &str = "projection";
/// Display stage name.
pub const DISPLAY: &str = "display";

/// Join handle of a running stage thread.
#[derive(Debug)]
pub(crate) struct StageHandle {
    pub(crate) name: &'static str,
    pub(crate) thread: JoinHandle<()>,
}

/// Spawn `body` on its own thread and runtime, tracking it in `monitor`.
///
/// `body` is called on the new thread, so the future it returns does not
/// need to be `Send`.
pub(crate) fn spawn_stage<F, Fut>(
    name: &'static str,
    run_id: Uuid,
    monitor: StageMonitor,
    body: F,
) -> PipelineResult<StageHandle>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = PipelineResult<()>>,
{
    monitor.register(name);
    let thread = std::thread::Builder::new()
        .name(format!("stackline-{}", name))
        .spawn(move || {
            let span = tracing::info_span!("stage", stage = name, run = %run_id);
            let _entered = span.enter();

            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build stage runtime");
                    monitor.set_state(name, StageState::Failed(e.to_string()));
                    return;
                }
            };

            monitor.set_state(name, StageState::Running);
            tracing::debug!("Stage started");

            match runtime.block_on(body()) {
                Ok(()) => {
                    monitor.set_state(name, StageState::Stopped);
                    tracing::debug!("Stage stopped");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stage exited with error");
                    monitor.report_fault(
                        name,
                        FaultKind::StageExit,
                        FaultSeverity::Critical,
                        e.to_string(),
                    );
                    monitor.set_state(name, StageState::Failed(e.to_string()));
                }
            }
        })?;

    Ok(StageHandle { name, thread })
}

/// Send `slip` downstream; if the next stage is gone, return it to the pool.
pub(crate) async fn forward_slip(
    output: &mpsc::Sender<Token<PermissionSlip>>,
    pool: &RawBufferPool,
    slip: PermissionSlip,
    stage: &'static str,
    next: &'static str,
) -> PipelineResult<()> {
    if let Err(mpsc::error::SendError(token)) = output.send(Token::Item(slip)).await {
        if let Token::Item(slip) = token {
            pool.release(slip);
        }
        return Err(PipelineError::stage_failed(
            stage,
            format!("{} input closed", next),
        ));
    }
    Ok(())
}

/// Acknowledge control messages for stages that keep no shape state.
pub(crate) fn ack_passive(stage: &'static str, message: ControlMessage) {
    match message {
        ControlMessage::Reshape { shape, ack } => {
            tracing::debug!(stage, %shape, "Reshape acknowledged");
            let _ = ack.send(Ok(()));
        }
        ControlMessage::SetScaling { ack, .. } => {
            let _ = ack.send(Err(PipelineError::Configuration(format!(
                "{} stage does not handle scaling",
                stage
            ))));
        }
    }
}
