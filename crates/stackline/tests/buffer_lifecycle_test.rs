//! Raw buffer conservation, backpressure and reshape.

mod common;

use anyhow::Result;
use common::{config, slow_camera, SHAPE, TIMEOUT};
use stackline::{Pipeline, PipelineError, SaveInfo, StackShape};
use stackline_driver_mock::SyntheticCamera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_buffers_are_conserved_under_load() -> Result<()> {
    let pipeline = Pipeline::create(3, SHAPE, SyntheticCamera::constant([1, 2, 3]))?;
    let pool = Arc::clone(pipeline.pool());
    let done = Arc::new(AtomicBool::new(false));

    let sampler = {
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut samples = 0u64;
            while !done.load(Ordering::Relaxed) {
                let census = pool.census();
                assert!(census.is_conserved(), "census broken: {:?}", census);
                assert_eq!(census.total, 3);
                samples += 1;
                tokio::task::yield_now().await;
            }
            samples
        })
    };

    // More acquisitions than buffers: load has to wait for returns.
    assert_eq!(pipeline.load(30, None, None).await?, 30);
    pipeline.wait_idle(TIMEOUT).await?;
    done.store(true, Ordering::Relaxed);
    assert!(sampler.await? > 0);

    let pool = pipeline.pool();
    assert_eq!(pool.total_loans(), 30);
    assert_eq!(pool.total_returns(), 30);
    assert_eq!(pipeline.status().accumulation.folded, 30);

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_buffers_are_unlocked() -> Result<()> {
    let pipeline = Pipeline::create(2, SHAPE, SyntheticCamera::constant([4]))?;
    pipeline.load(4, None, None).await?;
    pipeline.wait_idle(TIMEOUT).await?;

    let pool = pipeline.pool();
    let slips: Vec<_> = std::iter::from_fn(|| pool.try_take()).collect();
    assert_eq!(slips.len(), 2);
    for slip in &slips {
        let slot = pool.slot(slip.index());
        assert_eq!(slot.holder(), None);
        // Filled by acquisition, then folded by accumulation, at least once.
        assert!(slot.lock_count() >= 2);
    }
    for slip in slips {
        pool.release(slip);
    }

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_reports_exhaustion() -> Result<()> {
    // One buffer, 4 frames × 100 ms per stack.
    let pipeline = Pipeline::create(1, SHAPE, slow_camera(&[9], 100))?;

    let err = pipeline
        .load(3, None, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    match err {
        PipelineError::BufferExhausted {
            requested,
            dispatched,
        } => {
            assert_eq!(requested, 3);
            assert_eq!(dispatched, 1);
        }
        other => panic!("expected BufferExhausted, got {other:?}"),
    }

    // The dispatched stack still completes and comes home.
    pipeline.wait_idle(TIMEOUT).await?;
    assert!(pipeline.status().census.is_conserved());

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_rejects_mismatched_save_info() -> Result<()> {
    let pipeline = Pipeline::create(2, SHAPE, SyntheticCamera::constant([1]))?;

    let err = pipeline
        .load(2, Some(vec![SaveInfo::raw("/tmp/only_one.raw")]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
    assert_eq!(pipeline.pool().total_loans(), 0);

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_reshape_keeps_previous_shape() -> Result<()> {
    let pipeline = Pipeline::create(2, SHAPE, SyntheticCamera::constant([1]))?;

    for shape in [
        StackShape::new(5, 8, 8),
        StackShape::new(2, 9, 8),
        StackShape::new(0, 8, 8),
        StackShape::new(2, 8, 0),
    ] {
        let err = pipeline.reshape(shape).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::InvalidShape { requested, .. } if requested == shape),
            "unexpected error for {shape}: {err:?}"
        );
        assert_eq!(pipeline.status().shape, SHAPE);
    }

    // Reinterpreting within the allocation is fine, and so is going back.
    pipeline.reshape(StackShape::new(1, 4, 4)).await?;
    assert_eq!(pipeline.pool().shape(), StackShape::new(1, 4, 4));
    pipeline.reshape(SHAPE).await?;
    assert_eq!(pipeline.pool().shape(), SHAPE);

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reshape_waits_for_in_flight_buffers() -> Result<()> {
    let mut config = config(2);
    config.pool.reshape_timeout_ms = 50;
    let pipeline = Pipeline::builder()
        .config(config)
        .build(slow_camera(&[3], 100))?;

    pipeline.load(2, None, None).await?;
    let err = pipeline
        .reshape(StackShape::new(2, 8, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(_)));
    assert_eq!(pipeline.status().shape, SHAPE);

    pipeline.wait_idle(TIMEOUT).await?;
    pipeline.reshape(StackShape::new(2, 8, 8)).await?;
    assert_eq!(pipeline.status().shape, StackShape::new(2, 8, 8));
    assert_eq!(pipeline.status().census.idle, 2);

    // New slips carry the new shape.
    pipeline.load(1, None, None).await?;
    pipeline.project().await?;
    let update = pipeline.wait_for_display(0, TIMEOUT).await?;
    assert_eq!(update.stacks, 1);

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reshape_discards_partial_accumulation() -> Result<()> {
    let pipeline = Pipeline::create(2, SHAPE, SyntheticCamera::constant([50, 7]))?;

    // Sequence 0 (50) is accumulated, then thrown away by the reshape.
    pipeline.load(1, None, None).await?;
    pipeline.wait_idle(TIMEOUT).await?;
    pipeline.reshape(StackShape::new(3, 8, 8)).await?;

    pipeline.load(1, None, None).await?;
    pipeline.wait_idle(TIMEOUT).await?;
    pipeline.project().await?;
    let update = pipeline.wait_for_display(0, TIMEOUT).await?;
    assert_eq!(update.stacks, 1);
    assert!(pipeline.current_projection().pixels.iter().all(|&p| p == 7));

    pipeline.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_during_load_returns_every_buffer() -> Result<()> {
    // Two buffers, 400 ms per stack: the third acquisition waits for a
    // return while close is already under way.
    let pipeline = Arc::new(Pipeline::create(2, SHAPE, slow_camera(&[1], 100))?);
    let loader = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.load(3, None, Some(TIMEOUT)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.close().await?;

    let result = loader.await?;
    assert!(
        matches!(result, Ok(3) | Err(PipelineError::Closed)),
        "unexpected load result: {result:?}"
    );

    let census = pipeline.status().census;
    assert_eq!(census.in_flight, 0, "census after close: {census:?}");
    assert_eq!(census.idle, 2);
    assert_eq!(pipeline.pool().total_loans(), pipeline.pool().total_returns());

    // Anything after close is refused without taking a buffer.
    let loans = pipeline.pool().total_loans();
    assert!(matches!(
        pipeline.load(1, None, None).await,
        Err(PipelineError::Closed)
    ));
    assert_eq!(pipeline.pool().total_loans(), loans);
    Ok(())
}
