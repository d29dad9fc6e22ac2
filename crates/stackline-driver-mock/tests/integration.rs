//! Synthetic camera driven through the `FrameSource` trait object.

use stackline_core::{retry_transient, DeviceErrorKind, FrameSource, RetryPolicy, StackShape};
use stackline_driver_mock::{
    ErrorConfig, ErrorScenario, MockMode, StackPattern, SyntheticCamera, SyntheticConfig,
    TimingConfig,
};
use std::time::Duration;

#[test]
fn boxed_source_fills_constants() {
    let mut source: Box<dyn FrameSource> = Box::new(SyntheticCamera::constant([10, 20, 30]));
    let shape = StackShape::new(4, 8, 8);
    let mut stack = vec![0u16; shape.len()];

    source.arm().unwrap();
    for (sequence, expected) in [(0u64, 10u16), (1, 20), (2, 30)] {
        source.fill(&mut stack, shape, sequence).unwrap();
        assert!(stack.iter().all(|&v| v == expected));
    }
    source.disarm().unwrap();
    assert_eq!(source.name(), "synthetic");
}

#[test]
fn realistic_mode_takes_readout_time() {
    let mut camera = SyntheticCamera::with_config(SyntheticConfig {
        pattern: StackPattern::Gradient,
        mode: MockMode::Realistic,
        timing: TimingConfig {
            frame_readout_ms: 5,
            arm_delay_ms: 0,
        },
        ..SyntheticConfig::default()
    });
    let shape = StackShape::new(2, 4, 4);
    let mut stack = vec![0u16; shape.len()];

    let report = camera.fill(&mut stack, shape, 0).unwrap();
    assert!(report.elapsed >= Duration::from_millis(10));
}

#[tokio::test]
async fn transient_faults_recover_under_retry() {
    let mut camera = SyntheticCamera::constant([3]).with_errors(ErrorConfig::scenario(
        ErrorScenario::Transient {
            count: 2,
            kind: DeviceErrorKind::Transfer,
        },
    ));
    let stats = camera.stats();
    let shape = StackShape::new(1, 2, 2);
    let mut stack = vec![0u16; shape.len()];
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff_delay: Duration::from_millis(1),
    };

    let (_, attempts) = retry_transient(
        &policy,
        |_| camera.fill(&mut stack, shape, 0),
        |err| err.is_transient(),
    )
    .await
    .unwrap();

    assert_eq!(attempts, 3);
    assert_eq!(stats.failures(), 2);
    assert_eq!(stack, vec![3; 4]);
}
