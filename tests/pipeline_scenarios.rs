//! End-to-end scenarios for the pool, the channel, the governor and the pipeline.

mod common;

use std::time::{Duration, Instant};

use common::assertions::{assert_duration_near, assert_pool_consistent, wait_until};
use common::mock_sinks::RecordingSink;
use common::test_frames::{VGA, frame_with_pts};
use frame_pipeline::{
    BoundedChannel, BufferPool, FramePipelineBuilder, PipelineConfig, PushError, RateGovernor,
    Submitted,
};

#[test]
fn scenario_a_channel_backpressure() {
    let channel = BoundedChannel::new(3);
    for item in 1..=3 {
        channel.push_timeout(item, None).unwrap();
    }

    let start = Instant::now();
    let result = channel.push_timeout(4, Some(Duration::from_millis(50)));
    let waited = start.elapsed();
    assert_eq!(result, Err(PushError::Timeout(4)));
    assert!(waited >= Duration::from_millis(50));
    assert!(waited < Duration::from_millis(500));

    assert_eq!(channel.pop_timeout(Some(Duration::ZERO)), Ok(1));
    channel.push_timeout(4, Some(Duration::ZERO)).unwrap();
    assert_eq!(channel.len(), 3);
}

#[test]
fn scenario_b_pool_exhaustion_and_reuse() {
    let pool = BufferPool::new(2);
    let first = pool.allocate(VGA).unwrap();
    let second = pool.allocate(VGA).unwrap();
    assert_ne!(first.slot_id(), second.slot_id());

    let err = pool.allocate(VGA).unwrap_err();
    assert_eq!(err.category(), "resource_exhausted");

    let released = second.slot_id();
    pool.release(second).unwrap();
    let third = pool.allocate(VGA).unwrap();
    assert_eq!(third.slot_id(), released);

    let stats = pool.stats();
    assert_pool_consistent(&stats, 2);
    assert_eq!(stats.in_use, 2);
    drop((first, third));
}

#[test]
fn scenario_c_drop_policy_at_threshold() {
    let (sink, log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new()
        .config(PipelineConfig::default().with_queue_capacity(10))
        .sink(sink)
        .build()
        .unwrap();
    let pool = pipeline.pool().unwrap();
    pipeline.start().unwrap();
    // hold the consumer so the queue only fills
    pipeline.pause().unwrap();

    let mut outcomes = Vec::new();
    for pts in 0..9 {
        let frame = frame_with_pts(&pool, VGA, pts);
        outcomes.push(pipeline.submit(frame, Some(Duration::ZERO)).unwrap());
    }

    assert_eq!(outcomes[..8], [Submitted::Queued; 8]);
    assert_eq!(outcomes[8], Submitted::Dropped);

    let stats = pipeline.stats();
    assert_eq!(stats.total_dropped, 1);
    assert_eq!(stats.total_submitted, 8);
    assert_eq!(stats.queue_size, 8);
    assert!(stats.queue_size <= stats.queue_capacity);
    // the dropped frame went straight back to the pool
    assert_eq!(pool.stats().in_use, 8);
    assert_eq!(log.count(), 0);

    pipeline.stop().unwrap();
}

#[test]
fn scenario_d_immediate_stop() {
    let (sink, _log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new().sink(sink).build().unwrap();

    pipeline.start().unwrap();
    let start = Instant::now();
    pipeline.stop().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));

    let stats = pipeline.stats();
    assert!(!stats.is_running);
    assert!(!stats.is_paused);
    assert_eq!(stats.total_rendered, 0);
}

#[test]
fn frames_render_in_submission_order() {
    let (sink, log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new()
        .config(
            PipelineConfig::default()
                .with_pacing(false)
                .with_drop_policy(false),
        )
        .sink(sink)
        .build()
        .unwrap();
    let pool = pipeline.pool().unwrap();
    pipeline.start().unwrap();

    for pts in 0..50 {
        let frame = frame_with_pts(&pool, VGA, pts);
        assert_eq!(pipeline.submit(frame, None).unwrap(), Submitted::Queued);
    }
    assert!(wait_until(Duration::from_secs(5), || log.count() == 50));
    pipeline.stop().unwrap();

    let expected: Vec<Option<i64>> = (0..50).map(Some).collect();
    assert_eq!(log.pts(), expected);

    let stats = pipeline.stats();
    assert_eq!(stats.total_submitted, 50);
    assert_eq!(stats.total_rendered, 50);
    assert_eq!(stats.total_dropped, 0);

    // every buffer is back in the pool, and reuse kept the pool small
    let pool_stats = pool.stats();
    assert_eq!(pool_stats.in_use, 0);
    assert!(pool_stats.total <= 20);
}

#[test]
fn paced_pipeline_holds_target_rate() {
    let (sink, log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new()
        .config(
            PipelineConfig::default()
                .with_target_rate(50.0)
                .with_drop_policy(false),
        )
        .sink(sink)
        .build()
        .unwrap();
    let pool = pipeline.pool().unwrap();
    pipeline.start().unwrap();

    for pts in 0..15 {
        let frame = frame_with_pts(&pool, VGA, pts);
        pipeline.submit(frame, None).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || log.count() == 15));
    pipeline.stop().unwrap();

    let records = log.records();
    let span = records[14].at - records[0].at;
    // 14 intervals at 20ms each
    assert_duration_near(span, Duration::from_millis(280), Duration::from_millis(150));
}

#[test]
fn governor_pacing_matches_target_rate() {
    let governor = RateGovernor::new(50.0).unwrap();

    let start = Instant::now();
    for _ in 0..25 {
        governor.tick();
    }
    // 25 ticks at 50/s from a fresh governor
    assert_duration_near(
        start.elapsed(),
        Duration::from_millis(500),
        Duration::from_millis(60),
    );

    let stats = governor.stats();
    assert_eq!(stats.tick_count, 25);
    assert_eq!(stats.dropped_count, 0);
    assert!((stats.mean_interval_ms - 20.0).abs() < 10.0);
}

#[test]
fn fresh_governor_k_ticks_take_k_intervals() {
    let governor = RateGovernor::new(20.0).unwrap();
    let start = Instant::now();
    for _ in 0..5 {
        governor.tick();
    }
    assert_duration_near(
        start.elapsed(),
        Duration::from_millis(250),
        Duration::from_millis(40),
    );
}

#[test]
fn first_two_renders_after_start_are_paced() {
    let (sink, log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new()
        .config(
            PipelineConfig::default()
                .with_target_rate(10.0)
                .with_drop_policy(false),
        )
        .sink(sink)
        .build()
        .unwrap();
    let pool = pipeline.pool().unwrap();
    pipeline.start().unwrap();

    for pts in 0..3 {
        let frame = frame_with_pts(&pool, VGA, pts);
        pipeline.submit(frame, None).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || log.count() == 3));
    pipeline.stop().unwrap();

    let records = log.records();
    let first_gap = records[1].at - records[0].at;
    let second_gap = records[2].at - records[1].at;
    assert!(first_gap >= Duration::from_millis(60), "first gap {:?}", first_gap);
    assert_duration_near(second_gap, Duration::from_millis(100), Duration::from_millis(40));
}

#[test]
fn governor_late_tick_drops_instead_of_stalling() {
    let governor = RateGovernor::new(40.0).unwrap();
    governor.tick();
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    let slept = governor.tick();
    assert_eq!(slept, Duration::ZERO);
    assert!(start.elapsed() < Duration::from_millis(20));
    assert_eq!(governor.stats().dropped_count, 1);

    // back on schedule: the next tick sleeps again
    assert!(governor.tick() > Duration::ZERO);
    assert_eq!(governor.stats().dropped_count, 1);
}

#[test]
fn rate_change_applies_to_governor_and_sink() {
    let (sink, log) = RecordingSink::new();
    let pipeline = FramePipelineBuilder::new().sink(sink).build().unwrap();

    pipeline.set_target_rate(60.0).unwrap();
    assert_eq!(pipeline.stats().target_rate, 60.0);
    // the sink hears about it once a consumer is running
    assert!(log.rate_hints().is_empty());

    pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || log.rate_hints() == vec![60.0]));

    assert!(pipeline.set_target_rate(-1.0).is_err());
    assert_eq!(pipeline.stats().target_rate, 60.0);

    pipeline.set_target_rate(24.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || log.rate_hints() == vec![60.0, 24.0]));
    pipeline.stop().unwrap();
}
