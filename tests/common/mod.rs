//! Common test utilities and helpers for the frame pipeline tests
//!
//! This module provides mock sinks, frame helpers and assertions shared by the
//! integration tests.

#![allow(dead_code)]

/// Mock sinks that record or misbehave in controlled ways
pub mod mock_sinks {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::{Result, bail};
    use frame_pipeline::{FrameBuffer, FrameSink};
    use parking_lot::{Condvar, Mutex};

    /// One observed render call
    #[derive(Debug, Clone, Copy)]
    pub struct RenderRecord {
        pub pts: Option<i64>,
        pub slot: u64,
        pub at: Instant,
    }

    /// Shared view of what a [`RecordingSink`] saw, readable after the sink has been
    /// moved into a pipeline
    #[derive(Debug, Clone, Default)]
    pub struct RenderLog {
        records: Arc<Mutex<Vec<RenderRecord>>>,
        rate_hints: Arc<Mutex<Vec<f64>>>,
    }

    impl RenderLog {
        pub fn count(&self) -> usize {
            self.records.lock().len()
        }

        pub fn pts(&self) -> Vec<Option<i64>> {
            self.records.lock().iter().map(|r| r.pts).collect()
        }

        pub fn records(&self) -> Vec<RenderRecord> {
            self.records.lock().clone()
        }

        pub fn rate_hints(&self) -> Vec<f64> {
            self.rate_hints.lock().clone()
        }
    }

    /// Records every frame it renders; optionally fails every `fail_every`-th call
    pub struct RecordingSink {
        log: RenderLog,
        calls: u64,
        fail_every: Option<u64>,
        delay: Option<Duration>,
    }

    impl RecordingSink {
        pub fn new() -> (Self, RenderLog) {
            let log = RenderLog::default();
            (
                Self {
                    log: log.clone(),
                    calls: 0,
                    fail_every: None,
                    delay: None,
                },
                log,
            )
        }

        /// Fail the n-th, 2n-th, ... render call (failures are not recorded)
        pub fn failing_every(mut self, n: u64) -> Self {
            self.fail_every = Some(n.max(1));
            self
        }

        /// Simulate a slow renderer
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl FrameSink for RecordingSink {
        fn render(&mut self, frame: &FrameBuffer) -> Result<()> {
            self.calls += 1;
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if let Some(n) = self.fail_every {
                if self.calls % n == 0 {
                    bail!("simulated render failure on call {}", self.calls);
                }
            }
            self.log.records.lock().push(RenderRecord {
                pts: frame.timing.pts,
                slot: frame.slot_id(),
                at: Instant::now(),
            });
            Ok(())
        }

        fn set_target_rate(&mut self, rate: f64) {
            self.log.rate_hints.lock().push(rate);
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Gate shared between a test and a [`BlockingSink`]
    #[derive(Debug, Default)]
    pub struct Gate {
        state: Mutex<GateState>,
        changed: Condvar,
    }

    #[derive(Debug, Default)]
    struct GateState {
        open: bool,
        entered: u64,
        finished: u64,
        rate_hints: Vec<f64>,
    }

    impl Gate {
        pub fn open(&self) {
            self.state.lock().open = true;
            self.changed.notify_all();
        }

        pub fn entered(&self) -> u64 {
            self.state.lock().entered
        }

        pub fn finished(&self) -> u64 {
            self.state.lock().finished
        }

        pub fn rate_hints(&self) -> Vec<f64> {
            self.state.lock().rate_hints.clone()
        }

        /// Wait until at least `n` renders have entered the sink
        pub fn wait_entered(&self, n: u64, timeout: Duration) -> bool {
            let deadline = Instant::now() + timeout;
            let mut state = self.state.lock();
            while state.entered < n {
                if self.changed.wait_until(&mut state, deadline).timed_out() {
                    return state.entered >= n;
                }
            }
            true
        }
    }

    /// Blocks inside `render` until its gate is opened, simulating a stuck renderer
    pub struct BlockingSink {
        gate: Arc<Gate>,
    }

    impl BlockingSink {
        pub fn new() -> (Self, Arc<Gate>) {
            let gate = Arc::new(Gate::default());
            (
                Self {
                    gate: Arc::clone(&gate),
                },
                gate,
            )
        }
    }

    impl FrameSink for BlockingSink {
        fn render(&mut self, _frame: &FrameBuffer) -> Result<()> {
            let mut state = self.gate.state.lock();
            state.entered += 1;
            self.gate.changed.notify_all();
            while !state.open {
                self.gate.changed.wait(&mut state);
            }
            state.finished += 1;
            Ok(())
        }

        fn set_target_rate(&mut self, rate: f64) {
            self.gate.state.lock().rate_hints.push(rate);
        }

        fn name(&self) -> &str {
            "blocking"
        }
    }
}

/// Frame helpers and constants
pub mod test_frames {
    use frame_pipeline::{BufferPool, BufferShape, FrameBuffer, PixelLayout};

    /// Standard test shapes
    pub const VGA: BufferShape = BufferShape {
        width: 640,
        height: 480,
        layout: PixelLayout::Yuv420p,
    };
    pub const HD: BufferShape = BufferShape {
        width: 1280,
        height: 720,
        layout: PixelLayout::Yuv420p,
    };
    pub const TINY: BufferShape = BufferShape {
        width: 8,
        height: 8,
        layout: PixelLayout::Rgba,
    };

    /// Allocate a frame from `pool` stamped with `pts`
    pub fn frame_with_pts(pool: &BufferPool, shape: BufferShape, pts: i64) -> FrameBuffer {
        let mut frame = pool.allocate(shape).expect("pool has room for test frame");
        frame.timing.pts = Some(pts);
        frame
    }
}

/// Custom assertions and polling helpers
pub mod assertions {
    use std::time::{Duration, Instant};

    use frame_pipeline::PoolStats;

    /// Assert the pool's accounting is internally consistent
    pub fn assert_pool_consistent(stats: &PoolStats, capacity: usize) {
        assert_eq!(
            stats.total,
            stats.in_use + stats.idle,
            "total must equal in_use + idle: {:?}",
            stats
        );
        assert!(stats.total <= capacity, "pool over capacity: {:?}", stats);
        assert!(stats.peak <= capacity, "peak over capacity: {:?}", stats);
    }

    /// Poll `condition` until it holds or `timeout` passes
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    /// Assert `actual` is within `tolerance` of `expected`
    pub fn assert_duration_near(actual: Duration, expected: Duration, tolerance: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= tolerance,
            "expected {:?} ± {:?}, got {:?}",
            expected,
            tolerance,
            actual
        );
    }
}
