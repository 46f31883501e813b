//! Presentation timestamps for produced frames.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Rational time base: one tick lasts `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// Microsecond ticks.
    pub const MICROS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000,
    };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// One tick per frame at the given integer rate, e.g. `1/25`.
    pub const fn per_frame(fps: i32) -> Self {
        Self { num: 1, den: fps }
    }

    /// Tick length in seconds. A zero denominator yields 0.
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MICROS
    }
}

#[derive(Debug)]
struct PtsState {
    time_base: TimeBase,
    current: i64,
    start: i64,
}

/// Hands out consecutive presentation timestamps to a producer.
///
/// Safe to share between threads; each call to [`next_pts`](Self::next_pts) returns a
/// distinct value.
#[derive(Debug)]
pub struct PtsCounter {
    state: Mutex<PtsState>,
}

impl PtsCounter {
    pub fn new(time_base: TimeBase) -> Self {
        tracing::debug!(num = time_base.num, den = time_base.den, "PTS counter created");
        Self {
            state: Mutex::new(PtsState {
                time_base,
                current: 0,
                start: 0,
            }),
        }
    }

    pub fn time_base(&self) -> TimeBase {
        self.state.lock().time_base
    }

    pub fn set_time_base(&self, time_base: TimeBase) {
        self.state.lock().time_base = time_base;
        tracing::debug!(num = time_base.num, den = time_base.den, "PTS time base changed");
    }

    /// Returns the current PTS and advances by one tick.
    pub fn next_pts(&self) -> i64 {
        let mut state = self.state.lock();
        let pts = state.current;
        state.current += 1;
        pts
    }

    /// Rewinds to the configured start PTS.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current = state.start;
    }

    /// Sets the start PTS and rewinds to it.
    pub fn set_start(&self, start_pts: i64) {
        let mut state = self.state.lock();
        state.start = start_pts;
        state.current = start_pts;
    }

    pub fn pts_to_seconds(&self, pts: i64) -> f64 {
        self.time_base().as_f64() * pts as f64
    }

    /// Converts seconds to ticks, truncating toward zero. A degenerate time base maps to 0.
    pub fn seconds_to_pts(&self, seconds: f64) -> i64 {
        let tick = self.time_base().as_f64();
        if tick == 0.0 {
            return 0;
        }
        (seconds / tick) as i64
    }
}

impl Default for PtsCounter {
    fn default() -> Self {
        Self::new(TimeBase::default())
    }
}
