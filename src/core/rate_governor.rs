//! # Rate Governor
//!
//! Paces a periodic activity (the consumer's render loop) against a target rate.
//!
//! Each [`RateGovernor::tick`] compares the time since the previous tick with the target
//! interval:
//!
//! - **Early**: sleep for the remainder of the interval
//! - **Slightly late**: return immediately, the next interval absorbs the lag
//! - **Badly late** (more than two intervals since the last tick): return immediately and
//!   count a dropped tick instead of trying to catch up
//!
//! Statistics are computed over a rolling window of the most recent inter-tick intervals,
//! so mean and variance describe recent jitter rather than the whole run.
//!
//! ## Example
//!
//! ```rust
//! use frame_pipeline::core::rate_governor::RateGovernor;
//!
//! let governor = RateGovernor::new(100.0).unwrap();
//! for _ in 0..5 {
//!     governor.tick();
//! }
//! let stats = governor.stats();
//! assert_eq!(stats.tick_count, 5);
//! assert_eq!(stats.target_rate, 100.0);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{PipelineError, PipelineResult};

/// Number of inter-tick intervals kept for mean and variance.
pub const HISTORY_WINDOW: usize = 100;

/// Snapshot of governor timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorStats {
    /// Ticks per second since the governor was created or last reset
    pub current_rate: f64,
    pub target_rate: f64,
    pub tick_count: u64,
    pub dropped_count: u64,
    /// Mean inter-tick interval over the rolling window, in milliseconds
    pub mean_interval_ms: f64,
    /// Variance of the inter-tick interval over the rolling window, in ms²
    pub interval_variance: f64,
}

impl fmt::Display for GovernorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}/{:.2} fps, {} ticks, {} dropped, interval {:.2}ms (var {:.3})",
            self.current_rate,
            self.target_rate,
            self.tick_count,
            self.dropped_count,
            self.mean_interval_ms,
            self.interval_variance
        )
    }
}

#[derive(Debug)]
struct GovernorState {
    target_rate: f64,
    interval: Duration,
    started: Instant,
    last_tick: Option<Instant>,
    tick_count: u64,
    dropped_count: u64,
    history: VecDeque<f64>,
}

impl GovernorState {
    fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            if self.history.len() == HISTORY_WINDOW {
                self.history.pop_front();
            }
            self.history
                .push_back(now.duration_since(last).as_secs_f64() * 1000.0);
        }
        self.last_tick = Some(now);
        self.tick_count += 1;
    }
}

/// Tracks tick timing against a target rate. All methods take `&self`; the target
/// rate may be changed from another thread while ticking is in progress.
#[derive(Debug)]
pub struct RateGovernor {
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    /// # Errors
    ///
    /// [`PipelineError::Config`] if `target_rate` is not a finite positive number.
    pub fn new(target_rate: f64) -> PipelineResult<Self> {
        let interval = interval_for(target_rate)?;
        Ok(Self {
            state: Mutex::new(GovernorState {
                target_rate,
                interval,
                started: Instant::now(),
                last_tick: None,
                tick_count: 0,
                dropped_count: 0,
                history: VecDeque::with_capacity(HISTORY_WINDOW),
            }),
        })
    }

    /// Paces the caller to the target rate. Returns how long it slept.
    ///
    /// The first tick after creation or reset is measured from that moment, so it
    /// waits out a full interval like every other tick. The lock is not held while
    /// sleeping, so stats and rate changes stay responsive.
    pub fn tick(&self) -> Duration {
        self.tick_with(std::thread::sleep)
    }

    /// Like [`tick`](Self::tick), but waits through `sleep` instead of
    /// `std::thread::sleep`, so the caller can cut the wait short (e.g. on shutdown).
    pub fn tick_with(&self, sleep: impl FnOnce(Duration)) -> Duration {
        let sleep_for = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_tick.unwrap_or(state.started));
            if elapsed > state.interval.saturating_mul(2) {
                state.dropped_count += 1;
                tracing::trace!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    dropped = state.dropped_count,
                    "Tick badly behind schedule"
                );
                state.record(now);
                return Duration::ZERO;
            }
            state.interval.saturating_sub(elapsed)
        };

        if !sleep_for.is_zero() {
            sleep(sleep_for);
        }
        self.state.lock().record(Instant::now());
        sleep_for
    }

    /// Records a tick without pacing, for callers that run unthrottled but still want
    /// the observed rate and jitter.
    pub fn observe(&self) {
        self.state.lock().record(Instant::now());
    }

    /// Changes the target rate. Takes effect from the next tick.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] if `rate` is not a finite positive number. The previous
    /// rate stays in force.
    pub fn set_target_rate(&self, rate: f64) -> PipelineResult<()> {
        let interval = interval_for(rate)?;
        let mut state = self.state.lock();
        let previous = state.target_rate;
        state.target_rate = rate;
        state.interval = interval;
        drop(state);
        tracing::info!(previous, rate, "Target rate changed");
        Ok(())
    }

    pub fn target_rate(&self) -> f64 {
        self.state.lock().target_rate
    }

    pub fn target_interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Ticks per second since creation or the last reset; 0 before the first tick.
    pub fn current_rate(&self) -> f64 {
        let state = self.state.lock();
        Self::rate_of(&state)
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.lock().dropped_count
    }

    pub fn stats(&self) -> GovernorStats {
        let state = self.state.lock();
        let (mean, variance) = mean_and_variance(&state.history);
        GovernorStats {
            current_rate: Self::rate_of(&state),
            target_rate: state.target_rate,
            tick_count: state.tick_count,
            dropped_count: state.dropped_count,
            mean_interval_ms: mean,
            interval_variance: variance,
        }
    }

    /// Clears counters, timestamps and history. The target rate is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.started = Instant::now();
        state.last_tick = None;
        state.tick_count = 0;
        state.dropped_count = 0;
        state.history.clear();
    }

    fn rate_of(state: &GovernorState) -> f64 {
        if state.tick_count == 0 {
            return 0.0;
        }
        let elapsed = state.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            state.tick_count as f64 / elapsed
        } else {
            0.0
        }
    }
}

fn interval_for(rate: f64) -> PipelineResult<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PipelineError::config(
            "target_rate",
            rate.to_string(),
            "must be a finite number greater than 0",
        ));
    }
    Duration::try_from_secs_f64(1.0 / rate).map_err(|_| {
        PipelineError::config(
            "target_rate",
            rate.to_string(),
            "interval between ticks is too long to represent",
        )
    })
}

fn mean_and_variance(samples: &VecDeque<f64>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}
