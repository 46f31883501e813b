//! # Frame Pipeline
//!
//! Composes the buffer pool, the bounded channel and the rate governor with a
//! [`FrameSink`] into a runnable unit with an explicit lifecycle.
//!
//! ## Architecture
//!
//! ```text
//!  producers                    FramePipeline                         consumer thread
//! ┌──────────┐ submit ┌──────────────────────────────┐  pop   ┌──────────────────────┐
//! │ allocate │───────▶│ drop policy ─▶ BoundedChannel │───────▶│ sink.render(frame)   │
//! │ fill     │        └──────────────────────────────┘        │ pool.release(frame)  │
//! └──────────┘                                                 │ governor.tick()      │
//!      ▲                          release                      └──────────┬───────────┘
//!      └──────────────────────── BufferPool ◀────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `Stopped --start--> Running --pause--> Paused --resume--> Running --stop--> Stopped`
//!
//! - `start` is a no-op while already running or paused
//! - `stop` is idempotent and returns only once the consumer thread has exited, so no
//!   sink call happens after it returns. The wait is bounded by `stop_timeout_ms`
//! - while paused the consumer neither pops nor ticks, but `submit` keeps accepting
//!   frames up to channel capacity
//! - frames still queued at `stop` are kept for the next `start`
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use frame_pipeline::config::PipelineConfig;
//! use frame_pipeline::core::frame::{BufferShape, PixelLayout};
//! use frame_pipeline::pipeline::{FramePipelineBuilder, Submitted};
//! use frame_pipeline::sink::NullSink;
//!
//! let pipeline = FramePipelineBuilder::new()
//!     .config(PipelineConfig::default().with_pacing(false))
//!     .sink(NullSink::new())
//!     .build()
//!     .unwrap();
//! pipeline.start().unwrap();
//!
//! let pool = pipeline.pool().unwrap();
//! let frame = pool.allocate(BufferShape::new(320, 240, PixelLayout::Yuv420p)).unwrap();
//! let outcome = pipeline.submit(frame, Some(Duration::from_millis(100))).unwrap();
//! assert_eq!(outcome, Submitted::Queued);
//!
//! pipeline.stop().unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::PipelineConfig;
use crate::core::buffer_pool::BufferPool;
use crate::core::channel::{BoundedChannel, PopError, PushError};
use crate::core::frame::FrameBuffer;
use crate::core::rate_governor::RateGovernor;
use crate::error::{PipelineError, PipelineResult};
use crate::sink::FrameSink;

const CONSUMER_THREAD_NAME: &str = "frame-pipeline-consumer";

/// Lifecycle state of a [`FramePipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// How a successful [`FramePipeline::submit`] handled the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// The frame is in the channel and will be rendered
    Queued,
    /// The queue was at the drop threshold; the frame went straight back to the pool
    Dropped,
}

/// A rejected submission. The frame is handed back so the producer can release or
/// retry it.
#[derive(Debug)]
pub enum SubmitError {
    /// The pipeline is stopped
    NotRunning(FrameBuffer),
    /// The channel stayed full for the whole timeout
    Timeout(FrameBuffer),
    /// The pipeline stopped while the submission was waiting
    Stopped(FrameBuffer),
}

impl SubmitError {
    pub fn into_frame(self) -> FrameBuffer {
        match self {
            Self::NotRunning(frame) | Self::Timeout(frame) | Self::Stopped(frame) => frame,
        }
    }

    pub fn frame(&self) -> &FrameBuffer {
        match self {
            Self::NotRunning(frame) | Self::Timeout(frame) | Self::Stopped(frame) => frame,
        }
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning(_) => write!(f, "cannot submit while pipeline is stopped"),
            Self::Timeout(_) => write!(f, "timed out waiting for queue space"),
            Self::Stopped(_) => write!(f, "pipeline stopped during submit"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<SubmitError> for PipelineError {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::NotRunning(_) => PipelineError::not_running("stopped", "submit"),
            SubmitError::Timeout(_) => PipelineError::channel_timeout("submit"),
            SubmitError::Stopped(_) => PipelineError::channel_stopped("submit"),
        }
    }
}

/// Aggregated snapshot of governor, channel and pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineStats {
    pub current_rate: f64,
    pub target_rate: f64,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub total_submitted: u64,
    pub total_dropped: u64,
    pub total_rendered: u64,
    pub render_failures: u64,
    /// Ticks the governor skipped because the consumer was badly behind
    pub late_ticks: u64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate {:.2}/{:.2} fps | queue {}/{} | submitted {} dropped {} rendered {} failed {} late {}",
            self.current_rate,
            self.target_rate,
            self.queue_size,
            self.queue_capacity,
            self.total_submitted,
            self.total_dropped,
            self.total_rendered,
            self.render_failures,
            self.late_ticks
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    dropped: u64,
    rendered: u64,
    render_failures: u64,
}

/// A one-shot flag that threads can wait on.
#[derive(Debug, Default)]
struct Signal {
    set: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    fn raise(&self) {
        *self.set.lock() = true;
        self.changed.notify_all();
    }

    fn is_raised(&self) -> bool {
        *self.set.lock()
    }

    /// Waits until raised or `timeout` passes. Returns whether the signal is raised.
    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut set = self.set.lock();
        while !*set {
            match deadline {
                None => self.changed.wait(&mut set),
                Some(deadline) => {
                    if self.changed.wait_until(&mut set, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *set
    }
}

/// Raises the exit signal when the consumer returns or unwinds.
struct ExitGuard(Arc<Signal>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.raise();
    }
}

type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

#[derive(Clone)]
struct Bindings {
    sink: SharedSink,
    pool: Arc<BufferPool>,
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<Signal>,
    exited: Arc<Signal>,
}

/// State shared with the consumer thread.
struct Shared {
    config: PipelineConfig,
    channel: BoundedChannel<FrameBuffer>,
    governor: RateGovernor,
    counters: Mutex<Counters>,
    state: Mutex<PipelineState>,
    // latest rate for the sink; the consumer hands it over between renders
    rate_hint: Mutex<Option<f64>>,
}

/// Bounded real-time frame delivery from any number of producers to one sink.
///
/// All methods take `&self`; share the pipeline behind an `Arc` to submit from
/// several threads.
pub struct FramePipeline {
    shared: Arc<Shared>,
    bindings: Mutex<Option<Bindings>>,
    // serialises start/stop; holds the running consumer, if any
    worker: Mutex<Option<Worker>>,
}

impl FramePipeline {
    /// Creates a stopped pipeline. Bind a sink and a pool with [`init`](Self::init)
    /// before starting it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] if `config` does not validate.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let governor = RateGovernor::new(config.target_rate)?;
        let channel = BoundedChannel::new(config.queue_capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                channel,
                governor,
                counters: Mutex::new(Counters::default()),
                state: Mutex::new(PipelineState::Stopped),
                rate_hint: Mutex::new(None),
            }),
            bindings: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Binds the render backend and the buffer pool. Must be called exactly once,
    /// before [`start`](Self::start).
    ///
    /// The pool may be shared with other pipelines; dropped and cleared frames are
    /// released to it.
    pub fn init(&self, sink: impl FrameSink + 'static, pool: Arc<BufferPool>) -> PipelineResult<()> {
        self.init_boxed(Box::new(sink), pool)
    }

    pub fn init_boxed(&self, sink: Box<dyn FrameSink>, pool: Arc<BufferPool>) -> PipelineResult<()> {
        let mut bindings = self.bindings.lock();
        if bindings.is_some() {
            return Err(PipelineError::already_initialized());
        }
        tracing::debug!(sink = sink.name(), pool = pool.id(), "Pipeline initialized");
        *bindings = Some(Bindings {
            sink: Arc::new(Mutex::new(sink)),
            pool,
        });
        Ok(())
    }

    /// Starts the consumer thread. A no-op if already running or paused.
    ///
    /// Restarts the channel (frames still queued are kept), resets all counters and
    /// the rate governor.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotInitialized`] if [`init`](Self::init) was never called, or
    /// an I/O error if the thread could not be spawned.
    pub fn start(&self) -> PipelineResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let bindings = self
            .bindings
            .lock()
            .clone()
            .ok_or_else(|| PipelineError::not_initialized("sink and buffer pool"))?;

        self.shared.channel.restart();
        *self.shared.counters.lock() = Counters::default();
        self.shared.governor.reset();

        let stop = Arc::new(Signal::default());
        let exited = Arc::new(Signal::default());
        let handle = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name(CONSUMER_THREAD_NAME.to_string())
                .spawn(move || consumer_loop(shared, bindings, stop, exited))
                .map_err(|e| {
                    self.shared.channel.stop();
                    PipelineError::io("spawn consumer thread", e)
                })?
        };

        *self.shared.state.lock() = PipelineState::Running;
        *worker = Some(Worker {
            handle,
            stop,
            exited,
        });

        tracing::info!(
            queue_capacity = self.shared.channel.capacity(),
            target_rate = self.shared.governor.target_rate(),
            pacing = self.shared.config.pacing_enabled,
            drop_policy = self.shared.config.drop_policy_enabled,
            "Pipeline started"
        );
        Ok(())
    }

    /// Stops the consumer thread and waits for it to exit. Idempotent.
    ///
    /// # Errors
    ///
    /// [`PipelineError::JoinTimeout`] if the consumer did not exit within
    /// `stop_timeout_ms`, which means the sink is stuck in `render`. The thread is
    /// detached; it exits on its own once that render returns and never renders again.
    /// The pipeline is stopped either way.
    pub fn stop(&self) -> PipelineResult<()> {
        let mut slot = self.worker.lock();
        *self.shared.state.lock() = PipelineState::Stopped;
        let Some(worker) = slot.take() else {
            return Ok(());
        };

        worker.stop.raise();
        self.shared.channel.stop();

        let timeout = self.shared.config.stop_timeout();
        if !worker.exited.wait_for(timeout) {
            tracing::error!(
                thread = CONSUMER_THREAD_NAME,
                timeout_ms = timeout.as_millis() as u64,
                "Consumer thread did not exit in time, detaching"
            );
            return Err(PipelineError::join_timeout(
                CONSUMER_THREAD_NAME,
                timeout.as_millis() as u64,
            ));
        }

        if worker.handle.join().is_err() {
            tracing::error!(thread = CONSUMER_THREAD_NAME, "Consumer thread panicked");
        }
        tracing::info!(stats = %self.stats(), "Pipeline stopped");
        Ok(())
    }

    /// Suspends rendering. Submissions are still accepted up to channel capacity.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotRunning`] if the pipeline is stopped.
    pub fn pause(&self) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        match *state {
            PipelineState::Stopped => Err(PipelineError::not_running(state.to_string(), "pause")),
            PipelineState::Paused => Ok(()),
            PipelineState::Running => {
                *state = PipelineState::Paused;
                tracing::info!("Pipeline paused");
                Ok(())
            }
        }
    }

    /// # Errors
    ///
    /// [`PipelineError::NotRunning`] if the pipeline is stopped.
    pub fn resume(&self) -> PipelineResult<()> {
        let mut state = self.shared.state.lock();
        match *state {
            PipelineState::Stopped => Err(PipelineError::not_running(state.to_string(), "resume")),
            PipelineState::Running => Ok(()),
            PipelineState::Paused => {
                *state = PipelineState::Running;
                tracing::info!("Pipeline resumed");
                Ok(())
            }
        }
    }

    /// Hands a frame to the pipeline.
    ///
    /// With the drop policy enabled and the queue at or above the drop threshold, the
    /// frame is released to the pool and counted as dropped; the caller still sees
    /// success. Otherwise the frame is pushed, waiting up to `timeout` for space
    /// (`None` waits indefinitely, `Some(Duration::ZERO)` never waits).
    ///
    /// # Errors
    ///
    /// The frame is returned inside [`SubmitError`] if the pipeline is stopped, the
    /// timeout elapsed, or the pipeline stopped while waiting.
    pub fn submit(
        &self,
        frame: FrameBuffer,
        timeout: Option<Duration>,
    ) -> Result<Submitted, SubmitError> {
        if *self.shared.state.lock() == PipelineState::Stopped {
            return Err(SubmitError::NotRunning(frame));
        }

        let config = &self.shared.config;
        if config.drop_policy_enabled && self.shared.channel.fill_ratio() >= config.drop_threshold {
            let dropped = {
                let mut counters = self.shared.counters.lock();
                counters.dropped += 1;
                counters.dropped
            };
            tracing::trace!(dropped, queue = self.shared.channel.len(), "Dropping frame at submit");
            self.release(frame);
            return Ok(Submitted::Dropped);
        }

        match self.shared.channel.push_timeout(frame, timeout) {
            Ok(()) => {
                self.shared.counters.lock().submitted += 1;
                Ok(Submitted::Queued)
            }
            Err(PushError::Timeout(frame)) => Err(SubmitError::Timeout(frame)),
            Err(PushError::Stopped(frame)) => Err(SubmitError::Stopped(frame)),
        }
    }

    /// Changes the target rate of the governor and forwards it to the sink.
    ///
    /// The governor picks the rate up from its next tick. The sink receives it from the
    /// consumer thread before its next render, or as soon as a consumer is started, so
    /// this call never waits on a render in progress.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] if `rate` is not a finite positive number.
    pub fn set_target_rate(&self, rate: f64) -> PipelineResult<()> {
        self.shared.governor.set_target_rate(rate)?;
        *self.shared.rate_hint.lock() = Some(rate);
        Ok(())
    }

    /// Drains every queued frame back to the pool. Returns how many were released.
    pub fn clear_queue(&self) -> usize {
        let drained = self.shared.channel.clear();
        let count = drained.len();
        for frame in drained {
            self.release(frame);
        }
        if count > 0 {
            tracing::debug!(count, "Cleared queued frames");
        }
        count
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = self.shared.counters.lock();
        let governor = self.shared.governor.stats();
        let state = *self.shared.state.lock();
        PipelineStats {
            current_rate: governor.current_rate,
            target_rate: governor.target_rate,
            queue_size: self.shared.channel.len(),
            queue_capacity: self.shared.channel.capacity(),
            total_submitted: counters.submitted,
            total_dropped: counters.dropped,
            total_rendered: counters.rendered,
            render_failures: counters.render_failures,
            late_ticks: governor.dropped_count,
            is_running: state == PipelineState::Running,
            is_paused: state == PipelineState::Paused,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// The bound pool, if [`init`](Self::init) has been called.
    pub fn pool(&self) -> Option<Arc<BufferPool>> {
        self.bindings.lock().as_ref().map(|b| Arc::clone(&b.pool))
    }

    pub fn queue_len(&self) -> usize {
        self.shared.channel.len()
    }

    fn release(&self, frame: FrameBuffer) {
        match self.pool() {
            // unknown handles are logged by the pool
            Some(pool) => {
                let _ = pool.release(frame);
            }
            None => drop(frame),
        }
    }
}

impl fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePipeline")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "Failed to stop pipeline on drop");
        }
        self.clear_queue();
    }
}

fn consumer_loop(
    shared: Arc<Shared>,
    bindings: Bindings,
    stop: Arc<Signal>,
    exited: Arc<Signal>,
) {
    let _exit = ExitGuard(exited);
    let sink_name = bindings.sink.lock().name().to_string();
    let pop_timeout = shared.config.pop_timeout();
    let pause_poll = shared.config.pause_poll();
    tracing::debug!(sink = %sink_name, "Consumer thread running");

    while !stop.is_raised() {
        let hint = shared.rate_hint.lock().take();
        if let Some(rate) = hint {
            bindings.sink.lock().set_target_rate(rate);
        }

        if *shared.state.lock() == PipelineState::Paused {
            stop.wait_for(pause_poll);
            continue;
        }

        let frame = match shared.channel.pop_timeout(Some(pop_timeout)) {
            Ok(frame) => frame,
            Err(PopError::Timeout) => continue,
            Err(PopError::Stopped) => break,
        };

        let result = bindings.sink.lock().render(&frame);
        {
            let mut counters = shared.counters.lock();
            match result {
                Ok(()) => counters.rendered += 1,
                Err(_) => counters.render_failures += 1,
            }
        }
        if let Err(e) = result {
            let error = PipelineError::sink_render(sink_name.as_str(), format!("{:#}", e));
            tracing::warn!(pts = ?frame.timing.pts, "{}", error);
        }
        // unknown handles are logged by the pool
        let _ = bindings.pool.release(frame);

        if stop.is_raised() {
            break;
        }
        if shared.config.pacing_enabled {
            shared.governor.tick_with(|remaining| {
                stop.wait_for(remaining);
            });
        } else {
            shared.governor.observe();
        }
    }

    tracing::debug!(sink = %sink_name, "Consumer thread exiting");
}

/// One-call construction of a pipeline with its pool and sink.
///
/// Without an explicit pool, a new one is created from the config's
/// `pool_capacity` and `idle_eviction_ms`.
#[derive(Default)]
pub struct FramePipelineBuilder {
    config: PipelineConfig,
    pool: Option<Arc<BufferPool>>,
    sink: Option<Box<dyn FrameSink>>,
}

impl FramePipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing pool instead of creating one.
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn boxed_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// # Errors
    ///
    /// [`PipelineError::NotInitialized`] without a sink, or
    /// [`PipelineError::Config`] if the config does not validate.
    pub fn build(self) -> PipelineResult<FramePipeline> {
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::not_initialized("sink"))?;
        let pipeline = FramePipeline::new(self.config)?;
        let pool = self.pool.unwrap_or_else(|| {
            let config = pipeline.config();
            Arc::new(BufferPool::with_idle_eviction(
                config.pool_capacity,
                config.idle_eviction(),
            ))
        });
        pipeline.init_boxed(sink, pool)?;
        Ok(pipeline)
    }
}
