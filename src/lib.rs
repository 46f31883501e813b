//! # Frame Pipeline Library
//!
//! Bounded real-time frame delivery: decouples a frame producer (a decoder, a capture
//! device, a generator) from a frame consumer (a renderer) through pooled buffers, a
//! bounded hand-off channel and a pacing governor.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `core`: the leaf components, i.e. the buffer pool, the bounded channel, the rate
//!   governor, the raw frame data model and PTS bookkeeping
//! - `pipeline`: the orchestrator that wires the leaves to a sink and runs the
//!   consumer thread
//! - `sink` / `source`: the render and producer capabilities, with simple adapters
//! - `config`: configuration loading and validation
//! - `error`: the error taxonomy shared by all of the above
//!
//! ## Features
//!
//! - **Buffer reuse**: shape-keyed pooling with idle eviction, no per-frame allocation
//! - **Backpressure**: bounded queue with timeouts on both ends, optional drop policy
//! - **Pacing**: sleep-or-drop rate governor with windowed jitter statistics
//! - **Bounded shutdown**: `stop` never hangs forever on a stuck sink
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use frame_pipeline::{BufferShape, FramePipelineBuilder, FrameSource, NullSink,
//!     PipelineConfig, PixelLayout, TestPatternSource};
//!
//! # fn main() -> frame_pipeline::PipelineResult<()> {
//! let pipeline = FramePipelineBuilder::new()
//!     .config(PipelineConfig::default().with_target_rate(200.0))
//!     .sink(NullSink::new())
//!     .build()?;
//! let pool = pipeline.pool().expect("pool is bound by the builder");
//! let mut source = TestPatternSource::new(BufferShape::new(64, 64, PixelLayout::Yuv420p), 200);
//!
//! pipeline.start()?;
//! for _ in 0..5 {
//!     let frame = source.next_frame(&pool)?;
//!     let _ = pipeline.submit(frame, Some(Duration::from_millis(50)));
//! }
//! pipeline.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;

/// Re-export error types for convenience
pub use error::{
    HasRecoverySuggestion, HasSeverity, PipelineError, PipelineResult, Retryable,
};

pub use config::PipelineConfig;
pub use crate::core::buffer_pool::{BufferPool, PoolStats, PooledFrame};
pub use crate::core::channel::{BoundedChannel, PopError, PushError};
pub use crate::core::frame::{BufferShape, FrameBuffer, FrameTiming, PixelLayout};
pub use crate::core::rate_governor::{GovernorStats, RateGovernor};
pub use crate::core::timestamp::{PtsCounter, TimeBase};
pub use pipeline::{
    FramePipeline, FramePipelineBuilder, PipelineState, PipelineStats, SubmitError, Submitted,
};
pub use sink::{FrameSink, LoggingSink, NullSink};
pub use source::{FrameSource, TestPatternSource};
