//! Render backends.
//!
//! A [`FrameSink`] is whatever finally consumes a frame: a display, an encoder, a
//! test recorder. The pipeline only needs it to render one frame at a time and,
//! optionally, to hear about target rate changes.

use std::time::Instant;

use anyhow::Result;

use crate::core::frame::FrameBuffer;

/// A pluggable render backend driven by the pipeline's consumer thread.
///
/// `render` is called with exclusive access from a single thread, one frame at a
/// time, in submission order. A returned error is counted and logged by the pipeline,
/// which then moves on to the next frame.
pub trait FrameSink: Send {
    /// Render one frame. The frame is returned to its pool after this call.
    fn render(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Rate hint forwarded from [`FramePipeline::set_target_rate`](crate::pipeline::FramePipeline::set_target_rate).
    fn set_target_rate(&mut self, _rate: f64) {}

    /// Short name for logs and errors.
    fn name(&self) -> &str {
        "sink"
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn render(&mut self, frame: &FrameBuffer) -> Result<()> {
        (**self).render(frame)
    }

    fn set_target_rate(&mut self, rate: f64) {
        (**self).set_target_rate(rate)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Discards every frame. Useful for throughput measurements.
#[derive(Debug, Default)]
pub struct NullSink {
    rendered: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

impl FrameSink for NullSink {
    fn render(&mut self, _frame: &FrameBuffer) -> Result<()> {
        self.rendered += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Logs a one-line summary per frame, plus a periodic rate report.
#[derive(Debug)]
pub struct LoggingSink {
    name: String,
    rendered: u64,
    report_every: u64,
    target_rate: Option<f64>,
    window_start: Instant,
}

impl LoggingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rendered: 0,
            report_every: 100,
            target_rate: None,
            window_start: Instant::now(),
        }
    }

    /// How many frames between rate reports at info level.
    pub fn with_report_interval(mut self, frames: u64) -> Self {
        self.report_every = frames.max(1);
        self
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

impl FrameSink for LoggingSink {
    fn render(&mut self, frame: &FrameBuffer) -> Result<()> {
        self.rendered += 1;
        tracing::debug!(
            sink = %self.name,
            frame = self.rendered,
            shape = %frame.shape(),
            pts = ?frame.timing.pts,
            "Rendered frame"
        );

        if self.rendered % self.report_every == 0 {
            let elapsed = self.window_start.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 {
                self.report_every as f64 / elapsed
            } else {
                0.0
            };
            tracing::info!(
                sink = %self.name,
                rendered = self.rendered,
                fps = %format!("{:.1}", fps),
                target = ?self.target_rate,
                "Render rate"
            );
            self.window_start = Instant::now();
        }
        Ok(())
    }

    fn set_target_rate(&mut self, rate: f64) {
        self.target_rate = Some(rate);
    }

    fn name(&self) -> &str {
        &self.name
    }
}
