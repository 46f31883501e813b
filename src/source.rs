//! Frame producers.
//!
//! Real producers (decoders, capture devices) live outside this crate. The
//! [`TestPatternSource`] here generates a moving gradient so the pipeline can be
//! driven end to end by the CLI, the benchmark and the tests.

use std::sync::Arc;

use crate::core::buffer_pool::BufferPool;
use crate::core::frame::{BufferShape, FrameBuffer, PixelLayout};
use crate::core::timestamp::{PtsCounter, TimeBase};
use crate::error::PipelineResult;

/// Something that fills pool buffers with frames.
pub trait FrameSource: Send {
    /// Allocates a buffer from `pool` and fills it with the next frame.
    fn next_frame(&mut self, pool: &BufferPool) -> PipelineResult<FrameBuffer>;

    fn shape(&self) -> BufferShape;
}

/// Synthetic producer: a diagonal gradient that shifts by one step each frame.
#[derive(Debug)]
pub struct TestPatternSource {
    shape: BufferShape,
    pts: Arc<PtsCounter>,
    frame_index: u64,
}

impl TestPatternSource {
    /// Timestamps are one tick per frame at `fps`.
    pub fn new(shape: BufferShape, fps: u32) -> Self {
        let time_base = TimeBase::per_frame(fps.max(1).min(i32::MAX as u32) as i32);
        Self {
            shape,
            pts: Arc::new(PtsCounter::new(time_base)),
            frame_index: 0,
        }
    }

    /// Shares a PTS counter, e.g. between several producers of the same stream.
    pub fn with_pts_counter(mut self, pts: Arc<PtsCounter>) -> Self {
        self.pts = pts;
        self
    }

    pub fn pts_counter(&self) -> &Arc<PtsCounter> {
        &self.pts
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_index
    }

    fn fill(&self, frame: &mut FrameBuffer) {
        let width = self.shape.width.max(1) as usize;
        let offset = self.frame_index as usize;
        let bytes_per_pixel = match self.shape.layout {
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => 3,
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
            // planar and semi-planar: the gradient runs over the luma plane and
            // continues through chroma, which is fine for a test pattern
            _ => 1,
        };
        for (i, byte) in frame.data_mut().iter_mut().enumerate() {
            let pixel = i / bytes_per_pixel;
            let x = pixel % width;
            let y = pixel / width;
            *byte = ((x + y + offset) & 0xFF) as u8;
        }
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self, pool: &BufferPool) -> PipelineResult<FrameBuffer> {
        let mut frame = pool.allocate(self.shape)?;
        self.fill(&mut frame);
        frame.timing.time_base = self.pts.time_base();
        frame.timing.pts = Some(self.pts.next_pts());
        self.frame_index += 1;
        Ok(frame)
    }

    fn shape(&self) -> BufferShape {
        self.shape
    }
}
