//! # Raw Frame Buffers
//!
//! The data model shared by the pool, the channel and the sink: what shape a raw frame
//! buffer has, which timing metadata travels with it, and the owned buffer itself.
//!
//! The pipeline never interprets pixel values. A [`PixelLayout`] is only used to work out
//! how many bytes a buffer of a given shape occupies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::timestamp::TimeBase;

/// Memory layout of the pixels in a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
    /// Planar Y, U, V with horizontal chroma subsampling
    Yuv422p,
    /// Planar Y, U, V without subsampling
    Yuv444p,
    /// Y plane followed by interleaved UV
    Nv12,
    /// Y plane followed by interleaved VU
    Nv21,
    /// Packed 8-bit R, G, B
    Rgb24,
    /// Packed 8-bit B, G, R
    Bgr24,
    /// Packed 8-bit R, G, B, A
    Rgba,
    /// Packed 8-bit B, G, R, A
    Bgra,
}

impl PixelLayout {
    /// Number of bytes a `width` x `height` frame occupies in this layout.
    ///
    /// Chroma planes round odd dimensions up, so a 3x3 YUV 4:2:0 frame has 2x2 chroma.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        let half_w = w.div_ceil(2);
        let half_h = h.div_ceil(2);
        match self {
            Self::Yuv420p => w * h + 2 * half_w * half_h,
            Self::Yuv422p => w * h + 2 * half_w * h,
            Self::Yuv444p => 3 * w * h,
            Self::Nv12 | Self::Nv21 => w * h + 2 * half_w * half_h,
            Self::Rgb24 | Self::Bgr24 => 3 * w * h,
            Self::Rgba | Self::Bgra => 4 * w * h,
        }
    }

    /// Short lowercase name, as used in configuration and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PixelLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yuv420p" => Ok(Self::Yuv420p),
            "yuv422p" => Ok(Self::Yuv422p),
            "yuv444p" => Ok(Self::Yuv444p),
            "nv12" => Ok(Self::Nv12),
            "nv21" => Ok(Self::Nv21),
            "rgb24" => Ok(Self::Rgb24),
            "bgr24" => Ok(Self::Bgr24),
            "rgba" => Ok(Self::Rgba),
            "bgra" => Ok(Self::Bgra),
            other => Err(format!(
                "unknown pixel layout '{}'. Use: yuv420p, yuv422p, yuv444p, nv12, nv21, rgb24, bgr24, rgba, bgra",
                other
            )),
        }
    }
}

/// The (width, height, layout) triple that identifies what kind of frame a buffer holds.
///
/// Two buffers are interchangeable in the pool only when their shapes are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferShape {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl BufferShape {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
        }
    }

    /// Bytes needed to hold one frame of this shape.
    pub fn byte_len(&self) -> usize {
        self.layout.frame_size(self.width, self.height)
    }
}

impl fmt::Display for BufferShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.layout)
    }
}

/// Timing metadata that travels with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTiming {
    /// Presentation timestamp in `time_base` units
    pub pts: Option<i64>,
    /// Decode timestamp of the packet the frame came from
    pub pkt_dts: Option<i64>,
    pub time_base: TimeBase,
}

/// One raw frame buffer lent out by a [`BufferPool`](crate::core::buffer_pool::BufferPool).
///
/// The buffer is an owned value: whoever holds it has exclusive access to its bytes,
/// and handing it back to the pool moves it. The pool and slot ids let the pool
/// recognise its own buffers on release.
#[derive(Debug)]
pub struct FrameBuffer {
    pub(crate) pool_id: u64,
    pub(crate) slot_id: u64,
    shape: BufferShape,
    data: Vec<u8>,
    pub timing: FrameTiming,
}

impl FrameBuffer {
    pub(crate) fn new(pool_id: u64, slot_id: u64, shape: BufferShape, data: Vec<u8>) -> Self {
        Self {
            pool_id,
            slot_id,
            shape,
            data,
            timing: FrameTiming::default(),
        }
    }

    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.shape.layout
    }

    /// Identifier of the pool slot backing this buffer.
    pub fn slot_id(&self) -> u64 {
        self.slot_id
    }

    /// Identifier of the pool this buffer was allocated from.
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reset contents and timing so stale data is never observed after reuse.
    pub(crate) fn clear(&mut self) {
        self.data.fill(0);
        self.timing = FrameTiming::default();
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelLayout::Yuv420p.frame_size(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(PixelLayout::Nv12.frame_size(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(PixelLayout::Yuv422p.frame_size(640, 480), 640 * 480 * 2);
        assert_eq!(PixelLayout::Yuv444p.frame_size(4, 4), 48);
        assert_eq!(PixelLayout::Rgb24.frame_size(2, 2), 12);
        assert_eq!(PixelLayout::Bgra.frame_size(1920, 1080), 1920 * 1080 * 4);
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        // 9 luma + 2 * (2 * 2) chroma
        assert_eq!(PixelLayout::Yuv420p.frame_size(3, 3), 17);
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("NV12".parse::<PixelLayout>(), Ok(PixelLayout::Nv12));
        assert_eq!("yuv420p".parse::<PixelLayout>(), Ok(PixelLayout::Yuv420p));
        assert!("yuv411".parse::<PixelLayout>().is_err());
    }

    #[test]
    fn test_shape_display() {
        let shape = BufferShape::new(640, 480, PixelLayout::Yuv420p);
        assert_eq!(shape.to_string(), "640x480 yuv420p");
        assert_eq!(shape.byte_len(), 460_800);
    }
}
