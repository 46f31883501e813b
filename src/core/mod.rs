//! # Core Infrastructure Module
//!
//! The leaf components of the frame pipeline: buffer management, inter-thread
//! hand-off, pacing, and the raw frame data model they share.

pub mod buffer_pool;
pub mod channel;
pub mod frame;
pub mod rate_governor;
pub mod timestamp;
