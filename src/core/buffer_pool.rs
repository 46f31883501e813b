//! # Buffer Pool Module
//!
//! A shape-keyed pool of reusable raw frame buffers. Producers allocate from it in a
//! tight loop, the consumer hands buffers back once a frame has been rendered, and the
//! pool reuses them instead of allocating a fresh frame every time.
//!
//! ## Overview
//!
//! - **Reuse**: an idle buffer whose shape matches the request exactly is handed out first
//! - **Bounded growth**: at most `capacity` buffers exist at once
//! - **Idle eviction**: when the pool is full, idle buffers unused for longer than the
//!   eviction threshold are destroyed to make room for a different shape
//! - **Thread-safe**: a single internal lock guards every operation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐ allocate ┌─────────────────┐  submit  ┌─────────────────┐
//! │    Producer     │◀────────│   BufferPool    │         │    Consumer     │
//! │     Thread      │────────────────────────────────────▶│     Thread      │
//! └─────────────────┘          │  slot: in use   │ release └────────┬────────┘
//!                              │  slot: idle     │◀─────────────────┘
//!                              └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use frame_pipeline::core::buffer_pool::BufferPool;
//! use frame_pipeline::core::frame::{BufferShape, PixelLayout};
//!
//! let pool = BufferPool::new(4);
//! let shape = BufferShape::new(640, 480, PixelLayout::Yuv420p);
//!
//! let frame = pool.allocate(shape).unwrap();
//! assert_eq!(frame.data().len(), shape.byte_len());
//! pool.release(frame).unwrap();
//!
//! let stats = pool.stats();
//! assert_eq!((stats.total, stats.idle), (1, 1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::frame::{BufferShape, FrameBuffer};
use crate::error::{PipelineError, PipelineResult};

/// Idle time after which a buffer may be evicted to make room.
pub const DEFAULT_IDLE_EVICTION: Duration = Duration::from_millis(5000);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// One buffer tracked by the pool.
///
/// `data` is `Some` while the slot is idle and `None` while the buffer is lent out, so a
/// slot is always exactly one of "in use" or "idle".
#[derive(Debug)]
struct PoolSlot {
    id: u64,
    shape: BufferShape,
    data: Option<Vec<u8>>,
    last_used: Instant,
}

impl PoolSlot {
    fn in_use(&self) -> bool {
        self.data.is_none()
    }
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<PoolSlot>,
    next_slot_id: u64,
    peak_usage: usize,
    allocations: u64,
    failed_allocations: u64,
}

/// Point-in-time pool usage. `total == in_use + idle` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    /// High-water mark of buffers held simultaneously since creation or the last clear
    pub peak: usize,
    /// Allocation attempts, successful or not
    pub allocations: u64,
    pub failed_allocations: u64,
}

/// A bounded, thread-safe pool of raw frame buffers keyed by [`BufferShape`].
///
/// Share one pool among several pipelines by wrapping it in an `Arc`
/// (see [`BufferPool::shared`]); no single pipeline owns its lifetime.
#[derive(Debug)]
pub struct BufferPool {
    id: u64,
    capacity: usize,
    idle_eviction: Duration,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` buffers, with the default idle
    /// eviction threshold.
    pub fn new(capacity: usize) -> Self {
        Self::with_idle_eviction(capacity, DEFAULT_IDLE_EVICTION)
    }

    pub fn with_idle_eviction(capacity: usize, idle_eviction: Duration) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            pool = id,
            capacity,
            idle_eviction_ms = idle_eviction.as_millis() as u64,
            "Creating buffer pool"
        );
        Self {
            id,
            capacity,
            idle_eviction,
            state: Mutex::new(PoolState {
                slots: Vec::with_capacity(capacity),
                next_slot_id: 1,
                peak_usage: 0,
                allocations: 0,
                failed_allocations: 0,
            }),
        }
    }

    /// Creates a pool already wrapped for sharing.
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_eviction(&self) -> Duration {
        self.idle_eviction
    }

    /// Lends out a buffer of exactly `shape`.
    ///
    /// Reuses an idle buffer of the same shape when one exists, otherwise creates a new
    /// one while below capacity. At capacity, idle buffers older than the eviction
    /// threshold are destroyed and the search is retried once, which lets a freed slot
    /// be refilled with the requested shape.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ResourceExhausted`] if nothing can be reused, created or evicted.
    pub fn allocate(&self, shape: BufferShape) -> PipelineResult<FrameBuffer> {
        let mut state = self.state.lock();
        state.allocations += 1;

        if let Some(frame) = self.take_idle(&mut state, shape) {
            return Ok(frame);
        }

        if state.slots.len() < self.capacity {
            return Ok(self.create_slot(&mut state, shape));
        }

        if self.evict_idle(&mut state) > 0 {
            if let Some(frame) = self.take_idle(&mut state, shape) {
                return Ok(frame);
            }
            if state.slots.len() < self.capacity {
                return Ok(self.create_slot(&mut state, shape));
            }
        }

        state.failed_allocations += 1;
        let in_use = state.slots.iter().filter(|slot| slot.in_use()).count();
        drop(state);

        tracing::debug!(pool = self.id, %shape, in_use, "Buffer pool exhausted");
        Err(PipelineError::resource_exhausted(shape.to_string(), self.capacity)
            .with_operation("allocate")
            .with_metadata("in_use", in_use.to_string())
            .with_recovery_suggestion("Release frames sooner or raise pool_capacity"))
    }

    /// Returns a buffer to the pool. Its contents and timing are cleared before it
    /// becomes available again.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnknownHandle`] if this pool does not track the buffer (it came
    /// from another pool, or the pool was cleared while it was lent out). The buffer is
    /// dropped and pool state is unchanged.
    pub fn release(&self, mut frame: FrameBuffer) -> PipelineResult<()> {
        if frame.pool_id == self.id {
            let mut state = self.state.lock();
            if let Some(slot) = state
                .slots
                .iter_mut()
                .find(|slot| slot.id == frame.slot_id && slot.in_use())
            {
                frame.clear();
                slot.last_used = Instant::now();
                slot.data = Some(frame.into_data());
                return Ok(());
            }
        }

        tracing::warn!(
            pool = self.id,
            frame_pool = frame.pool_id,
            slot = frame.slot_id,
            "Attempted to release unknown frame buffer"
        );
        Err(PipelineError::unknown_handle(frame.slot_id, frame.pool_id).with_operation("release"))
    }

    /// Allocates a new buffer of `source`'s shape and copies contents and timing into it.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate).
    pub fn clone_frame(&self, source: &FrameBuffer) -> PipelineResult<FrameBuffer> {
        let mut copy = self.allocate(source.shape())?;
        copy.data_mut().copy_from_slice(source.data());
        copy.timing = source.timing;
        Ok(copy)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let in_use = state.slots.iter().filter(|slot| slot.in_use()).count();
        PoolStats {
            total: state.slots.len(),
            in_use,
            idle: state.slots.len() - in_use,
            peak: state.peak_usage,
            allocations: state.allocations,
            failed_allocations: state.failed_allocations,
        }
    }

    /// Destroys every buffer regardless of whether it is lent out, and resets peak usage.
    ///
    /// Teardown only: buffers still held by callers become unknown to the pool.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let removed = state.slots.len();
        state.slots.clear();
        state.peak_usage = 0;
        drop(state);
        tracing::info!(pool = self.id, removed, "Buffer pool cleared");
    }

    /// Runs the idle-eviction sweep on demand. Returns the number of buffers destroyed.
    pub fn evict_idle_now(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_idle(&mut state)
    }

    fn take_idle(&self, state: &mut PoolState, shape: BufferShape) -> Option<FrameBuffer> {
        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.shape == shape && !slot.in_use())?;
        let data = slot.data.take()?;
        slot.last_used = Instant::now();
        Some(FrameBuffer::new(self.id, slot.id, shape, data))
    }

    fn create_slot(&self, state: &mut PoolState, shape: BufferShape) -> FrameBuffer {
        let id = state.next_slot_id;
        state.next_slot_id += 1;
        state.slots.push(PoolSlot {
            id,
            shape,
            data: None,
            last_used: Instant::now(),
        });
        state.peak_usage = state.peak_usage.max(state.slots.len());
        tracing::trace!(pool = self.id, slot = id, %shape, "Allocated new frame buffer");
        FrameBuffer::new(self.id, id, shape, vec![0u8; shape.byte_len()])
    }

    fn evict_idle(&self, state: &mut PoolState) -> usize {
        let now = Instant::now();
        let threshold = self.idle_eviction;
        let before = state.slots.len();
        state
            .slots
            .retain(|slot| slot.in_use() || now.duration_since(slot.last_used) <= threshold);
        let removed = before - state.slots.len();
        if removed > 0 {
            tracing::info!(pool = self.id, removed, "Evicted idle frame buffers");
        }
        removed
    }
}

/// A buffer on loan from a shared pool, returned automatically when dropped.
///
/// ```rust
/// use frame_pipeline::core::buffer_pool::{BufferPool, PooledFrame};
/// use frame_pipeline::core::frame::{BufferShape, PixelLayout};
///
/// let pool = BufferPool::shared(2);
/// {
///     let mut frame = PooledFrame::allocate(&pool, BufferShape::new(2, 2, PixelLayout::Rgba)).unwrap();
///     frame.data_mut()[0] = 255;
/// }
/// assert_eq!(pool.stats().in_use, 0);
/// ```
#[derive(Debug)]
pub struct PooledFrame {
    pool: Arc<BufferPool>,
    frame: Option<FrameBuffer>,
}

impl PooledFrame {
    pub fn allocate(pool: &Arc<BufferPool>, shape: BufferShape) -> PipelineResult<Self> {
        let frame = pool.allocate(shape)?;
        Ok(Self::wrap(Arc::clone(pool), frame))
    }

    /// Takes responsibility for releasing `frame` to `pool`.
    pub fn wrap(pool: Arc<BufferPool>, frame: FrameBuffer) -> Self {
        Self {
            pool,
            frame: Some(frame),
        }
    }

    /// Gives up the guard without releasing; the caller now owns the buffer.
    pub fn into_inner(mut self) -> FrameBuffer {
        match self.frame.take() {
            Some(frame) => frame,
            None => unreachable!("PooledFrame always holds a frame until dropped"),
        }
    }
}

impl std::ops::Deref for PooledFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("PooledFrame always holds a frame until dropped"),
        }
    }
}

impl std::ops::DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        match &mut self.frame {
            Some(frame) => frame,
            None => unreachable!("PooledFrame always holds a frame until dropped"),
        }
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            // unknown handles are already logged by the pool
            let _ = self.pool.release(frame);
        }
    }
}
