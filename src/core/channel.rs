//! # Bounded Hand-off Channel
//!
//! A blocking FIFO queue with a fixed capacity, used to hand frames from producers to
//! the consumer thread.
//!
//! ## Semantics
//!
//! - **Back-pressure**: `push` blocks while the queue is full
//! - **Timeouts**: every blocking operation takes an optional timeout. `None` waits
//!   forever, `Some(Duration::ZERO)` never blocks
//! - **Stop**: `stop` wakes every waiter. Pushes fail from then on, pops keep draining
//!   whatever is still queued and fail only once the queue is empty
//! - **Restart**: clears the stop flag; queued items are kept
//!
//! Failed pushes hand the rejected item back to the caller inside the error, so nothing
//! is ever lost silently.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use frame_pipeline::core::channel::{BoundedChannel, PushError};
//!
//! let channel = BoundedChannel::new(1);
//! channel.push(1).unwrap();
//! assert_eq!(channel.try_push(2), Err(PushError::Timeout(2)));
//! assert_eq!(channel.pop_timeout(Some(Duration::from_millis(10))), Ok(1));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::PipelineError;

/// Why a push did not enqueue its item. The item is returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue stayed full for the whole timeout
    Timeout(T),
    /// The channel was stopped before or while waiting
    Stopped(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(item) | Self::Stopped(item) => item,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(_) => write!(f, "timed out pushing into a full channel"),
            Self::Stopped(_) => write!(f, "push on a stopped channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for PushError<T> {}

/// Why a pop returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The queue stayed empty for the whole timeout
    Timeout,
    /// The channel is stopped and fully drained
    Stopped,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out popping from an empty channel"),
            Self::Stopped => write!(f, "pop on a stopped, empty channel"),
        }
    }
}

impl std::error::Error for PopError {}

impl<T> From<PushError<T>> for PipelineError {
    fn from(error: PushError<T>) -> Self {
        match error {
            PushError::Timeout(_) => PipelineError::channel_timeout("push"),
            PushError::Stopped(_) => PipelineError::channel_stopped("push"),
        }
    }
}

impl From<PopError> for PipelineError {
    fn from(error: PopError) -> Self {
        match error {
            PopError::Timeout => PipelineError::channel_timeout("pop"),
            PopError::Stopped => PipelineError::channel_stopped("pop"),
        }
    }
}

#[derive(Debug)]
struct ChannelState<T> {
    queue: VecDeque<T>,
    stopped: bool,
}

/// A bounded multi-producer multi-consumer FIFO with blocking, timed and non-blocking
/// operations. Share it behind an `Arc`.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items. A capacity of zero is raised
    /// to one, since a rendezvous channel cannot buffer a frame.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks until there is room, then enqueues `item`.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.push_timeout(item, None)
    }

    /// Enqueues `item` only if there is room right now.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.push_timeout(item, Some(Duration::ZERO))
    }

    /// Waits up to `timeout` for room, then enqueues `item`.
    ///
    /// The stop flag is checked before the fullness check, so a stopped channel rejects
    /// pushes even while it has room.
    pub fn push_timeout(&self, item: T, timeout: Option<Duration>) -> Result<(), PushError<T>> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();

        loop {
            if state.stopped {
                return Err(PushError::Stopped(item));
            }
            if state.queue.len() < self.capacity {
                break;
            }
            if !self.wait(&self.not_full, &mut state, deadline) {
                // one last look: a slot may have opened exactly at the deadline
                if state.stopped {
                    return Err(PushError::Stopped(item));
                }
                if state.queue.len() < self.capacity {
                    break;
                }
                return Err(PushError::Timeout(item));
            }
        }

        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available.
    pub fn pop(&self) -> Result<T, PopError> {
        self.pop_timeout(None)
    }

    /// Dequeues an item only if one is available right now.
    pub fn try_pop(&self) -> Result<T, PopError> {
        self.pop_timeout(Some(Duration::ZERO))
    }

    /// Waits up to `timeout` for an item.
    ///
    /// Items still queued after a stop are handed out; `Stopped` is reported only when
    /// the channel is stopped and empty.
    pub fn pop_timeout(&self, timeout: Option<Duration>) -> Result<T, PopError> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(PopError::Stopped);
            }
            if !self.wait(&self.not_empty, &mut state, deadline) {
                if let Some(item) = state.queue.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                return Err(if state.stopped {
                    PopError::Stopped
                } else {
                    PopError::Timeout
                });
            }
        }
    }

    /// Sets the stop flag and wakes every blocked producer and consumer.
    pub fn stop(&self) {
        let queued = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.queue.len()
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        tracing::debug!(queued, "Channel stopped");
    }

    /// Clears the stop flag. Queued items are kept.
    pub fn restart(&self) {
        let queued = {
            let mut state = self.state.lock();
            state.stopped = false;
            state.queue.len()
        };
        tracing::debug!(queued, "Channel restarted");
    }

    /// Removes and returns every queued item, oldest first, and wakes blocked producers.
    pub fn clear(&self) -> Vec<T> {
        let drained: Vec<T> = self.state.lock().queue.drain(..).collect();
        self.not_full.notify_all();
        drained
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Fraction of capacity currently occupied, in `[0.0, 1.0]`.
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Waits on `condvar` until notified or `deadline` passes. Returns false once the
    /// deadline has passed; spurious wakeups return true and the caller re-checks.
    fn wait(
        &self,
        condvar: &Condvar,
        state: &mut MutexGuard<'_, ChannelState<T>>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            None => {
                condvar.wait(state);
                true
            }
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                !condvar.wait_until(state, deadline).timed_out()
            }
        }
    }
}

/// `None` for an unbounded wait. Timeouts too large to represent also wait forever.
fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}
