//! # Configuration Module
//!
//! Configuration for a [`FramePipeline`](crate::pipeline::FramePipeline) and the buffer
//! pool that feeds it. It is the common surface between the CLI, JSON config files and
//! library callers.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Default | Description |
//! |-----------|------|---------|-------------|
//! | `queue_capacity` | `usize` | 10 | Frames the hand-off channel can hold |
//! | `target_rate` | `f64` | 25.0 | Render rate in frames per second |
//! | `pacing_enabled` | `bool` | true | Sleep between renders to hold `target_rate` |
//! | `drop_policy_enabled` | `bool` | true | Drop submissions while the queue is nearly full |
//! | `drop_threshold` | `f64` | 0.8 | Fill ratio at which submissions start dropping |
//! | `pool_capacity` | `usize` | 20 | Buffers the pool may hold at once |
//! | `idle_eviction_ms` | `u64` | 5000 | Idle time before a pool buffer may be evicted |
//! | `pop_timeout_ms` | `u64` | 100 | Consumer pop timeout, bounds shutdown latency |
//! | `pause_poll_ms` | `u64` | 10 | Consumer sleep while paused |
//! | `stop_timeout_ms` | `u64` | 5000 | How long `stop` waits for the consumer thread |
//!
//! ## Examples
//!
//! ```rust
//! use frame_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::default()
//!     .with_queue_capacity(4)
//!     .with_target_rate(60.0);
//! assert!(config.validate().is_ok());
//!
//! let from_json = PipelineConfig::from_json_str(r#"{ "target_rate": 30.0 }"#).unwrap();
//! assert_eq!(from_json.queue_capacity, 10);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Settings for one pipeline and its pool.
///
/// Missing fields in JSON input fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the bounded hand-off channel.
    pub queue_capacity: usize,

    /// Target render rate in frames per second.
    pub target_rate: f64,

    /// Whether the consumer sleeps between renders to hold the target rate.
    pub pacing_enabled: bool,

    /// Whether `submit` drops frames once the queue reaches `drop_threshold`.
    pub drop_policy_enabled: bool,

    /// Queue fill ratio in `(0, 1]` at or above which submissions are dropped.
    pub drop_threshold: f64,

    /// Maximum number of buffers the pool holds at once.
    pub pool_capacity: usize,

    pub idle_eviction_ms: u64,

    /// How long one consumer pop waits. Also bounds how quickly the consumer notices
    /// a stop request while the queue is empty.
    pub pop_timeout_ms: u64,

    pub pause_poll_ms: u64,

    /// Upper bound on how long `stop` waits for the consumer thread to exit.
    pub stop_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            target_rate: 25.0,
            pacing_enabled: true,
            drop_policy_enabled: true,
            drop_threshold: 0.8,
            pool_capacity: 20,
            idle_eviction_ms: 5000,
            pop_timeout_ms: 100,
            pause_poll_ms: 10,
            stop_timeout_ms: 5000,
        }
    }
}

impl PipelineConfig {
    pub fn new(queue_capacity: usize, target_rate: f64) -> Self {
        Self {
            queue_capacity,
            target_rate,
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_target_rate(mut self, rate: f64) -> Self {
        self.target_rate = rate;
        self
    }

    pub fn with_pacing(mut self, enabled: bool) -> Self {
        self.pacing_enabled = enabled;
        self
    }

    pub fn with_drop_policy(mut self, enabled: bool) -> Self {
        self.drop_policy_enabled = enabled;
        self
    }

    pub fn with_drop_threshold(mut self, threshold: f64) -> Self {
        self.drop_threshold = threshold;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_idle_eviction(mut self, idle: Duration) -> Self {
        self.idle_eviction_ms = idle.as_millis() as u64;
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Checks every field is in range.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] naming the first offending field.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::config(
                "queue_capacity",
                "0",
                "must be greater than 0",
            ));
        }
        if !self.target_rate.is_finite() || self.target_rate <= 0.0 {
            return Err(PipelineError::config(
                "target_rate",
                self.target_rate.to_string(),
                "must be a finite number greater than 0",
            ));
        }
        if !(self.drop_threshold > 0.0 && self.drop_threshold <= 1.0) {
            return Err(PipelineError::config(
                "drop_threshold",
                self.drop_threshold.to_string(),
                "must be in (0, 1]",
            ));
        }
        if self.pool_capacity == 0 {
            return Err(PipelineError::config(
                "pool_capacity",
                "0",
                "must be greater than 0",
            ));
        }
        if self.pop_timeout_ms == 0 {
            return Err(PipelineError::config(
                "pop_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }
        if self.stop_timeout_ms == 0 {
            return Err(PipelineError::config(
                "stop_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io("read config", e).with_path(path.display().to_string())
        })?;
        Self::from_json_str(&text).map_err(|e| e.with_path(path.display().to_string()))
    }

    pub fn to_json_pretty(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
