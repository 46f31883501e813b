//! # Pipeline Error Handling
//!
//! Error types for the frame delivery pipeline, with classification traits and
//! rich error context.
//!
//! ## Architecture
//!
//! - **Error Types**: one enum, `PipelineError`, whose variants mirror the failure
//!   modes of the pool, the channel, the governor and the orchestrator
//! - **Error Traits**: `Retryable`, `HasSeverity`, `HasRecoverySuggestion`
//! - **Error Context**: timestamps, operation names, recovery hints and metadata
//!
//! ## Failure policy
//!
//! Nothing in the hot path panics or aborts. Every failure is returned as a value so a
//! producer or the consumer loop can keep going after any single failure. Transient
//! conditions (an exhausted pool, a channel timeout) are told apart by
//! [`classify::is_transient`] and logged below warn level.
//!
//! ## Usage
//!
//! ```rust
//! use frame_pipeline::error::{PipelineError, Retryable};
//!
//! let error = PipelineError::resource_exhausted("640x480 yuv420p", 2)
//!     .with_context("allocating a decode target");
//!
//! if error.is_retryable() {
//!     // back off and try again
//! }
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Debug-level errors that don't affect operation
    Debug,
    /// Informational errors
    Info,
    /// Warnings that may indicate potential issues
    Warning,
    /// Errors that affect operation but can be recovered from
    Error,
    /// Critical errors that require immediate attention
    Critical,
    /// Fatal errors that cannot be recovered from
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Additional metadata as key-value pairs
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with the given severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Errors produced by the frame delivery pipeline.
#[derive(Debug)]
pub enum PipelineError {
    /// The buffer pool could not satisfy an allocation, even after an eviction sweep
    ResourceExhausted {
        shape: String,
        capacity: usize,
        context: ErrorContext,
    },
    /// A buffer was released to a pool that does not track it
    UnknownHandle {
        slot: u64,
        pool: u64,
        context: ErrorContext,
    },
    /// A channel push or pop did not complete within the caller's timeout
    ChannelTimeout {
        operation: String,
        context: ErrorContext,
    },
    /// A channel push or pop observed a stopped channel
    ChannelStopped {
        operation: String,
        context: ErrorContext,
    },
    /// The sink reported a failure for one frame
    SinkRenderFailure {
        sink: String,
        reason: String,
        context: ErrorContext,
    },
    /// An operation was attempted in a lifecycle state that does not permit it
    NotRunning {
        current_state: String,
        attempted_operation: String,
        context: ErrorContext,
    },
    /// The pipeline was started before a sink and a pool were bound
    NotInitialized {
        missing: String,
        context: ErrorContext,
    },
    /// `init` was called on a pipeline that already has its dependencies bound
    AlreadyInitialized { context: ErrorContext },
    /// The consumer thread did not exit within the stop bound
    JoinTimeout {
        thread: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl PipelineError {
    /// Create a resource exhaustion error
    pub fn resource_exhausted(shape: impl Into<String>, capacity: usize) -> Self {
        Self::ResourceExhausted {
            shape: shape.into(),
            capacity,
            context: ErrorContext::new(),
        }
    }

    /// Create an unknown handle error
    pub fn unknown_handle(slot: u64, pool: u64) -> Self {
        Self::UnknownHandle {
            slot,
            pool,
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
    }

    /// Create a channel timeout error
    pub fn channel_timeout(operation: impl Into<String>) -> Self {
        Self::ChannelTimeout {
            operation: operation.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Debug),
        }
    }

    /// Create a channel stopped error
    pub fn channel_stopped(operation: impl Into<String>) -> Self {
        Self::ChannelStopped {
            operation: operation.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Info),
        }
    }

    /// Create a sink render failure
    pub fn sink_render(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SinkRenderFailure {
            sink: sink.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
    }

    /// Create a lifecycle state error
    pub fn not_running(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
    ) -> Self {
        Self::NotRunning {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a missing dependency error
    pub fn not_initialized(missing: impl Into<String>) -> Self {
        Self::NotInitialized {
            missing: missing.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a double-initialisation error
    pub fn already_initialized() -> Self {
        Self::AlreadyInitialized {
            context: ErrorContext::new(),
        }
    }

    /// Create a join timeout error
    pub fn join_timeout(thread: impl Into<String>, duration_ms: u64) -> Self {
        Self::JoinTimeout {
            thread: thread.into(),
            duration_ms,
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an external library error
    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Attach the path an I/O error refers to
    pub fn with_path(mut self, new_path: impl Into<String>) -> Self {
        if let Self::Io { path, .. } = &mut self {
            *path = Some(new_path.into());
        }
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::ResourceExhausted { context, .. } => context,
            Self::UnknownHandle { context, .. } => context,
            Self::ChannelTimeout { context, .. } => context,
            Self::ChannelStopped { context, .. } => context,
            Self::SinkRenderFailure { context, .. } => context,
            Self::NotRunning { context, .. } => context,
            Self::NotInitialized { context, .. } => context,
            Self::AlreadyInitialized { context } => context,
            Self::JoinTimeout { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::ResourceExhausted { context, .. } => context,
            Self::UnknownHandle { context, .. } => context,
            Self::ChannelTimeout { context, .. } => context,
            Self::ChannelStopped { context, .. } => context,
            Self::SinkRenderFailure { context, .. } => context,
            Self::NotRunning { context, .. } => context,
            Self::NotInitialized { context, .. } => context,
            Self::AlreadyInitialized { context } => context,
            Self::JoinTimeout { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::UnknownHandle { .. } => "unknown_handle",
            Self::ChannelTimeout { .. } => "channel_timeout",
            Self::ChannelStopped { .. } => "channel_stopped",
            Self::SinkRenderFailure { .. } => "sink_render_failure",
            Self::NotRunning { .. } => "not_running",
            Self::NotInitialized { .. } => "not_initialized",
            Self::AlreadyInitialized { .. } => "already_initialized",
            Self::JoinTimeout { .. } => "join_timeout",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ResourceExhausted {
                shape, capacity, ..
            } => {
                write!(
                    f,
                    "Buffer pool exhausted allocating {} (capacity {})",
                    shape, capacity
                )
            }
            PipelineError::UnknownHandle { slot, pool, .. } => {
                write!(f, "Buffer slot {} is not tracked by pool {}", slot, pool)
            }
            PipelineError::ChannelTimeout { operation, .. } => {
                write!(f, "Channel {} timed out", operation)
            }
            PipelineError::ChannelStopped { operation, .. } => {
                write!(f, "Channel {} failed: channel is stopped", operation)
            }
            PipelineError::SinkRenderFailure { sink, reason, .. } => {
                write!(f, "Sink '{}' failed to render frame: {}", sink, reason)
            }
            PipelineError::NotRunning {
                current_state,
                attempted_operation,
                ..
            } => {
                write!(
                    f,
                    "Cannot {} while pipeline is {}",
                    attempted_operation, current_state
                )
            }
            PipelineError::NotInitialized { missing, .. } => {
                write!(f, "Pipeline not initialized: missing {}", missing)
            }
            PipelineError::AlreadyInitialized { .. } => {
                write!(f, "Pipeline is already initialized")
            }
            PipelineError::JoinTimeout {
                thread,
                duration_ms,
                ..
            } => {
                write!(
                    f,
                    "Thread '{}' did not exit within {}ms and was detached",
                    thread, duration_ms
                )
            }
            PipelineError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            PipelineError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "I/O error during {} on '{}': {}",
                        operation, path, source
                    )
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            PipelineError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using the pipeline error type
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;

    /// Get the recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::ChannelTimeout { .. } | Self::Io { .. }
        )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::ResourceExhausted { .. } => Some(10),
            Self::ChannelTimeout { .. } => Some(0),
            Self::Io { .. } => Some(100),
            _ => None,
        }
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for PipelineError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    /// Get recovery suggestion for this error
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for PipelineError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is transient (may resolve itself)
    pub fn is_transient(error: &PipelineError) -> bool {
        matches!(
            error,
            PipelineError::ResourceExhausted { .. } | PipelineError::ChannelTimeout { .. }
        )
    }

    /// Check if an error is fatal (cannot be recovered from)
    pub fn is_fatal(error: &PipelineError) -> bool {
        matches!(
            error,
            PipelineError::Config { .. } | PipelineError::JoinTimeout { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = PipelineError::config("queue_capacity", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert!(classify::is_fatal(&error));
    }

    #[test]
    fn test_error_with_context() {
        let error = PipelineError::resource_exhausted("1920x1080 nv12", 4)
            .with_context("allocating decode target")
            .with_recovery_suggestion("release frames sooner or raise pool_capacity")
            .with_metadata("in_use", "4");

        assert_eq!(error.category(), "resource_exhausted");
        assert!(error.is_retryable());
        assert_eq!(error.retry_delay_ms(), Some(10));
        assert_eq!(
            error.recovery_suggestion(),
            Some("release frames sooner or raise pool_capacity")
        );
        assert_eq!(error.context().metadata.get("in_use").map(String::as_str), Some("4"));
        assert_eq!(error.to_string(), "Buffer pool exhausted allocating 1920x1080 nv12 (capacity 4)");
    }

    #[test]
    fn test_transient_conditions() {
        assert!(classify::is_transient(&PipelineError::channel_timeout("pop")));
        assert!(classify::is_transient(&PipelineError::resource_exhausted("8x8 rgba", 1)));
        assert!(!classify::is_transient(&PipelineError::channel_stopped("push")));
        assert!(!classify::is_transient(&PipelineError::sink_render("null", "boom")));
    }

    #[test]
    fn test_channel_timeout_message() {
        let error = PipelineError::channel_timeout("push");
        assert_eq!(error.to_string(), "Channel push timed out");
        assert_eq!(error.severity(), ErrorSeverity::Debug);
    }

    #[test]
    fn test_join_timeout_is_escalated() {
        let error = PipelineError::join_timeout("frame-consumer", 5000);
        assert!(classify::is_fatal(&error));
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_json_errors_keep_their_source() {
        let error: PipelineError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(error.category(), "external");
        assert!(error.source().is_some());
    }
}
