//! Error types for streamhook.
//!
//! All errors are strongly typed using thiserror. Lifecycle operations
//! (start/shutdown/restart) never surface these to the host; they are logged
//! at the point of failure. The types still matter at the configuration
//! boundary and at the seams to external collaborators.

use thiserror::Error;

/// Configuration errors, raised when a `GlobalConfig` is loaded or saved.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Application name is required")]
    EmptyApplicationName,

    #[error("Stream name cannot be empty")]
    EmptyStreamName,

    #[error("Stream '{stream}' is configured more than once")]
    DuplicateStream {
        stream: String,
    },

    #[error("Stream '{stream}' is not configured")]
    StreamNotConfigured {
        stream: String,
    },

    #[error("'{value}' is not a valid URL: {reason}")]
    InvalidEndpoint {
        value: String,
        reason: String,
    },

    #[error("'{value}' is not a valid region")]
    InvalidRegion {
        value: String,
    },

    #[error("'{value}' is not a valid initial position. Valid positions: TRIM_HORIZON, LATEST")]
    InvalidInitialPosition {
        value: String,
    },

    #[error("Stream '{stream}' triggers downstream updates but has no project field path")]
    MissingProjectPath {
        stream: String,
    },

    #[error("Stream '{stream}' has an invalid project field path: {source}")]
    InvalidProjectPath {
        stream: String,
        #[source]
        source: JsonPathError,
    },

    #[error("Failed to read configuration: {message}")]
    Io {
        message: String,
    },

    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },
}

/// JSON path compilation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JsonPathError {
    #[error("empty path expression")]
    Empty,

    #[error("path must start with '$'")]
    MissingRoot,

    #[error("empty member name at position {position}")]
    EmptyMember {
        position: usize,
    },

    #[error("unclosed bracket at position {position}")]
    UnclosedBracket {
        position: usize,
    },

    #[error("invalid bracket selector '{selector}'")]
    InvalidSelector {
        selector: String,
    },

    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedChar {
        found: char,
        position: usize,
    },
}

/// Errors at the stream scheduler seam.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to build scheduler for stream '{stream}': {reason}")]
    Construction {
        stream: String,
        reason: String,
    },

    #[error("Failed to spawn worker thread for stream '{stream}': {reason}")]
    Spawn {
        stream: String,
        reason: String,
    },

    #[error("Worker for stream '{stream}' was already started")]
    AlreadyStarted {
        stream: String,
    },

    /// The checkpoint handle is no longer valid for this shard.
    #[error("Invalid checkpoint state: {message}")]
    InvalidState {
        message: String,
    },

    /// The scheduler is shutting down and no longer accepts checkpoints.
    #[error("Scheduler is shutting down: {message}")]
    Shutdown {
        message: String,
    },

    #[error("Graceful shutdown did not complete within {duration_ms}ms")]
    ShutdownTimeout {
        duration_ms: u64,
    },

    #[error("Graceful shutdown signal was dropped before completion")]
    ShutdownAbandoned,
}

/// Observer failures raised during fan-out.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Observer '{observer}' failed: {message}")]
    Failed {
        observer: String,
        message: String,
    },

    #[error("Observer '{observer}' panicked: {message}")]
    Panicked {
        observer: String,
        message: String,
    },
}

/// Errors from the hosting environment.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Runtime is not started or is stopped")]
    RuntimeNotAvailable,

    #[error("Downstream host error: {message}")]
    Downstream {
        message: String,
    },
}

/// Top-level error type for streamhook.
///
/// Scheduler and listener failures never reach the host; they are logged
/// where they happen and so have no variant here.
#[derive(Debug, Error)]
pub enum StreamHookError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl StreamHookError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is a host error.
    #[must_use]
    pub const fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }

    /// Returns true if the same call could succeed later without changes,
    /// as when the host has not started yet.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Host(HostError::RuntimeNotAvailable))
    }
}

/// Result type alias for streamhook operations.
pub type StreamHookResult<T> = Result<T, StreamHookError>;
