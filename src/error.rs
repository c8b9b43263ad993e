//! Error types for shmtrace

use std::io;
use thiserror::Error;

/// Result type for shmtrace operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors that can occur while setting up or using a ring buffer
#[derive(Debug, Error)]
pub enum RingError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The shared memory object does not exist (yet)
    #[error("Shared memory '{name}' does not exist")]
    NotFound { name: String },

    /// The shared memory object exists but its creator has not finished initializing it
    #[error("Shared memory '{name}' is not initialized yet")]
    NotReady { name: String },

    /// Failed to remove shared memory
    #[error("Failed to remove shared memory '{name}': {source}")]
    ShmUnlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Ring buffer format differs between the two sides
    #[error("Ring buffer version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u64, got: u64 },

    /// Capacity is zero, unaligned, or larger than the object
    #[error("Invalid ring buffer capacity: {0} bytes")]
    InvalidCapacity(u64),

    /// Component tag cannot be used in a shared memory name
    #[error("Invalid component tag '{0}'")]
    InvalidComponent(String),

    /// Not enough free space to reserve the requested bytes
    #[error("No space in ring buffer: requested {requested} bytes, {free} free")]
    NoSpace { requested: usize, free: usize },

    /// Fewer bytes available than requested
    #[error("Not enough data in ring buffer: requested {requested} bytes, {available} available")]
    NotEnoughData { requested: usize, available: usize },

    /// Frame with a type tag this side does not know
    #[error("Unknown frame type {tag} ({size} bytes)")]
    UnknownFrameType { tag: u64, size: u64 },

    /// Frame whose header or payload is inconsistent
    #[error("Malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Unsupported clock id
    #[error("Unsupported clock id {0}")]
    UnsupportedClock(i32),

    /// Environment variable with an unparsable value
    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// Failed to set up or read the read timer
    #[error("Timer error: {0}")]
    Timer(#[source] io::Error),
}

impl RingError {
    /// Whether the operation may succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, RingError::NotFound { .. } | RingError::NotReady { .. })
    }
}
