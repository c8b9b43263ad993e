//! shmtrace - Shared memory transport for trace events
//!
//! Moves variable-length event records from an agent running inside a
//! monitored process to the collector that owns the trace session, through a
//! lock-free single-producer single-consumer ring buffer in POSIX shared
//! memory.
//!
//! # Architecture
//!
//! - **Collector (reader)**: creates and owns the ring, drains it on a timer
//! - **Agent (writer)**: attaches to the ring, commits one frame per event
//!
//! The ring payload is mapped twice back to back, so records that wrap around
//! the end of the buffer are still contiguous slices for both sides.

pub mod error;
pub mod shm;
pub mod writer;
pub mod reader;
pub mod frame;
pub mod clock;
pub mod config;
pub mod types;
pub mod agent;
pub mod collector;
pub mod bindings;

pub use error::{RingError, Result};
pub use shm::{SharedRegion, RINGBUF_VERSION};
pub use writer::RingWriter;
pub use reader::RingReader;
pub use frame::{EventType, Frame, FrameHeader, KernelSpan};
pub use clock::ClockSource;
pub use config::{AgentConfig, CollectorConfig};
pub use types::{Process, SpanRecord, Thread};
pub use agent::AgentSession;
pub use collector::{Collector, TraceSink};
