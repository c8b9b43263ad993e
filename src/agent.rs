//! Producer adapter running inside the monitored process
//!
//! An [`AgentSession`] is created once when the agent is loaded and lives
//! until the process exits. Accelerator runtime callbacks feed completed
//! kernel executions into it. Recording never blocks and never fails loudly:
//! when the ring is full the event is dropped and counted.

use crate::clock::ClockSource;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::frame::KernelSpan;
use crate::writer::RingWriter;
use log::{debug, info, warn};

/// Per-process producer state
pub struct AgentSession {
    writer: RingWriter,
    clock: ClockSource,
    recorded: u64,
    dropped: u64,
}

impl AgentSession {
    /// Attach to the ring the collector created for `pid`
    pub fn attach(pid: u32, config: &AgentConfig) -> Result<Self> {
        let writer = RingWriter::attach(&config.component, pid)?;

        if let Some(pages) = config.ringbuf_pages {
            let announced = pages * rustix::param::page_size();
            if announced != writer.capacity() {
                warn!(
                    "Ring buffer has {} bytes, collector announced {}; using {}",
                    writer.capacity(),
                    announced,
                    writer.capacity()
                );
            }
        }

        info!(
            "Attached to {} ({} bytes, clock {:?})",
            writer.region().name(),
            writer.capacity(),
            config.clock
        );

        Ok(Self {
            writer,
            clock: config.clock,
            recorded: 0,
            dropped: 0,
        })
    }

    /// Attach using the configuration in the environment
    pub fn from_env(pid: u32) -> Result<Self> {
        let config = AgentConfig::from_env()?;
        Self::attach(pid, &config)
    }

    /// Current time on the session clock
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    #[inline]
    pub fn clock(&self) -> ClockSource {
        self.clock
    }

    /// Record a finished kernel execution
    ///
    /// The frame is encoded straight into the ring. Returns `false` if the
    /// event was dropped because the ring is full.
    #[inline]
    pub fn record_kernel(&mut self, start: u64, end: u64, name: &[u8]) -> bool {
        let span = KernelSpan::new(start, end, name);

        match self.writer.reserve(span.encoded_len()) {
            Ok(buf) => {
                span.encode_into(buf);
                self.writer.commit();
                self.recorded += 1;
                true
            }
            Err(_) => {
                self.dropped += 1;
                if self.dropped == 1 {
                    warn!("Ring buffer full, dropping events. Try a larger ring buffer");
                }
                false
            }
        }
    }

    /// Events committed to the ring
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Events dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        if self.dropped > 0 {
            warn!(
                "Dropped {} of {} kernel events",
                self.dropped,
                self.dropped + self.recorded
            );
        } else {
            debug!("Recorded {} kernel events", self.recorded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RingError;
    use crate::frame::Frame;
    use crate::reader::RingReader;
    use crate::shm::SharedRegion;

    fn session(component: &str) -> (RingReader, AgentSession) {
        let pid = std::process::id();
        let _ = SharedRegion::remove(component, pid);
        let reader = RingReader::create(component, pid, 1).unwrap();
        let config = AgentConfig {
            component: component.to_string(),
            ringbuf_pages: Some(1),
            ..AgentConfig::default()
        };
        (reader, AgentSession::attach(pid, &config).unwrap())
    }

    #[test]
    fn test_attach_before_collector() {
        let pid = std::process::id();
        let _ = SharedRegion::remove("test-agent-early", pid);
        let config = AgentConfig {
            component: "test-agent-early".to_string(),
            ..AgentConfig::default()
        };
        let err = AgentSession::attach(pid, &config).err().unwrap();
        assert!(matches!(err, RingError::NotFound { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_record_kernel_is_readable() {
        let (mut reader, mut agent) = session("test-agent-record");

        let start = agent.now();
        let end = agent.now();
        assert!(agent.record_kernel(start, end, b"saxpy"));
        assert_eq!(agent.recorded(), 1);

        let mut seen = None;
        assert!(reader
            .read_frame(|frame| {
                let Frame::Kernel(span) = frame;
                seen = Some((span.start, span.end, span.name.to_vec()));
            })
            .unwrap());
        assert_eq!(seen, Some((start, end, b"saxpy".to_vec())));
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let (reader, mut agent) = session("test-agent-drops");
        let name = [b'k'; 200];

        let mut committed = 0;
        while agent.record_kernel(1, 2, &name) {
            committed += 1;
        }
        let used = reader.available();

        // Further events are dropped without touching the ring
        assert!(!agent.record_kernel(3, 4, &name));
        assert_eq!(agent.recorded(), committed);
        assert_eq!(agent.dropped(), 2);
        assert_eq!(reader.available(), used);
    }
}
