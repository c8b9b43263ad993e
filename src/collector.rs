//! Consumer adapter running in the collector
//!
//! The collector creates the ring for a monitored process and drains it
//! whenever its read timer fires. The timer is a non-blocking `timerfd` so it
//! can sit in the same poll set as every other event source of the collector.

use crate::config::CollectorConfig;
use crate::error::{Result, RingError};
use crate::frame::Frame;
use crate::reader::RingReader;
use crate::types::{Process, SpanRecord, Thread};
use log::{debug, info, warn};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::io::Errno;
use rustix::time::{
    timerfd_create, timerfd_settime, Itimerspec, TimerfdClockId, TimerfdFlags,
    TimerfdTimerFlags, Timespec,
};
use std::time::Duration;

/// Receiver of decoded records, e.g. a trace file writer
pub trait TraceSink {
    fn kernel_span(&mut self, process: Process, thread: Thread, name: &str, start: u64, end: u64);
}

impl TraceSink for Vec<SpanRecord> {
    fn kernel_span(&mut self, process: Process, thread: Thread, name: &str, start: u64, end: u64) {
        self.push(SpanRecord {
            process,
            thread,
            name: name.to_string(),
            start,
            end,
        });
    }
}

/// Reader side of one monitored process
pub struct Collector {
    process: Process,
    reader: RingReader,
    timer: OwnedFd,
    drained: u64,
}

impl Collector {
    /// Create the ring for `process` and arm the read timer
    ///
    /// Call this before the monitored process starts (or before the agent is
    /// injected) so the agent finds the ring when it attaches.
    pub fn new(process: Process, config: &CollectorConfig) -> Result<Self> {
        let reader = RingReader::create(&config.component, process.as_raw(), config.ringbuf_pages)?;
        let timer = periodic_timer(config.read_interval)?;

        info!(
            "Collecting {} through {} ({} bytes, every {:?})",
            process,
            reader.region().name(),
            reader.capacity(),
            config.read_interval
        );

        Ok(Self {
            process,
            reader,
            timer,
            drained: 0,
        })
    }

    /// Timer to poll for readability; readable means "time to drain"
    pub fn timer_fd(&self) -> BorrowedFd<'_> {
        self.timer.as_fd()
    }

    pub fn process(&self) -> Process {
        self.process
    }

    /// Records forwarded so far
    pub fn drained(&self) -> u64 {
        self.drained
    }

    /// Handle a timer tick: acknowledge it and drain the ring
    pub fn on_timer<S: TraceSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let expirations = self.ack_timer()?;
        if expirations > 1 {
            debug!("{} read intervals elapsed since last drain", expirations);
        }
        self.drain(sink)
    }

    /// Forward every complete frame currently in the ring to `sink`
    ///
    /// Records are delivered in commit order and attributed to the main
    /// thread of the monitored process.
    pub fn drain<S: TraceSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let process = self.process;
        let thread = process.as_thread();
        let mut count = 0;

        loop {
            let forwarded = self.reader.read_frame(|frame| match frame {
                Frame::Kernel(span) => {
                    sink.kernel_span(process, thread, &span.name_lossy(), span.start, span.end)
                }
            });
            match forwarded {
                Ok(true) => {
                    count += 1;
                    self.drained += 1;
                }
                Ok(false) => return Ok(count),
                Err(e) => return Err(e),
            }
        }
    }

    /// Final drain at the end of the session, then remove the ring
    ///
    /// The monitored process may be gone already; a failing final drain only
    /// means nothing more can be read.
    pub fn finish<S: TraceSink + ?Sized>(mut self, sink: &mut S) -> usize {
        let count = match self.drain(sink) {
            Ok(count) => count,
            Err(e) => {
                warn!("Final drain of {} failed: {}", self.process, e);
                0
            }
        };
        info!(
            "Finished collecting {}: {} kernel events",
            self.process, self.drained
        );
        count
    }

    fn ack_timer(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        match rustix::io::read(&self.timer, &mut buf) {
            Ok(8) => Ok(u64::from_ne_bytes(buf)),
            Ok(_) | Err(Errno::AGAIN) => Ok(0),
            Err(e) => Err(RingError::Timer(e.into())),
        }
    }
}

fn periodic_timer(interval: Duration) -> Result<OwnedFd> {
    let timer = timerfd_create(
        TimerfdClockId::Monotonic,
        TimerfdFlags::NONBLOCK | TimerfdFlags::CLOEXEC,
    )
    .map_err(|e| RingError::Timer(e.into()))?;

    // A zero interval would disarm the timer
    let interval = interval.max(Duration::from_nanos(1));
    let spec = Timespec {
        tv_sec: interval.as_secs() as _,
        tv_nsec: interval.subsec_nanos() as _,
    };
    timerfd_settime(
        &timer,
        TimerfdTimerFlags::empty(),
        &Itimerspec {
            it_interval: spec,
            it_value: spec,
        },
    )
    .map_err(|e| RingError::Timer(e.into()))?;

    Ok(timer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSession;
    use crate::config::AgentConfig;
    use crate::frame::FrameHeader;
    use crate::shm::SharedRegion;
    use crate::writer::RingWriter;

    fn collector(component: &str, pages: usize, interval: Duration) -> Collector {
        let process = Process::current();
        let _ = SharedRegion::remove(component, process.as_raw());
        let config = CollectorConfig {
            component: component.to_string(),
            ringbuf_pages: pages,
            read_interval: interval,
            ..CollectorConfig::default()
        };
        Collector::new(process, &config).unwrap()
    }

    fn agent(component: &str) -> AgentSession {
        let config = AgentConfig {
            component: component.to_string(),
            ..AgentConfig::default()
        };
        AgentSession::attach(std::process::id(), &config).unwrap()
    }

    #[test]
    fn test_three_spans_end_to_end() {
        let mut collector = collector("test-collector-e2e", 4, Duration::from_secs(1));
        let mut agent = agent("test-collector-e2e");

        assert!(agent.record_kernel(10, 20, b"A"));
        assert!(agent.record_kernel(20, 35, b"B"));
        assert!(agent.record_kernel(35, 50, b"C"));

        let mut spans: Vec<SpanRecord> = Vec::new();
        assert_eq!(collector.drain(&mut spans).unwrap(), 3);

        let process = Process::current();
        let got: Vec<(&str, u64, u64)> = spans
            .iter()
            .map(|s| {
                assert_eq!(s.process, process);
                assert_eq!(s.thread, process.as_thread());
                (s.name.as_str(), s.start, s.end)
            })
            .collect();
        assert_eq!(got, vec![("A", 10, 20), ("B", 20, 35), ("C", 35, 50)]);

        // Drained pass leaves nothing behind
        assert_eq!(collector.drain(&mut spans).unwrap(), 0);
        assert_eq!(collector.drained(), 3);
    }

    #[test]
    fn test_on_timer_drains() {
        let mut collector = collector("test-collector-timer", 1, Duration::from_millis(1));
        let mut agent = agent("test-collector-timer");
        agent.record_kernel(1, 2, b"tick");

        std::thread::sleep(Duration::from_millis(20));
        let mut spans: Vec<SpanRecord> = Vec::new();
        assert_eq!(collector.on_timer(&mut spans).unwrap(), 1);
        assert_eq!(spans[0].name, "tick");
        assert_eq!(spans[0].duration(), 1);
    }

    #[test]
    fn test_unknown_frame_fails_pass() {
        let mut collector = collector("test-collector-desync", 1, Duration::from_secs(1));
        let mut agent = agent("test-collector-desync");
        // Second writer, used strictly after the agent, to plant a foreign frame
        let mut writer =
            RingWriter::attach("test-collector-desync", std::process::id()).unwrap();

        agent.record_kernel(1, 2, b"before");
        let buf = writer.reserve(32).unwrap();
        FrameHeader { tag: 42, size: 32 }.encode(buf);
        writer.commit();

        let mut spans: Vec<SpanRecord> = Vec::new();
        let err = collector.drain(&mut spans).unwrap_err();
        assert!(matches!(err, RingError::UnknownFrameType { tag: 42, size: 32 }));
        // Frames ahead of the bad one were delivered and counted
        assert_eq!(spans.len(), 1);
        assert_eq!(collector.drained(), 1);

        // A failing final drain is not an error
        assert_eq!(collector.finish(&mut spans), 0);
    }

    #[test]
    fn test_finish_removes_ring() {
        let mut collector = collector("test-collector-finish", 1, Duration::from_secs(1));
        let mut agent = agent("test-collector-finish");
        agent.record_kernel(5, 9, b"last");

        let mut spans: Vec<SpanRecord> = Vec::new();
        assert_eq!(collector.drain(&mut spans).unwrap(), 1);
        agent.record_kernel(9, 12, b"after");
        assert_eq!(collector.finish(&mut spans), 1);
        assert_eq!(spans.len(), 2);

        let err = SharedRegion::attach("test-collector-finish", std::process::id())
            .err()
            .unwrap();
        assert!(matches!(err, RingError::NotFound { .. }));
    }
}
