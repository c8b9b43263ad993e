//! Keys and records handed to trace sinks

use std::fmt;

/// A monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Process(u32);

impl Process {
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// The calling process
    pub fn current() -> Self {
        Self(std::process::id())
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// The main thread, whose tid equals the pid
    pub const fn as_thread(self) -> Thread {
        Thread(self.0)
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {}", self.0)
    }
}

/// A thread of a monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thread(u32);

impl Thread {
    pub const fn new(tid: u32) -> Self {
        Self(tid)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

/// An owned kernel span, as collected from the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    pub process: Process,
    pub thread: Thread,
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl SpanRecord {
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}
