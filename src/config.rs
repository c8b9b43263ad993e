//! Session configuration and the environment hand-off to the agent
//!
//! The collector decides everything: ring size, read interval and clock. The
//! agent learns the parts it needs from environment variables set by whoever
//! launches the monitored process.

use crate::clock::ClockSource;
use crate::error::{Result, RingError};
use std::time::Duration;

/// Numeric Linux clock id used for agent timestamps
pub const ENV_CLOCKID: &str = "SHMTRACE_CLOCKID";
/// Ring size in pages requested by the collector
pub const ENV_RINGBUF_PAGES: &str = "SHMTRACE_RINGBUF_PAGES";
/// Component tag used in the shared memory name
pub const ENV_COMPONENT: &str = "SHMTRACE_COMPONENT";

/// Component tag for accelerator kernel events
pub const DEFAULT_COMPONENT: &str = "gpu";

/// Default ring size (1 MiB with 4 KiB pages)
const DEFAULT_RINGBUF_PAGES: usize = 256;

/// Default interval between two drains
const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(100);

/// Collector side of a session
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Component tag of the ring
    pub component: String,
    /// Payload size of the ring in pages
    pub ringbuf_pages: usize,
    /// How often the ring is drained
    pub read_interval: Duration,
    /// Clock the agent should stamp events with
    pub clock: ClockSource,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            component: DEFAULT_COMPONENT.to_string(),
            ringbuf_pages: DEFAULT_RINGBUF_PAGES,
            read_interval: DEFAULT_READ_INTERVAL,
            clock: ClockSource::default(),
        }
    }
}

impl CollectorConfig {
    /// Environment for the monitored process, to be set before it starts
    pub fn agent_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_CLOCKID, self.clock.as_raw().to_string()),
            (ENV_RINGBUF_PAGES, self.ringbuf_pages.to_string()),
            (ENV_COMPONENT, self.component.clone()),
        ]
    }
}

/// Agent side of a session
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub component: String,
    pub clock: ClockSource,
    /// Ring size the collector announced; the header stays authoritative
    pub ringbuf_pages: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            component: DEFAULT_COMPONENT.to_string(),
            clock: ClockSource::default(),
            ringbuf_pages: None,
        }
    }
}

impl AgentConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`; unset variables keep their default
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CLOCKID) {
            let id = value.trim().parse::<i32>().map_err(|_| RingError::InvalidEnv {
                var: ENV_CLOCKID,
                value: value.clone(),
            })?;
            config.clock = ClockSource::from_raw(id)?;
        }

        if let Some(value) = lookup(ENV_RINGBUF_PAGES) {
            let pages = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&pages| pages > 0)
                .ok_or_else(|| RingError::InvalidEnv {
                    var: ENV_RINGBUF_PAGES,
                    value: value.clone(),
                })?;
            config.ringbuf_pages = Some(pages);
        }

        if let Some(value) = lookup(ENV_COMPONENT) {
            config.component = value;
        }

        Ok(config)
    }
}
