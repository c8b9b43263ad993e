//! Clocks the agent can stamp events with
//!
//! The collector picks the clock and hands its numeric Linux clock id to the
//! agent, so that both sides can later be put on the same time base.

use crate::error::{Result, RingError};
use rustix::time::{clock_gettime, clock_gettime_dynamic, ClockId, DynamicClockId, Timespec};

/// Clock used for agent timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    Realtime,
    Monotonic,
    #[default]
    MonotonicRaw,
    RealtimeCoarse,
    MonotonicCoarse,
    Boottime,
}

impl ClockSource {
    /// Map a Linux `clockid_t` value
    ///
    /// CPU-time clocks are rejected, they cannot order events across threads.
    pub fn from_raw(id: i32) -> Result<Self> {
        Ok(match id {
            0 => ClockSource::Realtime,
            1 => ClockSource::Monotonic,
            4 => ClockSource::MonotonicRaw,
            5 => ClockSource::RealtimeCoarse,
            6 => ClockSource::MonotonicCoarse,
            7 => ClockSource::Boottime,
            other => return Err(RingError::UnsupportedClock(other)),
        })
    }

    pub fn as_raw(self) -> i32 {
        match self {
            ClockSource::Realtime => 0,
            ClockSource::Monotonic => 1,
            ClockSource::MonotonicRaw => 4,
            ClockSource::RealtimeCoarse => 5,
            ClockSource::MonotonicCoarse => 6,
            ClockSource::Boottime => 7,
        }
    }

    /// Current time in nanoseconds
    #[inline]
    pub fn now(self) -> u64 {
        let id = match self {
            ClockSource::Realtime => ClockId::Realtime,
            ClockSource::Monotonic => ClockId::Monotonic,
            ClockSource::MonotonicRaw => ClockId::MonotonicRaw,
            ClockSource::RealtimeCoarse => ClockId::RealtimeCoarse,
            ClockSource::MonotonicCoarse => ClockId::MonotonicCoarse,
            ClockSource::Boottime => {
                return clock_gettime_dynamic(DynamicClockId::Boottime).map_or(0, to_nanos)
            }
        };
        to_nanos(clock_gettime(id))
    }
}

#[inline(always)]
fn to_nanos(ts: Timespec) -> u64 {
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}
