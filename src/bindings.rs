//! C bindings for the agent
//!
//! Lets a vendor callback shim written in C or C++ drive an
//! [`AgentSession`] through an opaque handle. No function here unwinds:
//! failures are reported as null handles or `false`.

use crate::agent::AgentSession;
use log::warn;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

// Opaque handle
pub struct AgentHandle(AgentSession);

/// Attach to the ring of the calling process
///
/// Configuration is read from the environment. Returns null if the collector
/// has not created a ring for this process; the process then simply runs
/// without tracing.
#[no_mangle]
pub extern "C" fn shmtrace_agent_init() -> *mut AgentHandle {
    match AgentSession::from_env(std::process::id()) {
        Ok(session) => Box::into_raw(Box::new(AgentHandle(session))),
        Err(e) => {
            warn!("Tracing disabled: {}", e);
            ptr::null_mut()
        }
    }
}

/// Destroy an agent handle
///
/// # Safety
/// `handle` must come from `shmtrace_agent_init` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn shmtrace_agent_destroy(handle: *mut AgentHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Current time on the session clock, for the runtime's timestamp callback
///
/// # Safety
/// `handle` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn shmtrace_agent_timestamp(handle: *const AgentHandle) -> u64 {
    match handle.as_ref() {
        Some(agent) => agent.0.now(),
        None => 0,
    }
}

/// Record a finished kernel execution
///
/// Returns `false` if the event was dropped.
///
/// # Safety
/// `handle` must be null or a live handle used by one thread at a time;
/// `name` must be null or a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn shmtrace_agent_kernel(
    handle: *mut AgentHandle,
    start: u64,
    end: u64,
    name: *const c_char,
) -> bool {
    let Some(agent) = handle.as_mut() else {
        return false;
    };
    let name = if name.is_null() {
        &[][..]
    } else {
        CStr::from_ptr(name).to_bytes()
    };
    agent.0.record_kernel(start, end, name)
}

/// Number of events dropped so far
///
/// # Safety
/// `handle` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn shmtrace_agent_dropped(handle: *const AgentHandle) -> u64 {
    match handle.as_ref() {
        Some(agent) => agent.0.dropped(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::config::{CollectorConfig, ENV_COMPONENT};
    use crate::shm::SharedRegion;
    use crate::types::{Process, SpanRecord};
    use std::ffi::CString;

    #[test]
    fn test_c_api_session() {
        let process = Process::current();
        let _ = SharedRegion::remove("test-ffi", process.as_raw());
        // Only this test reads the environment
        std::env::set_var(ENV_COMPONENT, "test-ffi");

        let config = CollectorConfig {
            component: "test-ffi".to_string(),
            ringbuf_pages: 1,
            ..CollectorConfig::default()
        };
        let mut collector = Collector::new(process, &config).unwrap();

        let kernel = CString::new("memcpy_kernel").unwrap();
        let handle = shmtrace_agent_init();
        assert!(!handle.is_null());

        unsafe {
            let start = shmtrace_agent_timestamp(handle);
            assert!(start > 0);
            assert!(shmtrace_agent_kernel(handle, start, start + 5, kernel.as_ptr()));
            assert!(shmtrace_agent_kernel(handle, start + 5, start + 6, ptr::null()));
            assert_eq!(shmtrace_agent_dropped(handle), 0);
            shmtrace_agent_destroy(handle);
        }

        let mut spans: Vec<SpanRecord> = Vec::new();
        assert_eq!(collector.drain(&mut spans).unwrap(), 2);
        assert_eq!(spans[0].name, "memcpy_kernel");
        assert_eq!(spans[0].duration(), 5);
        assert_eq!(spans[1].name, "");
    }

    #[test]
    fn test_null_handle_is_harmless() {
        unsafe {
            assert!(!shmtrace_agent_kernel(ptr::null_mut(), 1, 2, ptr::null()));
            assert_eq!(shmtrace_agent_timestamp(ptr::null()), 0);
            assert_eq!(shmtrace_agent_dropped(ptr::null()), 0);
            shmtrace_agent_destroy(ptr::null_mut());
        }
    }
}
