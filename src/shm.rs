//! Named POSIX shared memory with a double-mapped ring payload
//!
//! Layout of the shared memory object:
//!
//! ```text
//! [ header page | payload (capacity bytes) ]
//! ```
//!
//! Layout in virtual memory:
//!
//! ```text
//! [ header page | payload | payload again ]
//! ```
//!
//! The payload is mapped twice back to back, so a record that wraps around the
//! physical end of the ring is still contiguous in virtual memory and can be
//! written or read with a single slice.

use crate::error::{Result, RingError};
use log::debug;
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Version of the header and frame format. Both sides must agree.
pub const RINGBUF_VERSION: u64 = 1;

const SHM_PREFIX: &str = "/shmtrace-";
const MAX_COMPONENT_LEN: usize = 64;

/// Header stored at the start of the first page of the object
#[repr(C)]
struct RingHeader {
    /// Written last by the creator; zero means "not initialized yet"
    version: AtomicU64,
    capacity: AtomicU64,
    head: AtomicU64,
    tail: AtomicU64,
}

/// Build the object name for a component of a process
pub fn shm_name(component: &str, pid: u32) -> Result<String> {
    let valid = !component.is_empty()
        && component.len() <= MAX_COMPONENT_LEN
        && component
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return Err(RingError::InvalidComponent(component.to_string()));
    }
    Ok(format!("{}{}-{}", SHM_PREFIX, component, pid))
}

/// Handle to a double-mapped shared memory ring region
pub struct SharedRegion {
    #[allow(dead_code)]
    fd: OwnedFd,
    base: NonNull<u8>,
    page_size: usize,
    capacity: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping stays valid for the lifetime of the handle and the
// shared cursors are only touched through atomics.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Create a new region of `page_count` payload pages
    ///
    /// Fails if an object with the same name already exists. The returned
    /// handle owns the object and removes it when dropped.
    pub fn create(component: &str, pid: u32, page_count: usize) -> Result<Self> {
        let name = shm_name(component, pid)?;
        let page_size = rustix::param::page_size();

        let capacity = match page_count.checked_mul(page_size) {
            Some(c) if c > 0 && c.checked_mul(2).is_some() => c,
            _ => return Err(RingError::InvalidCapacity(page_count as u64)),
        };

        let fd = shm_open(
            name.as_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|e| RingError::ShmCreate {
            name: name.clone(),
            source: e.into(),
        })?;

        let mapped = ftruncate(&fd, (page_size + capacity) as u64)
            .map_err(|e| RingError::Truncate(e.into()))
            .and_then(|()| map_double(&fd, page_size, capacity));

        let base = match mapped {
            Ok(base) => base,
            Err(e) => {
                let _ = shm_unlink(name.as_str());
                return Err(e);
            }
        };

        let region = Self {
            fd,
            base,
            page_size,
            capacity,
            name,
            is_owner: true,
        };

        let header = region.header();
        header.capacity.store(capacity as u64, Ordering::Relaxed);
        header.head.store(0, Ordering::Relaxed);
        header.tail.store(0, Ordering::Relaxed);
        // Publish: attachers treat version 0 as "not ready"
        header.version.store(RINGBUF_VERSION, Ordering::Release);

        debug!(
            "created ring buffer {} ({} bytes payload)",
            region.name, region.capacity
        );
        Ok(region)
    }

    /// Attach to a region created by the other side
    ///
    /// The capacity is taken from the header. `NotFound` and `NotReady` are
    /// retryable: the creator may not have gotten there yet.
    pub fn attach(component: &str, pid: u32) -> Result<Self> {
        let name = shm_name(component, pid)?;
        let page_size = rustix::param::page_size();

        let fd = shm_open(name.as_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                RingError::NotFound { name: name.clone() }
            } else {
                RingError::ShmOpen {
                    name: name.clone(),
                    source: e.into(),
                }
            }
        })?;

        let stat = fstat(&fd).map_err(|e| RingError::ShmOpen {
            name: name.clone(),
            source: e.into(),
        })?;
        let object_size = stat.st_size as u64;
        if object_size < page_size as u64 {
            return Err(RingError::NotReady { name });
        }

        let (version, capacity) = read_header(&fd, page_size)?;
        if version == 0 {
            return Err(RingError::NotReady { name });
        }
        if version != RINGBUF_VERSION {
            return Err(RingError::VersionMismatch {
                expected: RINGBUF_VERSION,
                got: version,
            });
        }
        let fits = capacity
            .checked_add(page_size as u64)
            .is_some_and(|needed| needed <= object_size)
            && capacity.checked_mul(2).is_some_and(|c| c <= usize::MAX as u64);
        if capacity == 0 || capacity % page_size as u64 != 0 || !fits {
            return Err(RingError::InvalidCapacity(capacity));
        }
        let capacity = capacity as usize;

        let base = map_double(&fd, page_size, capacity)?;

        debug!("attached to ring buffer {} ({} bytes payload)", name, capacity);
        Ok(Self {
            fd,
            base,
            page_size,
            capacity,
            name,
            is_owner: false,
        })
    }

    /// Remove a named region, e.g. one left behind by a crashed collector
    pub fn remove(component: &str, pid: u32) -> Result<()> {
        let name = shm_name(component, pid)?;
        shm_unlink(name.as_str()).map_err(|e| {
            if e == Errno::NOENT {
                RingError::NotFound { name: name.clone() }
            } else {
                RingError::ShmUnlink {
                    name: name.clone(),
                    source: e.into(),
                }
            }
        })
    }

    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: the header page is mapped for as long as `self` lives and
        // page alignment satisfies the header's alignment.
        unsafe { &*self.base.as_ptr().cast::<RingHeader>() }
    }

    #[inline(always)]
    fn payload(&self) -> *mut u8 {
        // SAFETY: the mapping is page_size + 2 * capacity bytes long
        unsafe { self.base.as_ptr().add(self.page_size) }
    }

    /// Payload size in bytes
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Format version found in the header
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.header().version.load(Ordering::Acquire)
    }

    /// Get the name of the shared memory object
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this handle created (and will remove) the object
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    #[inline(always)]
    pub fn head(&self) -> u64 {
        self.header().head.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn tail(&self) -> u64 {
        self.header().tail.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set_head(&self, head: u64) {
        debug_assert!(head < self.capacity as u64);
        self.header().head.store(head, Ordering::Release);
    }

    #[inline(always)]
    pub fn set_tail(&self, tail: u64) {
        debug_assert!(tail < self.capacity as u64);
        self.header().tail.store(tail, Ordering::Release);
    }

    /// Bytes between `tail` and `head`
    #[inline(always)]
    pub fn used(&self, head: u64, tail: u64) -> usize {
        let cap = self.capacity as u64;
        // Cursors come from shared memory; keep a corrupt value from overflowing
        ((head % cap + cap - tail % cap) % cap) as usize
    }

    /// `pos` moved forward by `len` bytes, wrapped at capacity
    #[inline(always)]
    pub fn advance(&self, pos: u64, len: usize) -> u64 {
        (pos + len as u64) % self.capacity as u64
    }

    /// Contiguous view of `len` payload bytes starting at `offset`
    ///
    /// Panics if `offset` is outside the ring or `len` exceeds the capacity.
    /// Thanks to the double mapping the view may cross the physical end.
    pub(crate) fn bytes(&self, offset: u64, len: usize) -> &[u8] {
        assert!(offset < self.capacity as u64 && len <= self.capacity);
        // SAFETY: offset + len <= 2 * capacity, which is mapped
        unsafe { std::slice::from_raw_parts(self.payload().add(offset as usize), len) }
    }

    /// Mutable variant of [`bytes`](Self::bytes)
    pub(crate) fn bytes_mut(&mut self, offset: u64, len: usize) -> &mut [u8] {
        assert!(offset < self.capacity as u64 && len <= self.capacity);
        // SAFETY: in range as above; `&mut self` keeps this handle's views
        // exclusive, the other side never touches bytes it does not own
        // according to head and tail.
        unsafe { std::slice::from_raw_parts_mut(self.payload().add(offset as usize), len) }
    }

    #[cfg(test)]
    pub(crate) fn force_version(&self, version: u64) {
        self.header().version.store(version, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn force_capacity(&self, capacity: u64) {
        self.header().capacity.store(capacity, Ordering::Relaxed);
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Unmap header and both payload views in one go
        unsafe {
            let _ = munmap(
                self.base.as_ptr().cast(),
                self.page_size + 2 * self.capacity,
            );
        }

        // If owner, unlink the shared memory
        if self.is_owner {
            let _ = shm_unlink(self.name.as_str());
            debug!("removed ring buffer {}", self.name);
        }
    }
}

/// Read version and capacity through a temporary one-page mapping
fn read_header(fd: &OwnedFd, page_size: usize) -> Result<(u64, u64)> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            page_size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| RingError::Mmap(e.into()))?
    };

    let header = unsafe { &*addr.cast::<RingHeader>() };
    let version = header.version.load(Ordering::Acquire);
    let capacity = header.capacity.load(Ordering::Relaxed);

    unsafe {
        let _ = munmap(addr, page_size);
    }
    Ok((version, capacity))
}

/// Map header and payload, then map the payload a second time right behind it
///
/// There is no way to reserve virtual address space and map into it without
/// racing other mappers, so the whole `page + 2 * capacity` range is mapped
/// from the object first (the tail lies past the end of the object) and the
/// second half is then replaced with a `MAP_FIXED` mapping of the payload.
/// This only ever replaces a mapping we own.
fn map_double(fd: &OwnedFd, page_size: usize, capacity: usize) -> Result<NonNull<u8>> {
    let total = page_size + 2 * capacity;

    let base = unsafe {
        mmap(
            std::ptr::null_mut(),
            total,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| RingError::Mmap(e.into()))?
    };

    let second: *mut c_void = unsafe { base.cast::<u8>().add(page_size + capacity).cast() };
    let remapped = unsafe {
        mmap(
            second,
            capacity,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED | MapFlags::FIXED,
            fd,
            page_size as u64,
        )
    };

    // Never hand out a partially mapped region
    let failure = match remapped {
        Ok(addr) if addr == second => None,
        Ok(_) => Some(std::io::Error::other("second payload mapping landed elsewhere")),
        Err(e) => Some(e.into()),
    };
    if let Some(e) = failure {
        unsafe {
            let _ = munmap(base, total);
        }
        return Err(RingError::Mmap(e));
    }

    NonNull::new(base.cast::<u8>())
        .ok_or_else(|| RingError::Mmap(std::io::Error::other("mmap returned null")))
}
