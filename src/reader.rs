//! Consumer side of the ring buffer

use crate::error::{Result, RingError};
use crate::frame::{Frame, FrameHeader, HEADER_SIZE};
use crate::shm::SharedRegion;

/// Single consumer of a ring buffer
///
/// Nothing here blocks: when data is missing, `get` reports it and the caller
/// tries again on its next poll.
pub struct RingReader {
    region: SharedRegion,
    /// Size of the last successful `get`, cleared by `pop`
    last_get: Option<usize>,
}

impl RingReader {
    pub fn new(region: SharedRegion) -> Self {
        Self {
            region,
            last_get: None,
        }
    }

    /// Create the region for `pid` and read from it
    pub fn create(component: &str, pid: u32, page_count: usize) -> Result<Self> {
        SharedRegion::create(component, pid, page_count).map(Self::new)
    }

    /// Bytes committed by the writer and not yet popped
    #[inline]
    pub fn available(&self) -> usize {
        self.region.used(self.region.head(), self.region.tail())
    }

    /// Contiguous view of the next `size` bytes
    #[inline]
    pub fn get(&mut self, size: usize) -> Result<&[u8]> {
        // Acquire load of head: the bytes behind it are visible from here on
        let available = self.available();
        if size > available {
            self.last_get = None;
            return Err(RingError::NotEnoughData {
                requested: size,
                available,
            });
        }

        self.last_get = Some(size);
        Ok(self.region.bytes(self.region.tail(), size))
    }

    /// Release `size` bytes back to the writer
    ///
    /// # Panics
    /// If no `get` of at least `size` bytes preceded this call.
    #[inline]
    pub fn pop(&mut self, size: usize) {
        match self.last_get.take() {
            Some(got) if size <= got => {}
            Some(got) => panic!("pop({size}) after get({got})"),
            None => panic!("pop({size}) without a preceding get()"),
        }

        // Release store: we are done reading before the space is handed back
        let tail = self.region.advance(self.region.tail(), size);
        self.region.set_tail(tail);
    }

    /// Decode the next complete frame and pass it to `f`, then pop it
    ///
    /// Returns `Ok(false)` if not even a frame header is available. Errors
    /// leave the frame in the ring.
    pub fn read_frame<F>(&mut self, f: F) -> Result<bool>
    where
        F: FnOnce(Frame<'_>),
    {
        let header = match self.get(HEADER_SIZE) {
            Ok(buf) => FrameHeader::decode(buf)?,
            Err(RingError::NotEnoughData { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        if header.size < HEADER_SIZE as u64 || header.size >= self.capacity() as u64 {
            return Err(RingError::MalformedFrame("frame size out of range"));
        }
        let size = header.size as usize;

        let frame = match self.get(size) {
            Ok(buf) => Frame::decode(buf)?,
            // The writer commits whole frames, so a partial one means the
            // stream is out of sync
            Err(RingError::NotEnoughData { .. }) => {
                return Err(RingError::MalformedFrame("frame larger than committed data"))
            }
            Err(e) => return Err(e),
        };
        f(frame);

        self.pop(size);
        Ok(true)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}
