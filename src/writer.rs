//! Producer side of the ring buffer
//!
//! Two-phase write: [`RingWriter::reserve`] hands out a contiguous slice at
//! the current head, the caller fills it in place, and [`RingWriter::commit`]
//! publishes it by moving head forward with a release store.

use crate::error::{Result, RingError};
use crate::shm::SharedRegion;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    offset: u64,
    size: usize,
}

/// Single producer of a ring buffer
pub struct RingWriter {
    region: SharedRegion,
    reserved: Option<Reservation>,
}

impl RingWriter {
    pub fn new(region: SharedRegion) -> Self {
        Self {
            region,
            reserved: None,
        }
    }

    /// Attach a writer to a region created by the reader
    pub fn attach(component: &str, pid: u32) -> Result<Self> {
        SharedRegion::attach(component, pid).map(Self::new)
    }

    /// Reserve `size` contiguous bytes at head
    ///
    /// Fails with `NoSpace` if the bytes would fill the ring completely; one
    /// byte always stays free so that `head == tail` means empty.
    ///
    /// # Panics
    /// If a previous reservation has not been committed.
    #[inline]
    pub fn reserve(&mut self, size: usize) -> Result<&mut [u8]> {
        assert!(
            self.reserved.is_none(),
            "reserve() called with a reservation still outstanding"
        );

        let head = self.region.head();
        let tail = self.region.tail();
        let free = self.region.capacity() - 1 - self.region.used(head, tail);
        if size > free {
            return Err(RingError::NoSpace {
                requested: size,
                free,
            });
        }

        self.reserved = Some(Reservation { offset: head, size });
        Ok(self.region.bytes_mut(head, size))
    }

    /// Publish the outstanding reservation
    ///
    /// # Panics
    /// If there is no outstanding reservation.
    #[inline]
    pub fn commit(&mut self) {
        let reservation = self
            .reserved
            .take()
            .expect("commit() called without a reservation");

        // Release store: the reserved bytes become visible before the new head
        let head = self.region.advance(reservation.offset, reservation.size);
        self.region.set_head(head);
    }

    /// Whether a reservation is outstanding
    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}
