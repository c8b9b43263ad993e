//! Event frames carried through the ring buffer
//!
//! Every frame starts with a fixed header:
//!
//! ```text
//! +----------------+----------------+---------------------+
//! | type: u64      | size: u64      | payload ...         |
//! +----------------+----------------+---------------------+
//! ```
//!
//! `size` counts header and payload. Fields use native byte order; both sides
//! always run on the same host.

use crate::error::{Result, RingError};
use std::borrow::Cow;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 16;

/// Known frame types
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Accelerator kernel execution span
    Kernel = 0,
}

impl EventType {
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(EventType::Kernel),
            _ => None,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: u64,
    pub size: u64,
}

impl FrameHeader {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(RingError::MalformedFrame("truncated header"));
        }
        Ok(Self {
            tag: read_u64(buf, 0),
            size: read_u64(buf, 8),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        write_u64(buf, 0, self.tag);
        write_u64(buf, 8, self.size);
    }
}

/// A decoded frame borrowing from the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Kernel(KernelSpan<'a>),
}

impl<'a> Frame<'a> {
    /// Decode a complete frame
    ///
    /// `buf` must hold at least `size` bytes as announced by the header.
    /// Unknown types are an error: the stream is considered out of sync.
    pub fn decode(buf: &'a [u8]) -> Result<Self> {
        let header = FrameHeader::decode(buf)?;
        if (buf.len() as u64) < header.size {
            return Err(RingError::MalformedFrame("frame shorter than its header says"));
        }
        let frame = &buf[..header.size as usize];

        match EventType::from_tag(header.tag) {
            Some(EventType::Kernel) => KernelSpan::decode(frame).map(Frame::Kernel),
            None => Err(RingError::UnknownFrameType {
                tag: header.tag,
                size: header.size,
            }),
        }
    }
}

/// Kernel span payload: start and end timestamp plus the kernel name
///
/// ```text
/// | header | start: u64 | end: u64 | name ... | 0 |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpan<'a> {
    pub start: u64,
    pub end: u64,
    /// Name without the terminating NUL
    pub name: &'a [u8],
}

const KERNEL_FIXED: usize = HEADER_SIZE + 16;

impl<'a> KernelSpan<'a> {
    pub fn new(start: u64, end: u64, name: &'a [u8]) -> Self {
        // C string semantics: stop at the first NUL
        let name = match name.iter().position(|&b| b == 0) {
            Some(nul) => &name[..nul],
            None => name,
        };
        Self { start, end, name }
    }

    /// Total frame size including header and terminating NUL
    #[inline]
    pub fn encoded_len(&self) -> usize {
        KERNEL_FIXED + self.name.len() + 1
    }

    /// Write the full frame into `buf`, which must be exactly `encoded_len()` long
    pub fn encode_into(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.encoded_len());
        FrameHeader {
            tag: EventType::Kernel as u64,
            size: buf.len() as u64,
        }
        .encode(buf);
        write_u64(buf, HEADER_SIZE, self.start);
        write_u64(buf, HEADER_SIZE + 8, self.end);

        let name_end = KERNEL_FIXED + self.name.len();
        buf[KERNEL_FIXED..name_end].copy_from_slice(self.name);
        buf[name_end] = 0;
    }

    fn decode(frame: &'a [u8]) -> Result<Self> {
        if frame.len() <= KERNEL_FIXED {
            return Err(RingError::MalformedFrame("kernel frame too short"));
        }
        let name = &frame[KERNEL_FIXED..];
        let nul = name
            .iter()
            .position(|&b| b == 0)
            .ok_or(RingError::MalformedFrame("kernel name not terminated"))?;

        Ok(Self {
            start: read_u64(frame, HEADER_SIZE),
            end: read_u64(frame, HEADER_SIZE + 8),
            name: &name[..nul],
        })
    }

    /// Name as text, replacing invalid UTF-8
    pub fn name_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }
}

#[inline(always)]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(bytes)
}

#[inline(always)]
fn write_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(span: &KernelSpan<'_>) -> Vec<u8> {
        let mut buf = vec![0u8; span.encoded_len()];
        span.encode_into(&mut buf);
        buf
    }

    #[test]
    fn test_kernel_frame_layout() {
        let span = KernelSpan::new(10, 20, b"vec_add");
        let buf = encode(&span);

        assert_eq!(buf.len(), HEADER_SIZE + 16 + 7 + 1);
        let header = FrameHeader::decode(&buf).unwrap();
        assert_eq!(header.tag, EventType::Kernel as u64);
        assert_eq!(header.size, buf.len() as u64);
        assert_eq!(*buf.last().unwrap(), 0);

        match Frame::decode(&buf).unwrap() {
            Frame::Kernel(decoded) => {
                assert_eq!(decoded, span);
                assert_eq!(decoded.name_lossy(), "vec_add");
            }
        }
    }

    #[test]
    fn test_name_truncated_at_nul() {
        let span = KernelSpan::new(1, 2, b"gemm\0garbage");
        assert_eq!(span.name, b"gemm");
        assert_eq!(span.encoded_len(), HEADER_SIZE + 16 + 5);
    }

    #[test]
    fn test_empty_name() {
        let span = KernelSpan::new(5, 6, b"");
        let buf = encode(&span);
        let Frame::Kernel(decoded) = Frame::decode(&buf).unwrap();
        assert_eq!(decoded.name, b"");
        assert_eq!((decoded.start, decoded.end), (5, 6));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let span = KernelSpan::new(3, 4, b"k");
        let mut buf = encode(&span);
        buf.extend_from_slice(b"next frame");
        let Frame::Kernel(decoded) = Frame::decode(&buf).unwrap();
        assert_eq!(decoded, span);
    }

    #[test]
    fn test_unknown_type() {
        let mut buf = vec![0u8; 24];
        FrameHeader { tag: 7, size: 24 }.encode(&mut buf);
        let err = Frame::decode(&buf).unwrap_err();
        assert!(matches!(err, RingError::UnknownFrameType { tag: 7, size: 24 }));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            FrameHeader::decode(&[0u8; 8]).unwrap_err(),
            RingError::MalformedFrame(_)
        ));

        // Header claims more bytes than available
        let mut buf = vec![0u8; 40];
        FrameHeader { tag: 0, size: 64 }.encode(&mut buf);
        assert!(matches!(
            Frame::decode(&buf).unwrap_err(),
            RingError::MalformedFrame(_)
        ));

        // Name without terminator
        let mut buf = encode(&KernelSpan::new(1, 2, b"abc"));
        let last = buf.len() - 1;
        buf[last] = b'x';
        assert!(matches!(
            Frame::decode(&buf).unwrap_err(),
            RingError::MalformedFrame(_)
        ));

        // Too short to hold timestamps
        let mut buf = vec![0u8; HEADER_SIZE];
        FrameHeader { tag: 0, size: HEADER_SIZE as u64 }.encode(&mut buf);
        assert!(matches!(
            Frame::decode(&buf).unwrap_err(),
            RingError::MalformedFrame(_)
        ));
    }
}
