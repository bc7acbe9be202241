//! Growable receive buffer shared between the processor and a session's codec.
//!
//! The processor appends raw bytes read from the socket at the tail; the codec
//! inspects the readable region and consumes complete frames from the head.
//! Consumed bytes are released in place, so the buffer never grows beyond the
//! largest partial frame plus one read chunk.

use std::{
    io::{self, Read},
    ops::Deref,
};

use bytes::{Buf, Bytes, BytesMut};

pub const DEFAULT_BUFFER_CAPACITY: usize = 8192;

#[derive(Debug, Default)]
pub struct MessageBuffer {
    inner: BytesMut,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Discards `count` bytes from the head of the readable region.
    ///
    /// # Panics
    ///
    /// Panics if `count` is larger than [`len`](Self::len).
    pub fn advance(&mut self, count: usize) {
        self.inner.advance(count);
    }

    /// Removes the first `count` bytes and returns them as an immutable frame.
    ///
    /// # Panics
    ///
    /// Panics if `count` is larger than [`len`](Self::len).
    pub fn split_to(&mut self, count: usize) -> Bytes {
        self.inner.split_to(count).freeze()
    }

    /// Reads a big-endian `u32` at `offset` without consuming it.
    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        let bytes = self.inner.get(offset..end)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Position of the first occurrence of `needle` at or after `from`.
    pub fn find_byte(&self, from: usize, needle: u8) -> Option<usize> {
        self.inner
            .get(from..)?
            .iter()
            .position(|b| *b == needle)
            .map(|pos| from + pos)
    }

    /// Performs a single read of at most `max` bytes from `src`, appending
    /// whatever arrived to the buffer.
    ///
    /// Only one `read` call is issued so that a busy connection cannot starve
    /// the other sessions served by the same processor.
    pub fn read_once<R: Read + ?Sized>(&mut self, src: &mut R, max: usize) -> io::Result<usize> {
        let start = self.inner.len();
        self.inner.resize(start + max, 0);
        let result = src.read(&mut self.inner[start..]);
        let filled = match &result {
            Ok(n) => *n,
            Err(_) => 0,
        };
        self.inner.truncate(start + filled);
        result
    }
}

impl Deref for MessageBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<&[u8]> for MessageBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_split_and_advance() {
        let mut buffer = MessageBuffer::from(&b"hello world"[..]);
        let head = buffer.split_to(5);
        assert_eq!(&head[..], b"hello");
        buffer.advance(1);
        assert_eq!(&buffer[..], b"world");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_peek_u32() {
        let buffer = MessageBuffer::from(&[0u8, 0, 1, 2, 9][..]);
        assert_eq!(buffer.peek_u32(0), Some(258));
        assert_eq!(buffer.peek_u32(1), Some(0x0001_0209));
        assert_eq!(buffer.peek_u32(2), None);
    }

    #[test]
    fn test_find_byte() {
        let buffer = MessageBuffer::from(&b"ab\ncd\n"[..]);
        assert_eq!(buffer.find_byte(0, b'\n'), Some(2));
        assert_eq!(buffer.find_byte(3, b'\n'), Some(5));
        assert_eq!(buffer.find_byte(6, b'\n'), None);
        assert_eq!(buffer.find_byte(42, b'\n'), None);
    }

    #[test]
    fn test_read_once_is_bounded() {
        let mut src = Cursor::new(vec![7u8; 100]);
        let mut buffer = MessageBuffer::new();
        assert_eq!(buffer.read_once(&mut src, 30).unwrap(), 30);
        assert_eq!(buffer.len(), 30);
        assert_eq!(buffer.read_once(&mut src, 100).unwrap(), 70);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.read_once(&mut src, 100).unwrap(), 0);
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn test_read_once_error_keeps_contents() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }

        let mut buffer = MessageBuffer::from(&b"abc"[..]);
        assert!(buffer.read_once(&mut Failing, 16).is_err());
        assert_eq!(&buffer[..], b"abc");
    }
}
