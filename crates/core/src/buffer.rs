//! Growable byte buffer used for per-session input/output queues.

use bytes::{Buf, BufMut, BytesMut};

/// A `BytesMut`-backed byte queue with O(1) amortized append and head-drop.
///
/// Sessions keep one of these for inbound bytes not yet handed to the
/// protocol handler and one for outbound bytes not yet written to the
/// socket. The wrapper exists so the rest of the crate depends on this
/// narrow contract rather than on `bytes::BytesMut` directly.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    inner: BytesMut,
}

impl SessionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Appends `data` to the tail of the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.inner.put_slice(data);
    }

    /// Drops `n` bytes from the head of the buffer in O(1).
    ///
    /// `n` must not exceed `len()`.
    pub fn advance(&mut self, n: usize) {
        self.inner.advance(n);
    }

    /// Contiguous view of the currently buffered bytes, head first.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Drains and returns every buffered byte, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.inner)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_then_advance_is_fifo() {
        let mut buf = SessionBuffer::with_capacity(4);
        buf.extend(b"hello");
        buf.extend(b" world");
        assert_eq!(buf.as_slice(), b"hello world");
        buf.advance(6);
        assert_eq!(buf.as_slice(), b"world");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn advance_to_empty_reports_empty() {
        let mut buf = SessionBuffer::with_capacity(4);
        buf.extend(b"hi");
        buf.advance(2);
        assert!(buf.is_empty());
    }

    #[test]
    fn take_drains_and_resets() {
        let mut buf = SessionBuffer::with_capacity(4);
        buf.extend(b"data");
        let taken = buf.take();
        assert_eq!(&taken[..], b"data");
        assert!(buf.is_empty());
    }
}
