use bytes::{Buf, BytesMut};

/// Contiguous accumulator for the inbound byte stream.
///
/// The splonebox framing forces two properties on reassembly that shape this
/// type:
///
/// - packet boundaries are only knowable after the encrypted length prefix
///   has been opened, so the verifier needs a contiguous view of the front
///   of the stream;
/// - a failed authentication discards *everything* buffered, because there
///   is no marker to resynchronize on mid-stream.
///
/// Hence: one growable buffer, byte-exact consume from the front, and a
/// cheap wholesale clear.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: BytesMut,
}

impl RecvBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a chunk read from the socket.
    #[inline]
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Borrow the buffered bytes without consuming them.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Drop the first `n` bytes (a fully processed packet).
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.buf.len());
        self.buf.advance(n);
    }

    /// Discard everything buffered. Used after an authentication failure.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
