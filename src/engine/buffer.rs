//! Bounded receive buffer between the UART and the broadcaster.
//!
//! Overflow policy: drop-newest. The flow controller's pause signal is what
//! actually gates the upstream transmitter; if the transmitter ignores it,
//! bytes that do not fit are discarded and reported back to the caller so
//! they can be counted. Unread data is never overwritten.

use std::collections::VecDeque;

pub struct RxBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RxBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `data` as fits; returns the number of bytes dropped.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity - self.buf.len();
        let accepted = data.len().min(room);
        self.buf.extend(&data[..accepted]);
        data.len() - accepted
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn drain_chunk(&mut self, max: usize) -> Vec<u8> {
        let take = max.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    pub fn fill(&self) -> usize {
        self.buf.len()
    }

    /// Remaining headroom in bytes.
    pub fn free(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }
}

impl std::fmt::Debug for RxBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxBuffer")
            .field("fill", &self.fill())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_drain() {
        let mut buffer = RxBuffer::new(8);
        assert_eq!(buffer.push(b"abcd"), 0);
        assert_eq!(buffer.fill(), 4);
        assert_eq!(buffer.free(), 4);

        let chunk = buffer.drain_chunk(2);
        assert_eq!(chunk, b"ab");
        assert_eq!(buffer.fill(), 2);

        let chunk = buffer.drain_chunk(100);
        assert_eq!(chunk, b"cd");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let mut buffer = RxBuffer::new(4);
        assert_eq!(buffer.push(b"abcdef"), 2);
        assert!(buffer.is_full());

        // Unread data survives; the overflowing tail does not.
        assert_eq!(buffer.drain_chunk(4), b"abcd");
    }

    #[test]
    fn test_push_when_full() {
        let mut buffer = RxBuffer::new(2);
        buffer.push(b"ab");
        assert_eq!(buffer.push(b"cd"), 2);
        assert_eq!(buffer.fill(), 2);
    }

    #[test]
    fn test_fill_never_exceeds_capacity() {
        let mut buffer = RxBuffer::new(16);
        for _ in 0..10 {
            buffer.push(&[0u8; 7]);
            assert!(buffer.fill() <= buffer.capacity());
        }
    }
}
