//! Fixed-capacity byte queue shared by the bus driver and the state machine

use core::convert::Infallible;

/// Byte FIFO, `N` must be a power of two so indices wrap with a mask.
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "buffer size is not a power of 2");
        N - 1
    };

    pub const fn new() -> Self {
        Self {
            data: [0; N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == N
    }

    #[inline]
    pub fn free(&self) -> usize {
        N - self.count
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn flush(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Queue a byte, or report that there is no room for it yet.
    pub fn push(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        if self.is_full() {
            return Err(nb::Error::WouldBlock);
        }
        self.data[self.head] = byte;
        self.head = (self.head + 1) & Self::MASK;
        self.count += 1;
        Ok(())
    }

    /// Queue a byte, discarding the oldest one when full.
    pub fn push_overwrite(&mut self, byte: u8) {
        if self.is_full() {
            self.tail = (self.tail + 1) & Self::MASK;
            self.count -= 1;
        }
        self.data[self.head] = byte;
        self.head = (self.head + 1) & Self::MASK;
        self.count += 1;
    }

    pub fn pop(&mut self) -> nb::Result<u8, Infallible> {
        if self.is_empty() {
            return Err(nb::Error::WouldBlock);
        }
        let byte = self.data[self.tail];
        self.tail = (self.tail + 1) & Self::MASK;
        self.count -= 1;
        Ok(byte)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
