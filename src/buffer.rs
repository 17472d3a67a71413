//! Receive ring buffer between the serial device and the demuxer
//! Absorbs bursts from the module faster than the parser consumes them

use crate::serial::SerialDevice;

/// Bytes drained per call in throughput mode
pub const THROUGHPUT_CAP: usize = 255;

/// Pending device bytes discarded by `flush` before giving up
pub const FLUSH_LIMIT: usize = 500;

/// How many device bytes may be absorbed per tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainMode {
    /// Small per-tick cap so keyboard and screen stay live
    Responsive,
    /// Large per-tick cap, used while a data loop is running
    Throughput,
}

impl DrainMode {
    pub fn cap(self, responsive_cap: usize) -> usize {
        match self {
            DrainMode::Responsive => responsive_cap.max(1),
            DrainMode::Throughput => THROUGHPUT_CAP.max(responsive_cap),
        }
    }
}

/// Fixed-capacity byte queue. One slot always stays empty so that
/// `head == tail` only ever means "empty".
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    mask: usize,
    dropped: u64,
}

impl RingBuffer {
    /// Capacity is rounded up to the next power of two (minimum 2)
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(2).next_power_of_two();
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            head: 0,
            tail: 0,
            mask: size - 1,
            dropped: 0,
        }
    }

    /// Number of bytes the buffer can hold
    pub fn capacity(&self) -> usize {
        self.mask
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) & self.mask == self.tail
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Bytes refused because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append a byte; returns false and drops it when full
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            self.dropped += 1;
            return false;
        }
        self.buf[self.head] = byte;
        self.head = (self.head + 1) & self.mask;
        true
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let b = self.buf[self.tail];
        self.tail = (self.tail + 1) & self.mask;
        Some(b)
    }

    /// Move up to `cap` ready bytes from the device, never more than fit
    pub fn fill_from<D: SerialDevice + ?Sized>(&mut self, device: &mut D, cap: usize) -> usize {
        let limit = cap.min(self.free());
        let mut n = 0;
        while n < limit && device.ready() {
            self.push(device.read());
            n += 1;
        }
        n
    }

    /// Discard pending device bytes (bounded) and reset the indices
    pub fn flush<D: SerialDevice + ?Sized>(&mut self, device: &mut D) -> usize {
        let mut discarded = 0;
        while discarded < FLUSH_LIMIT && device.ready() {
            let _ = device.read();
            discarded += 1;
        }
        self.clear();
        discarded
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}
