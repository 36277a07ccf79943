//! Fixed-capacity descriptor FIFO, embeddable in a control segment.

use crate::{Result, ShmError};

/// Descriptor of one slot in a buffer segment.
///
/// Payload bytes live at `buffer_base + offset`; the descriptor itself moves
/// between rings. No pointers, only offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotDesc {
    /// Index of the slot in the buffer segment.
    pub slot: u32,
    /// Byte offset of the slot relative to the start of the buffer segment.
    pub offset: u32,
    /// Bytes of payload currently stored in the slot.
    pub used: u32,
    /// Capacity of the slot.
    pub capacity: u32,
}

impl SlotDesc {
    pub fn clear(&mut self) {
        self.used = 0;
    }

    pub fn is_clear(&self) -> bool {
        self.used == 0
    }
}

/// A ring buffer (cyclic queue) of `N`-bounded plain-old-data elements.
///
/// One storage slot is reserved to tell a full ring from an empty one, so at
/// most `N - 1` elements are usable; a smaller capacity can be configured at
/// initialization. The structure performs no locking of its own: every
/// mutation must happen under the lock of the segment that contains it.
#[repr(C)]
pub struct Ring<T: Copy, const N: usize> {
    capacity: u32,
    head: u32,
    tail: u32,
    _pad: u32,
    slots: [T; N],
}

impl<T: Copy + Default, const N: usize> Ring<T, N> {
    /// Builds an empty ring outside shared memory (tests, process-local use).
    pub fn new(capacity: u64) -> Result<Self> {
        let mut ring = Ring {
            capacity: 0,
            head: 0,
            tail: 0,
            _pad: 0,
            slots: [T::default(); N],
        };
        ring.init(capacity)?;
        Ok(ring)
    }

    /// Prepares a zeroed ring for use. `capacity` may be at most `N - 1`.
    pub fn init(&mut self, capacity: u64) -> Result<()> {
        if capacity == 0 || capacity > (N as u64) - 1 {
            return Err(ShmError::BadCapacity(capacity));
        }
        self.capacity = capacity as u32;
        self.head = 0;
        self.tail = 0;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn len(&self) -> usize {
        let n = N as u32;
        ((self.tail + n - self.head) % n) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity as usize
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            return Err(ShmError::RingFull);
        }
        self.slots[self.tail as usize] = item;
        self.tail = (self.tail + 1) % N as u32;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head as usize];
        self.head = (self.head + 1) % N as u32;
        Some(item)
    }

    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.head as usize])
        }
    }

    /// Drops every element, keeping the configured capacity.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Visits the elements from oldest to newest.
    pub fn iter(&self) -> RingIter<'_, T, N> {
        RingIter {
            ring: self,
            at: self.head,
        }
    }
}

pub struct RingIter<'a, T: Copy, const N: usize> {
    ring: &'a Ring<T, N>,
    at: u32,
}

impl<'a, T: Copy + Default, const N: usize> Iterator for RingIter<'a, T, N> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.at == self.ring.tail {
            return None;
        }
        let item = &self.ring.slots[self.at as usize];
        self.at = (self.at + 1) % N as u32;
        Some(item)
    }
}
