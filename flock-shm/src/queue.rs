//! Bounded MPMC queue of variable-length messages, embeddable in shared
//! memory.
//!
//! A finite queue is a self-contained block: a header with its own magic
//! number, lock word and `has_data` flag, two descriptor rings (pending
//! messages and free slots) and a slab of equal-size message slots. Blocking
//! push/pop re-check their predicate after every wake with a deadline, so
//! spurious wakeups are harmless.

use crate::ring::Ring;
use crate::{Result, ShmError, REGION_MAGIC};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Compile-time bound of the two descriptor rings of a finite queue.
pub const QUEUE_RING_SLOTS: usize = 128;

const WAIT_SLEEP: Duration = Duration::from_millis(1);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MsgDesc {
    /// Byte offset of the message slot relative to the start of the slab.
    offset: u64,
    /// Bytes of message data stored in the slot.
    len: u64,
}

#[repr(C)]
struct QueueHeader {
    magic: u64,
    lock: AtomicU32,
    /// Mirrors "queue holds at least one message"; checked against the ring
    /// state on every access.
    has_data: u32,
    slot_count: u32,
    slot_bytes: u32,
    queue: Ring<MsgDesc, QUEUE_RING_SLOTS>,
    free: Ring<MsgDesc, QUEUE_RING_SLOTS>,
}

/// One process's view of a finite queue living at some address.
///
/// The view holds the per-process base addresses; the shared block itself
/// contains only offsets.
pub struct FiniteQueue {
    header: *mut QueueHeader,
    slab: *mut u8,
    slab_len: usize,
}

unsafe impl Send for FiniteQueue {}
unsafe impl Sync for FiniteQueue {}

impl FiniteQueue {
    /// Bytes required for a queue of `slot_count` messages of up to
    /// `slot_bytes` each.
    pub fn required_size(slot_count: u64, slot_bytes: usize) -> usize {
        std::mem::size_of::<QueueHeader>() + slot_count as usize * crate::round_slot_size(slot_bytes)
    }

    /// Initializes a queue in the zeroed byte block `mem`.
    ///
    /// # Safety
    ///
    /// `mem` must stay mapped and untouched by anything but queue views for
    /// the lifetime of every view created over it.
    pub unsafe fn init_at(
        mem: *mut u8,
        mem_len: usize,
        slot_count: u64,
        slot_bytes: usize,
    ) -> Result<FiniteQueue> {
        if slot_count == 0 || slot_count > (QUEUE_RING_SLOTS as u64) - 1 {
            return Err(ShmError::BadCapacity(slot_count));
        }
        let slot_bytes = crate::round_slot_size(slot_bytes);
        let needed = Self::required_size(slot_count, slot_bytes);
        if mem_len < needed {
            return Err(ShmError::TooSmall {
                needed,
                available: mem_len,
            });
        }

        let header = mem as *mut QueueHeader;
        let hdr = &mut *header;
        hdr.lock = AtomicU32::new(0);
        hdr.has_data = 0;
        hdr.slot_count = slot_count as u32;
        hdr.slot_bytes = slot_bytes as u32;
        hdr.queue.init(slot_count)?;
        hdr.free.init(slot_count)?;
        for i in 0..slot_count {
            hdr.free.push(MsgDesc {
                offset: i * slot_bytes as u64,
                len: 0,
            })?;
        }
        hdr.magic = REGION_MAGIC;

        Ok(FiniteQueue {
            header,
            slab: mem.add(std::mem::size_of::<QueueHeader>()),
            slab_len: slot_count as usize * slot_bytes,
        })
    }

    /// Attaches to a queue previously initialized at `mem`.
    ///
    /// # Safety
    ///
    /// Same contract as [`FiniteQueue::init_at`].
    pub unsafe fn attach(mem: *mut u8, mem_len: usize) -> Result<FiniteQueue> {
        if mem_len < std::mem::size_of::<QueueHeader>() {
            return Err(ShmError::TooSmall {
                needed: std::mem::size_of::<QueueHeader>(),
                available: mem_len,
            });
        }
        let header = mem as *mut QueueHeader;
        let hdr = &*header;
        if hdr.magic != REGION_MAGIC {
            return Err(ShmError::BadMagic);
        }
        let slab_len = hdr.slot_count as usize * hdr.slot_bytes as usize;
        let needed = std::mem::size_of::<QueueHeader>() + slab_len;
        if mem_len < needed {
            return Err(ShmError::TooSmall {
                needed,
                available: mem_len,
            });
        }
        Ok(FiniteQueue {
            header,
            slab: mem.add(std::mem::size_of::<QueueHeader>()),
            slab_len,
        })
    }

    pub fn slot_bytes(&self) -> usize {
        unsafe { (*self.header).slot_bytes as usize }
    }

    pub fn slot_count(&self) -> u64 {
        unsafe { (*self.header).slot_count as u64 }
    }

    fn lock(&self, timeout: Duration) -> Result<QueueGuard<'_>> {
        let hdr = unsafe { &*self.header };
        if hdr.magic != REGION_MAGIC {
            return Err(ShmError::BadMagic);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if hdr
                .lock
                .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(QueueGuard { queue: self });
            }
            if Instant::now() >= deadline {
                return Err(ShmError::LockTimeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn check_consistency(hdr: &QueueHeader) -> Result<()> {
        let flagged = hdr.has_data != 0;
        if flagged == hdr.queue.is_empty() {
            return Err(ShmError::Corrupt("finite queue has_data flag out of sync"));
        }
        Ok(())
    }

    /// Number of queued messages.
    pub fn len(&self, timeout: Duration) -> Result<usize> {
        let guard = self.lock(timeout)?;
        let hdr = unsafe { &*guard.queue.header };
        Ok(hdr.queue.len())
    }

    pub fn is_empty(&self, timeout: Duration) -> Result<bool> {
        Ok(self.len(timeout)? == 0)
    }

    /// Appends a message if there is room; `Ok(false)` when full.
    pub fn try_push(&self, data: &[u8], timeout: Duration) -> Result<bool> {
        let guard = self.lock(timeout)?;
        let hdr = unsafe { &mut *guard.queue.header };
        if !hdr.queue.is_empty() {
            Self::check_consistency(hdr)?;
        }
        if data.len() > hdr.slot_bytes as usize {
            return Err(ShmError::TooSmall {
                needed: data.len(),
                available: hdr.slot_bytes as usize,
            });
        }
        if hdr.queue.is_full() {
            return Ok(false);
        }
        let mut desc = hdr
            .free
            .pop()
            .ok_or(ShmError::Corrupt("finite queue free list exhausted early"))?;
        let offset = desc.offset as usize;
        if offset + data.len() > self.slab_len {
            return Err(ShmError::Corrupt("finite queue slot outside slab"));
        }
        unsafe {
            std::slice::from_raw_parts_mut(self.slab.add(offset), data.len())
                .copy_from_slice(data);
        }
        desc.len = data.len() as u64;
        hdr.queue.push(desc)?;
        hdr.has_data = 1;
        Ok(true)
    }

    /// Removes the oldest message if there is one.
    pub fn try_pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let guard = self.lock(timeout)?;
        let hdr = unsafe { &mut *guard.queue.header };
        if hdr.queue.is_empty() {
            if hdr.has_data != 0 {
                return Err(ShmError::Corrupt("finite queue has_data flag out of sync"));
            }
            return Ok(None);
        }
        Self::check_consistency(hdr)?;
        let mut desc = hdr
            .queue
            .pop()
            .ok_or(ShmError::Corrupt("finite queue lost its head"))?;
        let offset = desc.offset as usize;
        let len = desc.len as usize;
        if offset + len > self.slab_len {
            return Err(ShmError::Corrupt("finite queue slot outside slab"));
        }
        let data = unsafe { std::slice::from_raw_parts(self.slab.add(offset), len) }.to_vec();
        desc.len = 0;
        hdr.free.push(desc)?;
        hdr.has_data = if hdr.queue.is_empty() { 0 } else { 1 };
        Ok(Some(data))
    }

    /// Blocking push: waits for space until the deadline passes.
    pub fn push_wait(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_push(data, timeout) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(ShmError::LockTimeout) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(ShmError::Timeout);
            }
            std::thread::sleep(WAIT_SLEEP);
        }
    }

    /// Blocking pop: waits for a message until the deadline passes.
    pub fn pop_wait(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_pop(timeout) {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => {}
                Err(ShmError::LockTimeout) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(ShmError::Timeout);
            }
            std::thread::sleep(WAIT_SLEEP);
        }
    }
}

struct QueueGuard<'a> {
    queue: &'a FiniteQueue,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        unsafe { (*self.queue.header).lock.store(0, Ordering::Release) };
    }
}
