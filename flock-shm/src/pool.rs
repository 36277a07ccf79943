//! Shared buffer pools: a typed control segment plus a slab of payload slots.

use crate::region::ShmRegion;
use crate::ring::SlotDesc;
use crate::{Result, ShmError, CONTROL_SEGMENT_SIZE, REGION_MAGIC};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Sleep between lock-acquisition attempts.
const LOCK_SPIN_SLEEP: Duration = Duration::from_micros(200);

/// Common prefix of every control segment.
///
/// The magic number occupies the first eight bytes of the segment and is
/// re-verified on every lock acquisition; a mismatch means the mapping is
/// corrupt or aliased and is treated as fatal by callers. The lock word is a
/// plain unlocked/locked flag driven by compare-and-swap with bounded
/// waiting, which keeps the segment free of process-private state.
#[repr(C)]
pub struct SegmentHeader {
    magic: u64,
    lock: AtomicU32,
    slot_count: u32,
    slot_size: u32,
    _pad: u32,
}

impl SegmentHeader {
    fn init(&mut self, slot_count: u32, slot_size: u32) {
        self.lock = AtomicU32::new(0);
        self.slot_count = slot_count;
        self.slot_size = slot_size;
        self.magic = REGION_MAGIC;
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    pub fn assert_magic(&self) -> Result<()> {
        if self.magic != REGION_MAGIC {
            return Err(ShmError::BadMagic);
        }
        Ok(())
    }

    /// Acquires the segment lock, giving up at the deadline.
    ///
    /// Expiry is a recoverable condition: the caller retries or checks its
    /// exit flag. Spurious failures of the compare-exchange are folded into
    /// the retry loop.
    pub fn timed_lock(&self, timeout: Duration) -> Result<()> {
        self.assert_magic()?;
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .lock
                .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ShmError::LockTimeout);
            }
            std::thread::sleep(LOCK_SPIN_SLEEP);
        }
    }

    pub fn unlock(&self) {
        self.lock.store(0, Ordering::Release);
    }
}

/// Contract for concrete control segments.
///
/// Implementors must be `#[repr(C)]` with a [`SegmentHeader`] as their first
/// field, contain only plain-old-data (offsets, rings, counters — never
/// pointers), and fit inside [`CONTROL_SEGMENT_SIZE`].
pub trait ControlSegment: Sized {
    fn header(&self) -> &SegmentHeader;

    fn header_mut(&mut self) -> &mut SegmentHeader;

    /// Called exactly once on the zeroed segment when the pool is created.
    /// `free_slots` describes every slot of the buffer segment; the segment
    /// seeds its free list from it.
    fn init(&mut self, free_slots: &mut dyn Iterator<Item = SlotDesc>) -> Result<()>;
}

/// One process's handle on a named buffer pool.
///
/// The daemon side creates the pool (and removes it on destruction); clients
/// attach to the existing name. All access to the control segment goes
/// through [`BufferPool::lock`], which hands out a guard that both derefs to
/// the typed segment and exposes the payload slots of the buffer segment.
pub struct BufferPool<C: ControlSegment> {
    region: ShmRegion,
    control: *mut C,
    buffer_base: *mut u8,
    buffer_len: usize,
    _segment: PhantomData<C>,
}

// Concurrent access to the shared mapping is serialized by the in-segment
// lock; the pool handle itself only holds stable pointers into the mapping.
unsafe impl<C: ControlSegment> Send for BufferPool<C> {}
unsafe impl<C: ControlSegment> Sync for BufferPool<C> {}

impl<C: ControlSegment> BufferPool<C> {
    /// Creates the named pool with `slot_count` payload slots of
    /// `slot_size` bytes (rounded up to a multiple of eight).
    pub fn create(path: &Path, slot_count: u32, slot_size: usize) -> Result<BufferPool<C>> {
        if std::mem::size_of::<C>() + std::mem::size_of::<u64>() > CONTROL_SEGMENT_SIZE {
            return Err(ShmError::TooSmall {
                needed: std::mem::size_of::<C>(),
                available: CONTROL_SEGMENT_SIZE,
            });
        }
        let slot_size = crate::round_slot_size(slot_size);
        let buffer_len = slot_count as usize * slot_size;
        let region = ShmRegion::create(path, CONTROL_SEGMENT_SIZE + buffer_len)?;

        let control = region.base_ptr() as *mut C;
        let buffer_base = unsafe { region.base_ptr().add(CONTROL_SEGMENT_SIZE) };

        // The region arrives zeroed; stamp geometry and magic, then let the
        // segment seed its rings.
        let seg = unsafe { &mut *control };
        seg.header_mut().init(slot_count, slot_size as u32);
        let mut slots = (0..slot_count).map(|i| SlotDesc {
            slot: i,
            offset: i * slot_size as u32,
            used: 0,
            capacity: slot_size as u32,
        });
        seg.init(&mut slots)?;

        Ok(BufferPool {
            region,
            control,
            buffer_base,
            buffer_len,
            _segment: PhantomData,
        })
    }

    /// Attaches to a pool created by another process.
    pub fn open(path: &Path) -> Result<BufferPool<C>> {
        let region = ShmRegion::open(path)?;
        if region.len() < CONTROL_SEGMENT_SIZE {
            return Err(ShmError::TooSmall {
                needed: CONTROL_SEGMENT_SIZE,
                available: region.len(),
            });
        }
        let control = region.base_ptr() as *mut C;
        let seg = unsafe { &*control };
        seg.header().assert_magic()?;
        let buffer_len = seg.header().slot_count() as usize * seg.header().slot_size() as usize;
        region.check_window(CONTROL_SEGMENT_SIZE, buffer_len)?;
        let buffer_base = unsafe { region.base_ptr().add(CONTROL_SEGMENT_SIZE) };
        Ok(BufferPool {
            region,
            control,
            buffer_base,
            buffer_len,
            _segment: PhantomData,
        })
    }

    pub fn is_creator(&self) -> bool {
        self.region.is_creator()
    }

    pub fn path(&self) -> &Path {
        self.region.path()
    }

    pub fn slot_size(&self) -> usize {
        unsafe { (*self.control).header().slot_size() as usize }
    }

    pub fn slot_count(&self) -> u32 {
        unsafe { (*self.control).header().slot_count() }
    }

    /// Locks the segment and returns a guard for working with it.
    pub fn lock(&self, timeout: Duration) -> Result<PoolGuard<'_, C>> {
        unsafe { (*self.control).header().timed_lock(timeout)? };
        Ok(PoolGuard { pool: self })
    }
}

impl<C: ControlSegment> std::fmt::Debug for BufferPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("region", &self.region)
            .field("slot_count", &self.slot_count())
            .field("slot_size", &self.slot_size())
            .finish()
    }
}

/// Exclusive view of a locked pool: the typed control segment plus the
/// payload windows of the buffer segment. Unlocks on drop.
pub struct PoolGuard<'a, C: ControlSegment> {
    pool: &'a BufferPool<C>,
}

impl<C: ControlSegment> PoolGuard<'_, C> {
    fn window(&self, desc: &SlotDesc, len: usize) -> Result<(usize, usize)> {
        let offset = desc.offset as usize;
        let end = offset
            .checked_add(len)
            .ok_or(ShmError::Corrupt("slot window overflow"))?;
        if end > self.pool.buffer_len || len > desc.capacity as usize {
            return Err(ShmError::Corrupt("slot window outside buffer segment"));
        }
        Ok((offset, len))
    }

    /// The payload bytes currently stored in a slot.
    pub fn slot_bytes(&self, desc: &SlotDesc) -> Result<&[u8]> {
        let (offset, len) = self.window(desc, desc.used as usize)?;
        Ok(unsafe { std::slice::from_raw_parts(self.pool.buffer_base.add(offset), len) })
    }

    /// Copies `data` into the slot and records the used length.
    pub fn fill_slot(&mut self, desc: &mut SlotDesc, data: &[u8]) -> Result<()> {
        let (offset, len) = self.window(desc, data.len())?;
        unsafe {
            std::slice::from_raw_parts_mut(self.pool.buffer_base.add(offset), len)
                .copy_from_slice(data);
        }
        desc.used = data.len() as u32;
        Ok(())
    }
}

impl<C: ControlSegment> std::fmt::Debug for PoolGuard<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard").field("pool", &self.pool).finish()
    }
}

impl<C: ControlSegment> std::ops::Deref for PoolGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        unsafe { &*self.pool.control }
    }
}

impl<C: ControlSegment> std::ops::DerefMut for PoolGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        unsafe { &mut *self.pool.control }
    }
}

impl<C: ControlSegment> Drop for PoolGuard<'_, C> {
    fn drop(&mut self) {
        unsafe { (*self.pool.control).header().unlock() };
    }
}
