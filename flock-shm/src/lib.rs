//! # Flock Shm
//!
//! Shared-memory substrate coupling the flock daemons to their in-host
//! clients.
//!
//! A named segment is split into a control segment (magic number, timed
//! lock, ring buffers, finite queues) and a buffer segment of equal-size
//! slots. Everything stored inside the segment is plain old data addressed
//! by integer offsets; per-process pointers are resolved on access and never
//! written into the segment itself, so the layout survives being mapped at
//! different addresses in different processes.

pub mod avl;
pub mod pool;
pub mod queue;
pub mod region;
pub mod ring;

pub use avl::ArrayAvl;
pub use pool::{BufferPool, ControlSegment, PoolGuard, SegmentHeader};
pub use queue::{FiniteQueue, QUEUE_RING_SLOTS};
pub use region::ShmRegion;
pub use ring::{Ring, SlotDesc};

use std::time::Duration;

pub type Result<T> = std::result::Result<T, ShmError>;

/// Magic number stamped into the first eight bytes of every control segment.
pub const REGION_MAGIC: u64 = 0x4711_497E_0102_0304;

/// Fixed size reserved for a control segment at the front of a region.
pub const CONTROL_SEGMENT_SIZE: usize = 1 << 16;

/// Compile-time bound of the ordinary descriptor rings.
pub const NORMAL_RING_SLOTS: usize = 64;

/// Compile-time bound of free-list rings, which must be able to hold a
/// descriptor for every slot of the buffer segment.
pub const FREE_RING_SLOTS: usize = 512;

/// Lock timeout used on paths where expiry suggests an error.
pub const LONG_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Lock timeout used on hot paths that poll an exit flag between attempts.
pub const SHORT_LOCK_TIMEOUT: Duration = Duration::from_millis(20);

/// Errors of the shared-memory layer.
///
/// `LockTimeout` and `Timeout` are recoverable (try again, check exit
/// flags); `BadMagic` and `Corrupt` indicate segment corruption or an
/// aliasing bug and must take the daemon down.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for segment lock")]
    LockTimeout,
    #[error("timed out waiting for queue space or data")]
    Timeout,
    #[error("control segment magic number mismatch")]
    BadMagic,
    #[error("shared structure inconsistency: {0}")]
    Corrupt(&'static str),
    #[error("ring buffer full")]
    RingFull,
    #[error("structure does not fit: need {needed} bytes, have {available}")]
    TooSmall { needed: usize, available: usize },
    #[error("capacity {0} out of range for this structure")]
    BadCapacity(u64),
    #[error("tree is full")]
    TreeFull,
}

/// Rounds a slot size up to a multiple of eight bytes.
pub fn round_slot_size(size: usize) -> usize {
    size.div_ceil(8) * 8
}
