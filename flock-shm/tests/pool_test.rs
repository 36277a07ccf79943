use flock_shm::{
    BufferPool, ControlSegment, PoolGuard, Ring, SegmentHeader, ShmError, SlotDesc,
    FREE_RING_SLOTS, NORMAL_RING_SLOTS,
};
use std::time::Duration;

/// Minimal segment used by the tests: a free list and one work ring.
#[repr(C)]
struct TestSegment {
    header: SegmentHeader,
    free: Ring<SlotDesc, FREE_RING_SLOTS>,
    work: Ring<SlotDesc, NORMAL_RING_SLOTS>,
}

impl ControlSegment for TestSegment {
    fn header(&self) -> &SegmentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SegmentHeader {
        &mut self.header
    }

    fn init(&mut self, free_slots: &mut dyn Iterator<Item = SlotDesc>) -> flock_shm::Result<()> {
        self.free.init(FREE_RING_SLOTS as u64 - 1)?;
        self.work.init(NORMAL_RING_SLOTS as u64 - 1)?;
        for desc in free_slots {
            self.free.push(desc)?;
        }
        Ok(())
    }
}

fn pool_path(name: &str) -> tempfile::TempPath {
    let dir = std::env::temp_dir();
    // the region wants to create the file itself, so only reserve a name
    let path = dir.join(format!("flock-shm-test-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_file(&path);
    tempfile::TempPath::from_path(path)
}

#[test]
fn create_seeds_free_list_with_all_slots() {
    let path = pool_path("seed");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 16, 100).unwrap();
    assert_eq!(pool.slot_size(), 104, "slot size rounds up to multiple of 8");
    let guard = pool.lock(Duration::from_millis(100)).unwrap();
    assert_eq!(guard.free.len(), 16);
    assert!(guard.work.is_empty());
}

#[test]
fn payload_round_trip_through_slots() {
    let path = pool_path("roundtrip");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 4, 64).unwrap();

    {
        let mut guard = pool.lock(Duration::from_millis(100)).unwrap();
        let mut desc = guard.free.pop().unwrap();
        guard.fill_slot(&mut desc, b"hello beacon").unwrap();
        guard.work.push(desc).unwrap();
    }

    let attached: BufferPool<TestSegment> = BufferPool::open(&path).unwrap();
    {
        let mut guard = attached.lock(Duration::from_millis(100)).unwrap();
        let mut desc = guard.work.pop().unwrap();
        assert_eq!(guard.slot_bytes(&desc).unwrap(), b"hello beacon");
        desc.clear();
        guard.free.push(desc).unwrap();
        assert_eq!(guard.free.len(), 4);
    }
}

#[test]
fn attach_sees_creator_geometry() {
    let path = pool_path("geometry");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 8, 256).unwrap();
    let attached: BufferPool<TestSegment> = BufferPool::open(&path).unwrap();
    assert_eq!(attached.slot_count(), 8);
    assert_eq!(attached.slot_size(), 256);
    assert!(!attached.is_creator());
    assert!(pool.is_creator());
}

#[test]
fn lock_times_out_while_held() {
    let path = pool_path("locktimeout");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 2, 32).unwrap();
    let attached: BufferPool<TestSegment> = BufferPool::open(&path).unwrap();

    let _held: PoolGuard<'_, TestSegment> = pool.lock(Duration::from_millis(100)).unwrap();
    let err = attached.lock(Duration::from_millis(30)).unwrap_err();
    assert!(matches!(err, ShmError::LockTimeout));
}

#[test]
fn lock_released_on_guard_drop() {
    let path = pool_path("release");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 2, 32).unwrap();
    {
        let _guard = pool.lock(Duration::from_millis(50)).unwrap();
    }
    assert!(pool.lock(Duration::from_millis(50)).is_ok());
}

#[test]
fn creator_removes_region_on_drop() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("flock-shm-test-{}-drop", std::process::id()));
    let _ = std::fs::remove_file(&path);
    {
        let _pool: BufferPool<TestSegment> = BufferPool::create(&path, 2, 32).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists(), "creator unlinks the region");
}

#[test]
fn oversized_fill_is_rejected() {
    let path = pool_path("oversize");
    let pool: BufferPool<TestSegment> = BufferPool::create(&path, 2, 32).unwrap();
    let mut guard = pool.lock(Duration::from_millis(50)).unwrap();
    let mut desc = guard.free.pop().unwrap();
    let too_big = vec![0u8; 64];
    assert!(guard.fill_slot(&mut desc, &too_big).is_err());
}
