//! Shared-memory layout of one database client.
//!
//! Four request/confirm ring pairs (create, update, delete, read) plus the
//! free list. A client takes a free slot, writes its request primitive into
//! it, pushes the descriptor onto the request ring and waits for the
//! descriptor to come back on the matching confirm ring carrying the
//! confirm primitive.

use flock_shm::{ControlSegment, Ring, SegmentHeader, SlotDesc, FREE_RING_SLOTS, NORMAL_RING_SLOTS};

/// Slots in every database-client pool.
pub const VARS_CLIENT_SLOT_COUNT: u32 = 32;

#[repr(C)]
pub struct VarsClientSegment {
    header: SegmentHeader,
    pub free: Ring<SlotDesc, FREE_RING_SLOTS>,
    pub create_req: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub create_conf: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub update_req: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub update_conf: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub delete_req: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub delete_conf: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub read_req: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub read_conf: Ring<SlotDesc, NORMAL_RING_SLOTS>,
}

impl VarsClientSegment {
    /// Returns a slot to the free list, clearing it first.
    pub fn release_slot(&mut self, mut desc: SlotDesc) -> flock_shm::Result<()> {
        desc.clear();
        self.free.push(desc)
    }
}

impl ControlSegment for VarsClientSegment {
    fn header(&self) -> &SegmentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SegmentHeader {
        &mut self.header
    }

    fn init(&mut self, free_slots: &mut dyn Iterator<Item = SlotDesc>) -> flock_shm::Result<()> {
        self.free.init(FREE_RING_SLOTS as u64 - 1)?;
        for ring in [
            &mut self.create_req,
            &mut self.create_conf,
            &mut self.update_req,
            &mut self.update_conf,
            &mut self.delete_req,
            &mut self.delete_conf,
            &mut self.read_req,
            &mut self.read_conf,
        ] {
            ring.init(NORMAL_RING_SLOTS as u64 - 1)?;
        }
        for desc in free_slots {
            self.free.push(desc)?;
        }
        Ok(())
    }
}
