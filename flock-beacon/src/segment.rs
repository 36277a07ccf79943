//! Per-client shared-memory layout for payload exchange.
//!
//! Each registered client protocol brings one named buffer pool. The client
//! side creates the pool and tells the daemon its name at registration; the
//! daemon attaches. All rings move [`SlotDesc`] descriptors; payload bytes
//! stay in the buffer segment.

use flock_shm::{ControlSegment, Ring, SegmentHeader, SlotDesc, FREE_RING_SLOTS, NORMAL_RING_SLOTS};

/// Payload slots allocated in every client pool.
pub const CLIENT_SLOT_COUNT: u32 = 64;

/// Largest admissible `max_entries` for the dropping-queue modes, bounded by
/// the holding ring.
pub const MAX_QUEUE_ENTRIES: u16 = (NORMAL_RING_SLOTS - 1) as u16;

/// Control segment of one client's pool.
///
/// `free` feeds slots to both directions. `tx_request` carries outbound
/// payloads from the client, `rx_indication` inbound payloads from the
/// daemon, `tx_confirm` transmit notifications when the client asked for
/// them. The holding area buffers payloads between the collector and the
/// transmit scheduler: a single overwrite slot for the Once/Repeat modes, a
/// FIFO for the dropping-queue modes.
#[repr(C)]
pub struct ClientSegment {
    header: SegmentHeader,
    pub free: Ring<SlotDesc, FREE_RING_SLOTS>,
    pub tx_request: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub tx_confirm: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub rx_indication: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub hold_queue: Ring<SlotDesc, NORMAL_RING_SLOTS>,
    pub hold_buffer: SlotDesc,
    pub hold_occupied: u8,
}

impl ClientSegment {
    /// Returns a slot to the free list, clearing it first.
    pub fn release_slot(&mut self, mut desc: SlotDesc) -> flock_shm::Result<()> {
        desc.clear();
        self.free.push(desc)
    }

    /// Payloads currently waiting for transmission.
    pub fn buffered_payloads(&self) -> usize {
        self.hold_queue.len() + usize::from(self.hold_occupied != 0)
    }

    /// Drops all held payloads back onto the free list.
    pub fn clear_holding_area(&mut self) -> flock_shm::Result<()> {
        while let Some(desc) = self.hold_queue.pop() {
            self.release_slot(desc)?;
        }
        if self.hold_occupied != 0 {
            let desc = self.hold_buffer;
            self.release_slot(desc)?;
            self.hold_occupied = 0;
            self.hold_buffer = SlotDesc::default();
        }
        Ok(())
    }
}

impl ControlSegment for ClientSegment {
    fn header(&self) -> &SegmentHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut SegmentHeader {
        &mut self.header
    }

    fn init(&mut self, free_slots: &mut dyn Iterator<Item = SlotDesc>) -> flock_shm::Result<()> {
        self.free.init(FREE_RING_SLOTS as u64 - 1)?;
        self.tx_request.init(NORMAL_RING_SLOTS as u64 - 1)?;
        self.tx_confirm.init(NORMAL_RING_SLOTS as u64 - 1)?;
        self.rx_indication.init(NORMAL_RING_SLOTS as u64 - 1)?;
        self.hold_queue.init(NORMAL_RING_SLOTS as u64 - 1)?;
        self.hold_buffer = SlotDesc::default();
        self.hold_occupied = 0;
        for desc in free_slots {
            self.free.push(desc)?;
        }
        Ok(())
    }
}
