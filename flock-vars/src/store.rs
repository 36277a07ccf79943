//! Fixed-array backing store of the real-time database.
//!
//! One slot per possible variable identifier, with two pre-allocated slabs
//! for values and descriptions and a free list handing out slab windows. No
//! allocation happens after construction; offsets, not pointers, address the
//! slabs.

use crate::error::VarsError;
use flock_proto::{NodeId, RepCount, VarId, VarSeqno};
use flock_shm::Ring;

/// Number of identifier slots (the full 8-bit identifier space).
pub const ID_SLOTS: usize = 256;

/// Mutable protocol state of one variable, value and description excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCore {
    pub producer: NodeId,
    pub rep_count: RepCount,
    pub seqno: VarSeqno,
    /// Local receive/update timestamp; never serialized cross-node.
    pub tstamp_ms: i64,
    pub count_create: u8,
    pub count_update: u8,
    pub count_delete: u8,
    pub to_be_deleted: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct IdState {
    used: bool,
    core: EntryCore,
    buffer_slot: u32,
    value_len: u32,
    descr_len: u32,
}

impl Default for EntryCore {
    fn default() -> Self {
        EntryCore {
            producer: NodeId::NULL,
            rep_count: RepCount(0),
            seqno: VarSeqno(0),
            tstamp_ms: 0,
            count_create: 0,
            count_update: 0,
            count_delete: 0,
            to_be_deleted: false,
        }
    }
}

/// The variable store: identifier slots plus value/description slabs.
pub struct VarStore {
    ids: Vec<IdState>,
    value_slab: Box<[u8]>,
    descr_slab: Box<[u8]>,
    free: Ring<u32, { ID_SLOTS + 1 }>,
    value_cap: usize,
    descr_cap: usize,
    len: usize,
}

impl VarStore {
    pub fn new(value_cap: usize, descr_cap: usize) -> Result<VarStore, VarsError> {
        if value_cap == 0 || value_cap > u8::MAX as usize {
            return Err(VarsError::Config(format!(
                "value buffer size {value_cap} outside 1..=255"
            )));
        }
        if descr_cap == 0 || descr_cap > u8::MAX as usize {
            return Err(VarsError::Config(format!(
                "description buffer size {descr_cap} outside 1..=255"
            )));
        }
        let mut free = Ring::new(ID_SLOTS as u64).map_err(VarsError::Shm)?;
        for i in 0..ID_SLOTS as u32 {
            free.push(i).map_err(VarsError::Shm)?;
        }
        Ok(VarStore {
            ids: vec![IdState::default(); ID_SLOTS],
            value_slab: vec![0u8; ID_SLOTS * value_cap].into_boxed_slice(),
            descr_slab: vec![0u8; ID_SLOTS * descr_cap].into_boxed_slice(),
            free,
            value_cap,
            descr_cap,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, var_id: VarId) -> bool {
        self.ids[var_id.0 as usize].used
    }

    pub fn entry(&self, var_id: VarId) -> Option<&EntryCore> {
        let state = &self.ids[var_id.0 as usize];
        state.used.then_some(&state.core)
    }

    pub fn entry_mut(&mut self, var_id: VarId) -> Option<&mut EntryCore> {
        let state = &mut self.ids[var_id.0 as usize];
        state.used.then_some(&mut state.core)
    }

    pub fn value(&self, var_id: VarId) -> Option<&[u8]> {
        let state = &self.ids[var_id.0 as usize];
        if !state.used {
            return None;
        }
        let off = state.buffer_slot as usize * self.value_cap;
        Some(&self.value_slab[off..off + state.value_len as usize])
    }

    pub fn description(&self, var_id: VarId) -> Option<&str> {
        let state = &self.ids[var_id.0 as usize];
        if !state.used {
            return None;
        }
        let off = state.buffer_slot as usize * self.descr_cap;
        std::str::from_utf8(&self.descr_slab[off..off + state.descr_len as usize]).ok()
    }

    pub fn value_len(&self, var_id: VarId) -> usize {
        self.ids[var_id.0 as usize].value_len as usize
    }

    pub fn description_len(&self, var_id: VarId) -> usize {
        self.ids[var_id.0 as usize].descr_len as usize
    }

    /// Inserts a fresh entry. The identifier must be unused; value and
    /// description must fit their slabs (the engine validates both against
    /// its configured bounds beforehand).
    pub fn insert(
        &mut self,
        var_id: VarId,
        core: EntryCore,
        description: &str,
        value: &[u8],
    ) -> Result<(), VarsError> {
        let idx = var_id.0 as usize;
        if self.ids[idx].used {
            return Err(VarsError::Internal(format!(
                "identifier {var_id} already allocated"
            )));
        }
        if value.len() > self.value_cap || description.len() > self.descr_cap {
            return Err(VarsError::Internal(format!(
                "value or description of {var_id} exceeds slab window"
            )));
        }
        let slot = self
            .free
            .pop()
            .ok_or_else(|| VarsError::Internal("store free list exhausted".into()))?;

        let voff = slot as usize * self.value_cap;
        self.value_slab[voff..voff + value.len()].copy_from_slice(value);
        let doff = slot as usize * self.descr_cap;
        self.descr_slab[doff..doff + description.len()].copy_from_slice(description.as_bytes());

        self.ids[idx] = IdState {
            used: true,
            core,
            buffer_slot: slot,
            value_len: value.len() as u32,
            descr_len: description.len() as u32,
        };
        self.len += 1;
        Ok(())
    }

    /// Overwrites the value of an existing, live entry.
    pub fn write_value(&mut self, var_id: VarId, value: &[u8]) -> Result<(), VarsError> {
        let idx = var_id.0 as usize;
        if !self.ids[idx].used {
            return Err(VarsError::Internal(format!(
                "write to unallocated identifier {var_id}"
            )));
        }
        if value.len() > self.value_cap {
            return Err(VarsError::Internal(format!(
                "value of {var_id} exceeds slab window"
            )));
        }
        let slot = self.ids[idx].buffer_slot;
        let off = slot as usize * self.value_cap;
        self.value_slab[off..off + value.len()].copy_from_slice(value);
        self.ids[idx].value_len = value.len() as u32;
        Ok(())
    }

    /// Releases an entry and returns its slab window to the free list.
    pub fn remove(&mut self, var_id: VarId) -> Result<(), VarsError> {
        let idx = var_id.0 as usize;
        if !self.ids[idx].used {
            return Err(VarsError::Internal(format!(
                "removal of unallocated identifier {var_id}"
            )));
        }
        let slot = self.ids[idx].buffer_slot;
        self.ids[idx] = IdState::default();
        self.free
            .push(slot)
            .map_err(|_| VarsError::Internal("store free list cannot take a slot back".into()))?;
        self.len -= 1;
        Ok(())
    }

    /// Identifiers of all allocated entries, ascending.
    pub fn ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.ids
            .iter()
            .enumerate()
            .filter(|(_, s)| s.used)
            .map(|(i, _)| VarId(i as u8))
    }
}
