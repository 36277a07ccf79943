//! Protocol data engine: the six instruction queues, the payload composer
//! and the receive-side record handlers.
//!
//! The engine owns nothing but data; mutual exclusion is the caller's
//! business (the daemon wraps it in a mutex, tests call it directly).

use crate::config::VarsConfig;
use crate::error::{VarsError, VarsStatus};
use crate::store::{EntryCore, VarStore};
use flock_proto::{
    Clock, ContainerHeader, ContainerKind, InstructionBatch, NodeId, RepCount, VarCreate,
    VarDelete, VarDescription, VarId, VarReqCreate, VarReqUpdate, VarSeqno, VarSpec, VarSummary,
    VarUpdate, VarValue, WireSerialize,
};
use std::collections::VecDeque;

/// Runtime counters of the engine, snapshot through the management
/// interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarsStats {
    pub creates_processed: u64,
    pub deletes_processed: u64,
    pub updates_processed: u64,
    pub summaries_processed: u64,
    pub req_updates_processed: u64,
    pub req_creates_processed: u64,
    pub malformed_payloads: u64,
    pub payloads_composed: u64,
    pub payloads_processed: u64,
    pub crud_creates: u64,
    pub crud_updates: u64,
    pub crud_deletes: u64,
    pub crud_reads: u64,
}

/// Snapshot row of `describe_database`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSnapshot {
    pub var_id: VarId,
    pub producer: NodeId,
    pub rep_count: RepCount,
    pub description: String,
    pub seqno: VarSeqno,
    pub tstamp_ms: i64,
    pub count_create: u8,
    pub count_update: u8,
    pub count_delete: u8,
    pub to_be_deleted: bool,
}

/// Full detail of `describe_variable`: the snapshot plus the value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDetail {
    pub snapshot: VariableSnapshot,
    pub value: Vec<u8>,
}

pub struct ProtocolData {
    own_node_id: NodeId,
    max_value_length: usize,
    max_description_length: usize,
    max_repetitions: u8,
    max_summaries: usize,
    clock: Clock,
    pub store: VarStore,
    pub stats: VarsStats,
    /// Gate for the database services; receive-side processing is gated by
    /// the daemon, not here.
    pub active: bool,
    create_q: VecDeque<VarId>,
    delete_q: VecDeque<VarId>,
    update_q: VecDeque<VarId>,
    summary_q: VecDeque<VarId>,
    req_upd_q: VecDeque<VarId>,
    req_create_q: VecDeque<VarId>,
}

fn queue_contains(q: &VecDeque<VarId>, var_id: VarId) -> bool {
    q.iter().any(|v| *v == var_id)
}

fn queue_remove(q: &mut VecDeque<VarId>, var_id: VarId) {
    q.retain(|v| *v != var_id);
}

impl ProtocolData {
    pub fn new(config: &VarsConfig, clock: Clock) -> Result<ProtocolData, VarsError> {
        Ok(ProtocolData {
            own_node_id: config.node_id,
            max_value_length: config.max_value_length,
            max_description_length: config.max_description_length,
            max_repetitions: config.max_repetitions,
            max_summaries: config.max_summaries,
            clock,
            store: VarStore::new(config.max_value_length, config.max_description_length)?,
            stats: VarsStats::default(),
            active: false,
            create_q: VecDeque::new(),
            delete_q: VecDeque::new(),
            update_q: VecDeque::new(),
            summary_q: VecDeque::new(),
            req_upd_q: VecDeque::new(),
            req_create_q: VecDeque::new(),
        })
    }

    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_system_ms()
    }

    fn purge_from_all_queues(&mut self, var_id: VarId) {
        queue_remove(&mut self.create_q, var_id);
        queue_remove(&mut self.delete_q, var_id);
        queue_remove(&mut self.update_q, var_id);
        queue_remove(&mut self.summary_q, var_id);
        queue_remove(&mut self.req_upd_q, var_id);
        queue_remove(&mut self.req_create_q, var_id);
    }

    // ------------------------------------------------------------ transmit

    fn instruction_size_create(&self, var_id: VarId) -> usize {
        // spec: id + producer + repCnt + descr; update: id + seqno + value
        (1 + NodeId::WIRE_SIZE + 1 + 1 + self.store.description_len(var_id))
            + (1 + 1 + 1 + self.store.value_len(var_id))
    }

    fn instruction_size_update(&self, var_id: VarId) -> usize {
        1 + 1 + 1 + self.store.value_len(var_id)
    }

    /// Longest queue prefix whose records fit in `available` bytes together
    /// with the container header, capped at 255.
    fn fitting_records(
        &self,
        queue: &VecDeque<VarId>,
        available: usize,
        record_size: impl Fn(&Self, VarId) -> usize,
    ) -> usize {
        let mut total = ContainerHeader::WIRE_SIZE;
        let mut count = 0usize;
        for var_id in queue.iter() {
            let size = record_size(self, *var_id);
            if total + size > available || count == u8::MAX as usize {
                break;
            }
            total += size;
            count += 1;
        }
        count
    }

    fn drop_nonexisting_deleted(store: &VarStore, q: &mut VecDeque<VarId>) {
        q.retain(|v| store.entry(*v).is_some_and(|e| !e.to_be_deleted));
    }

    fn drop_nonexisting(store: &VarStore, q: &mut VecDeque<VarId>) {
        q.retain(|v| store.contains(*v));
    }

    fn drop_live(store: &VarStore, q: &mut VecDeque<VarId>) {
        q.retain(|v| store.entry(*v).is_none_or(|e| e.to_be_deleted));
    }

    fn emit_creates(&mut self, out: &mut Vec<u8>, available: &mut usize) -> Result<(), VarsError> {
        let mut q = std::mem::take(&mut self.create_q);
        Self::drop_nonexisting_deleted(&self.store, &mut q);

        let count = self.fitting_records(&q, *available, |s, v| s.instruction_size_create(v));
        if count == 0 {
            self.create_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::Creates,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("create queue shorter than computed prefix".into())
            })?;
            let record = self.build_create(var_id)?;
            record.serialize(out)?;

            let entry = self
                .store
                .entry_mut(var_id)
                .ok_or_else(|| VarsError::Internal("create queue entry vanished".into()))?;
            if entry.count_create == 0 {
                return Err(VarsError::Internal(
                    "create queue entry with exhausted counter".into(),
                ));
            }
            entry.count_create -= 1;
            if entry.count_create > 0 {
                q.push_back(var_id);
            }
        }

        *available -= out.len() - budget;
        self.create_q = q;
        Ok(())
    }

    fn build_create(&self, var_id: VarId) -> Result<VarCreate, VarsError> {
        let entry = self
            .store
            .entry(var_id)
            .ok_or_else(|| VarsError::Internal("building create for missing entry".into()))?;
        Ok(VarCreate {
            spec: VarSpec {
                var_id,
                producer: entry.producer,
                rep_count: entry.rep_count,
                description: VarDescription::new(
                    self.store.description(var_id).unwrap_or_default(),
                ),
            },
            update: VarUpdate {
                var_id,
                seqno: entry.seqno,
                value: VarValue::new(self.store.value(var_id).unwrap_or_default()),
            },
        })
    }

    fn emit_deletes(&mut self, out: &mut Vec<u8>, available: &mut usize) -> Result<(), VarsError> {
        let mut q = std::mem::take(&mut self.delete_q);
        Self::drop_nonexisting(&self.store, &mut q);

        let count = self.fitting_records(&q, *available, |_, _| VarDelete::WIRE_SIZE);
        if count == 0 {
            self.delete_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::Deletes,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("delete queue shorter than computed prefix".into())
            })?;
            VarDelete { var_id }.serialize(out)?;

            let entry = self
                .store
                .entry_mut(var_id)
                .ok_or_else(|| VarsError::Internal("delete queue entry vanished".into()))?;
            if entry.count_delete == 0 {
                return Err(VarsError::Internal(
                    "delete queue entry with exhausted counter".into(),
                ));
            }
            entry.count_delete -= 1;
            if entry.count_delete > 0 {
                q.push_back(var_id);
            } else {
                tracing::info!(%var_id, "tombstone fully announced, removing variable");
                self.store.remove(var_id)?;
            }
        }

        *available -= out.len() - budget;
        self.delete_q = q;
        Ok(())
    }

    fn emit_updates(&mut self, out: &mut Vec<u8>, available: &mut usize) -> Result<(), VarsError> {
        let mut q = std::mem::take(&mut self.update_q);
        Self::drop_nonexisting_deleted(&self.store, &mut q);

        let count = self.fitting_records(&q, *available, |s, v| s.instruction_size_update(v));
        if count == 0 {
            self.update_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::Updates,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("update queue shorter than computed prefix".into())
            })?;
            let entry = self
                .store
                .entry(var_id)
                .ok_or_else(|| VarsError::Internal("update queue entry vanished".into()))?;
            VarUpdate {
                var_id,
                seqno: entry.seqno,
                value: VarValue::new(self.store.value(var_id).unwrap_or_default()),
            }
            .serialize(out)?;

            let entry = self.store.entry_mut(var_id).expect("entry checked above");
            if entry.count_update == 0 {
                return Err(VarsError::Internal(
                    "update queue entry with exhausted counter".into(),
                ));
            }
            entry.count_update -= 1;
            if entry.count_update > 0 {
                q.push_back(var_id);
            }
        }

        *available -= out.len() - budget;
        self.update_q = q;
        Ok(())
    }

    fn emit_summaries(&mut self, out: &mut Vec<u8>, available: &mut usize) -> Result<(), VarsError> {
        if self.max_summaries == 0 {
            return Ok(());
        }
        let mut q = std::mem::take(&mut self.summary_q);
        Self::drop_nonexisting_deleted(&self.store, &mut q);

        let count = self
            .fitting_records(&q, *available, |_, _| VarSummary::WIRE_SIZE)
            .min(self.max_summaries);
        if count == 0 {
            self.summary_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::Summaries,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("summary queue shorter than computed prefix".into())
            })?;
            // summaries rotate: every live variable gets its turn
            q.push_back(var_id);
            let entry = self
                .store
                .entry(var_id)
                .ok_or_else(|| VarsError::Internal("summary queue entry vanished".into()))?;
            VarSummary {
                var_id,
                seqno: entry.seqno,
            }
            .serialize(out)?;
        }

        *available -= out.len() - budget;
        self.summary_q = q;
        Ok(())
    }

    fn emit_req_updates(
        &mut self,
        out: &mut Vec<u8>,
        available: &mut usize,
    ) -> Result<(), VarsError> {
        let mut q = std::mem::take(&mut self.req_upd_q);
        Self::drop_nonexisting_deleted(&self.store, &mut q);

        let count = self.fitting_records(&q, *available, |_, _| VarReqUpdate::WIRE_SIZE);
        if count == 0 {
            self.req_upd_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::ReqUpdates,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("request-update queue shorter than computed prefix".into())
            })?;
            let entry = self
                .store
                .entry(var_id)
                .ok_or_else(|| VarsError::Internal("request-update queue entry vanished".into()))?;
            VarReqUpdate {
                var_id,
                seqno: entry.seqno,
            }
            .serialize(out)?;
        }

        *available -= out.len() - budget;
        self.req_upd_q = q;
        Ok(())
    }

    fn emit_req_creates(
        &mut self,
        out: &mut Vec<u8>,
        available: &mut usize,
    ) -> Result<(), VarsError> {
        let mut q = std::mem::take(&mut self.req_create_q);
        // keep only requests for variables we still know nothing about
        Self::drop_live(&self.store, &mut q);

        let count = self.fitting_records(&q, *available, |_, _| VarReqCreate::WIRE_SIZE);
        if count == 0 {
            self.req_create_q = q;
            return Ok(());
        }

        let budget = out.len();
        ContainerHeader {
            kind: ContainerKind::ReqCreates,
            count: count as u8,
        }
        .serialize(out)?;

        for _ in 0..count {
            let var_id = q.pop_front().ok_or_else(|| {
                VarsError::Internal("request-create queue shorter than computed prefix".into())
            })?;
            VarReqCreate { var_id }.serialize(out)?;
        }

        *available -= out.len() - budget;
        self.req_create_q = q;
        Ok(())
    }

    /// Composes one payload of at most `limit` bytes.
    ///
    /// Containers are serialized in the fixed order Creates, Deletes,
    /// Updates, Summaries, ReqUpdates, ReqCreates; a container is skipped
    /// entirely when not even its first record fits. Returns an empty vector
    /// when there is nothing to send.
    pub fn compose_payload(&mut self, limit: usize) -> Result<Vec<u8>, VarsError> {
        let mut out = Vec::with_capacity(limit);
        let mut available = limit;
        self.emit_creates(&mut out, &mut available)?;
        self.emit_deletes(&mut out, &mut available)?;
        self.emit_updates(&mut out, &mut available)?;
        self.emit_summaries(&mut out, &mut available)?;
        self.emit_req_updates(&mut out, &mut available)?;
        self.emit_req_creates(&mut out, &mut available)?;
        if !out.is_empty() {
            self.stats.payloads_composed += 1;
        }
        Ok(out)
    }

    // ------------------------------------------------------------- receive

    /// Applies a received create: only variables we do not know yet, from
    /// someone else, within all configured bounds.
    pub fn apply_create(&mut self, create: &VarCreate) {
        let var_id = create.spec.var_id;
        if self.store.contains(var_id)
            || create.spec.producer == self.own_node_id
            || create.spec.description.is_empty()
            || create.spec.description.len() > self.max_description_length
            || create.update.value.is_empty()
            || create.update.value.len() > self.max_value_length
            || create.spec.rep_count.0 == 0
            || create.spec.rep_count.0 > self.max_repetitions
        {
            return;
        }

        tracing::info!(%var_id, producer = %create.spec.producer, "adopting new variable");
        let core = EntryCore {
            producer: create.spec.producer,
            rep_count: create.spec.rep_count,
            seqno: create.update.seqno,
            tstamp_ms: self.now_ms(),
            count_create: create.spec.rep_count.0,
            count_update: 0,
            count_delete: 0,
            to_be_deleted: false,
        };
        if let Err(e) = self.store.insert(
            var_id,
            core,
            create.spec.description.as_str(),
            create.update.value.as_slice(),
        ) {
            tracing::error!(%var_id, error = %e, "store rejected adopted variable");
            return;
        }

        self.purge_from_all_queues(var_id);
        self.create_q.push_back(var_id);
        self.summary_q.push_back(var_id);
        self.stats.creates_processed += 1;
    }

    /// Applies a received tombstone.
    pub fn apply_delete(&mut self, delete: &VarDelete) {
        let var_id = delete.var_id;
        let own = self.own_node_id;
        let Some(entry) = self.store.entry_mut(var_id) else {
            return;
        };
        if entry.to_be_deleted || entry.producer == own {
            return;
        }

        tracing::info!(%var_id, "variable enters deletion");
        entry.to_be_deleted = true;
        entry.count_create = 0;
        entry.count_update = 0;
        entry.count_delete = entry.rep_count.0;

        self.purge_from_all_queues(var_id);
        self.delete_q.push_back(var_id);
        self.stats.deletes_processed += 1;
    }

    /// Applies a received value update.
    pub fn apply_update(&mut self, update: &VarUpdate) {
        let var_id = update.var_id;
        if !self.store.contains(var_id) {
            if !queue_contains(&self.req_create_q, var_id) {
                self.req_create_q.push_back(var_id);
            }
            return;
        }

        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.to_be_deleted
            || entry.producer == self.own_node_id
            || update.value.is_empty()
            || update.value.len() > self.max_value_length
            || entry.seqno == update.seqno
        {
            return;
        }

        if entry.seqno.more_recent_than(update.seqno) {
            // the sender lags behind; schedule updates to teach it
            if !queue_contains(&self.update_q, var_id) {
                self.update_q.push_back(var_id);
                let e = self.store.entry_mut(var_id).expect("presence checked");
                e.count_update = e.rep_count.0;
            }
            return;
        }

        if let Err(e) = self.store.write_value(var_id, update.value.as_slice()) {
            tracing::error!(%var_id, error = %e, "store rejected value update");
            return;
        }
        let now = self.now_ms();
        let e = self.store.entry_mut(var_id).expect("presence checked");
        e.seqno = update.seqno;
        e.tstamp_ms = now;
        e.count_update = e.rep_count.0;

        if !queue_contains(&self.update_q, var_id) {
            self.update_q.push_back(var_id);
        }
        queue_remove(&mut self.req_upd_q, var_id);
        self.stats.updates_processed += 1;
    }

    /// Applies a received summary.
    pub fn apply_summary(&mut self, summary: &VarSummary) {
        let var_id = summary.var_id;
        if !self.store.contains(var_id) {
            if !queue_contains(&self.req_create_q, var_id) {
                self.req_create_q.push_back(var_id);
            }
            return;
        }

        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.to_be_deleted || entry.producer == self.own_node_id {
            return;
        }
        if entry.seqno == summary.seqno {
            return;
        }

        if entry.seqno.more_recent_than(summary.seqno) {
            if !queue_contains(&self.update_q, var_id) {
                self.update_q.push_back(var_id);
                let e = self.store.entry_mut(var_id).expect("presence checked");
                e.count_update = e.rep_count.0;
            }
            return;
        }

        // our copy is stale; ask the producer side for fresher data
        if !queue_contains(&self.req_upd_q, var_id) {
            self.req_upd_q.push_back(var_id);
        }
        self.stats.summaries_processed += 1;
    }

    /// Applies a received update request.
    pub fn apply_req_update(&mut self, req: &VarReqUpdate) {
        let var_id = req.var_id;
        if !self.store.contains(var_id) {
            if !queue_contains(&self.req_create_q, var_id) {
                self.req_create_q.push_back(var_id);
            }
            return;
        }

        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.to_be_deleted {
            return;
        }
        // nothing to teach if the requester is at least as fresh
        if !entry.seqno.more_recent_than(req.seqno) {
            return;
        }

        let e = self.store.entry_mut(var_id).expect("presence checked");
        e.count_update = e.rep_count.0;
        if !queue_contains(&self.update_q, var_id) {
            self.update_q.push_back(var_id);
        }
        self.stats.req_updates_processed += 1;
    }

    /// Applies a received create request.
    pub fn apply_req_create(&mut self, req: &VarReqCreate) {
        let var_id = req.var_id;
        if !self.store.contains(var_id) {
            if !queue_contains(&self.req_create_q, var_id) {
                self.req_create_q.push_back(var_id);
            }
            return;
        }

        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.to_be_deleted {
            return;
        }

        let e = self.store.entry_mut(var_id).expect("presence checked");
        e.count_create = e.rep_count.0;
        if !queue_contains(&self.create_q, var_id) {
            self.create_q.push_back(var_id);
        }
        self.stats.req_creates_processed += 1;
    }

    /// Applies a whole parsed batch in the canonical order.
    pub fn apply_batch(&mut self, batch: &InstructionBatch) {
        for r in &batch.creates {
            self.apply_create(r);
        }
        for r in &batch.deletes {
            self.apply_delete(r);
        }
        for r in &batch.updates {
            self.apply_update(r);
        }
        for r in &batch.summaries {
            self.apply_summary(r);
        }
        for r in &batch.req_updates {
            self.apply_req_update(r);
        }
        for r in &batch.req_creates {
            self.apply_req_create(r);
        }
        self.stats.payloads_processed += 1;
    }

    /// Parses and applies one received payload under a single lock.
    pub fn process_payload(&mut self, payload: &[u8]) {
        let (batch, err) = InstructionBatch::parse(payload);
        if let Some(e) = err {
            tracing::debug!(error = %e, "stopping payload parse early");
            self.stats.malformed_payloads += 1;
        }
        self.apply_batch(&batch);
    }

    // ---------------------------------------------------------------- crud

    /// Creates a variable produced by this node.
    pub fn handle_create(
        &mut self,
        var_id: VarId,
        rep_count: RepCount,
        description: &str,
        value: &[u8],
    ) -> VarsStatus {
        if !self.active {
            return VarsStatus::Inactive;
        }
        if self.store.contains(var_id) {
            return VarsStatus::VariableExists;
        }
        if description.len() > self.max_description_length {
            return VarsStatus::DescriptionTooLong;
        }
        if value.len() > self.max_value_length {
            return VarsStatus::ValueTooLong;
        }
        if value.is_empty() {
            return VarsStatus::EmptyValue;
        }
        if rep_count.0 == 0 || rep_count.0 > self.max_repetitions {
            return VarsStatus::IllegalRepCount;
        }

        let core = EntryCore {
            producer: self.own_node_id,
            rep_count,
            seqno: VarSeqno(0),
            tstamp_ms: self.now_ms(),
            count_create: rep_count.0,
            count_update: 0,
            count_delete: 0,
            to_be_deleted: false,
        };
        if let Err(e) = self.store.insert(var_id, core, description, value) {
            tracing::error!(%var_id, error = %e, "store rejected local create");
            return VarsStatus::Internal;
        }

        self.purge_from_all_queues(var_id);
        self.create_q.push_back(var_id);
        self.summary_q.push_back(var_id);
        self.stats.crud_creates += 1;
        tracing::info!(%var_id, "created local variable");
        VarsStatus::Ok
    }

    /// Updates a variable this node produces.
    pub fn handle_update(&mut self, var_id: VarId, value: &[u8]) -> VarsStatus {
        if !self.active {
            return VarsStatus::Inactive;
        }
        if !self.store.contains(var_id) {
            return VarsStatus::VariableDoesNotExist;
        }
        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.producer != self.own_node_id {
            return VarsStatus::NotProducer;
        }
        if entry.to_be_deleted {
            return VarsStatus::VariableBeingDeleted;
        }
        if value.len() > self.max_value_length {
            return VarsStatus::ValueTooLong;
        }
        if value.is_empty() {
            return VarsStatus::EmptyValue;
        }

        if let Err(e) = self.store.write_value(var_id, value) {
            tracing::error!(%var_id, error = %e, "store rejected local update");
            return VarsStatus::Internal;
        }
        let now = self.now_ms();
        let e = self.store.entry_mut(var_id).expect("presence checked");
        e.seqno = e.seqno.next();
        e.count_update = e.rep_count.0;
        e.tstamp_ms = now;

        if !queue_contains(&self.update_q, var_id) {
            self.update_q.push_back(var_id);
        }
        self.stats.crud_updates += 1;
        VarsStatus::Ok
    }

    /// Starts deleting a variable this node produces.
    pub fn handle_delete(&mut self, var_id: VarId) -> VarsStatus {
        if !self.active {
            return VarsStatus::Inactive;
        }
        if !self.store.contains(var_id) {
            return VarsStatus::VariableDoesNotExist;
        }
        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.producer != self.own_node_id {
            return VarsStatus::NotProducer;
        }
        if entry.to_be_deleted {
            return VarsStatus::VariableBeingDeleted;
        }

        self.purge_from_all_queues(var_id);
        self.delete_q.push_back(var_id);
        let e = self.store.entry_mut(var_id).expect("presence checked");
        e.to_be_deleted = true;
        e.count_delete = e.rep_count.0;
        e.count_create = 0;
        e.count_update = 0;
        self.stats.crud_deletes += 1;
        tracing::info!(%var_id, "deleting local variable");
        VarsStatus::Ok
    }

    /// Reads a live variable's value and timestamp.
    pub fn handle_read(&mut self, var_id: VarId) -> Result<(Vec<u8>, i64), VarsStatus> {
        if !self.active {
            return Err(VarsStatus::Inactive);
        }
        if !self.store.contains(var_id) {
            return Err(VarsStatus::VariableDoesNotExist);
        }
        let entry = *self.store.entry(var_id).expect("presence checked");
        if entry.to_be_deleted {
            return Err(VarsStatus::VariableBeingDeleted);
        }
        let value = self
            .store
            .value(var_id)
            .expect("presence checked")
            .to_vec();
        self.stats.crud_reads += 1;
        Ok((value, entry.tstamp_ms))
    }

    // -------------------------------------------------------- introspection

    fn snapshot_of(&self, var_id: VarId) -> Option<VariableSnapshot> {
        let entry = self.store.entry(var_id)?;
        Some(VariableSnapshot {
            var_id,
            producer: entry.producer,
            rep_count: entry.rep_count,
            description: self.store.description(var_id).unwrap_or_default().to_owned(),
            seqno: entry.seqno,
            tstamp_ms: entry.tstamp_ms,
            count_create: entry.count_create,
            count_update: entry.count_update,
            count_delete: entry.count_delete,
            to_be_deleted: entry.to_be_deleted,
        })
    }

    /// Snapshot of every allocated variable.
    pub fn describe_database(&self) -> Vec<VariableSnapshot> {
        self.store
            .ids()
            .filter_map(|id| self.snapshot_of(id))
            .collect()
    }

    /// Snapshot plus value of one variable.
    pub fn describe_variable(&self, var_id: VarId) -> Option<VariableDetail> {
        Some(VariableDetail {
            snapshot: self.snapshot_of(var_id)?,
            value: self.store.value(var_id)?.to_vec(),
        })
    }

    // ------------------------------------------------------------ queues

    /// Queue membership probe for invariant checks in tests.
    pub fn queue_contents(&self, kind: ContainerKind) -> Vec<VarId> {
        let q = match kind {
            ContainerKind::Creates => &self.create_q,
            ContainerKind::Deletes => &self.delete_q,
            ContainerKind::Updates => &self.update_q,
            ContainerKind::Summaries => &self.summary_q,
            ContainerKind::ReqUpdates => &self.req_upd_q,
            ContainerKind::ReqCreates => &self.req_create_q,
        };
        q.iter().copied().collect()
    }
}
