//! Instruction records and containers of the variable-dissemination payload.
//!
//! A payload is a sequence of instruction containers, each a two-byte header
//! (kind, record count) followed by that many homogeneous records. Parsing
//! is self-terminating on a container boundary: it stops when the payload is
//! exhausted or an unknown kind is met.

use crate::types::{NodeId, RepCount, VarDescription, VarId, VarSeqno, VarValue};
use crate::{Result, WireDeserialize, WireError, WireSerialize, WireSize};
use std::io::{Read, Write};

/// Discriminator for instruction container contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContainerKind {
    Summaries = 1,
    Updates = 2,
    ReqUpdates = 3,
    ReqCreates = 4,
    Creates = 5,
    Deletes = 6,
}

impl ContainerKind {
    pub fn from_wire(val: u8) -> Result<ContainerKind> {
        match val {
            1 => Ok(ContainerKind::Summaries),
            2 => Ok(ContainerKind::Updates),
            3 => Ok(ContainerKind::ReqUpdates),
            4 => Ok(ContainerKind::ReqCreates),
            5 => Ok(ContainerKind::Creates),
            6 => Ok(ContainerKind::Deletes),
            other => Err(WireError::UnknownContainerKind(other)),
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContainerKind::Summaries => "summaries",
            ContainerKind::Updates => "updates",
            ContainerKind::ReqUpdates => "request-updates",
            ContainerKind::ReqCreates => "request-creates",
            ContainerKind::Creates => "creates",
            ContainerKind::Deletes => "deletes",
        };
        f.write_str(name)
    }
}

/// Header of one instruction container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub kind: ContainerKind,
    pub count: u8,
}

impl ContainerHeader {
    pub const WIRE_SIZE: usize = 2;
}

impl WireSize for ContainerHeader {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for ContainerHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        (self.kind as u8).serialize(writer)?;
        self.count.serialize(writer)
    }
}

impl WireDeserialize for ContainerHeader {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let kind = ContainerKind::from_wire(u8::deserialize(reader)?)?;
        let count = u8::deserialize(reader)?;
        if count == 0 {
            return Err(WireError::EmptyContainer);
        }
        Ok(ContainerHeader { kind, count })
    }
}

/// Static identity of a variable: who produces it and how persistently its
/// announcements are repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarSpec {
    pub var_id: VarId,
    pub producer: NodeId,
    pub rep_count: RepCount,
    pub description: VarDescription,
}

impl WireSize for VarSpec {
    fn wire_size(&self) -> usize {
        1 + NodeId::WIRE_SIZE + 1 + self.description.wire_size()
    }
}

impl WireSerialize for VarSpec {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)?;
        self.producer.serialize(writer)?;
        self.rep_count.serialize(writer)?;
        self.description.serialize(writer)
    }
}

impl WireDeserialize for VarSpec {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarSpec {
            var_id: VarId::deserialize(reader)?,
            producer: NodeId::deserialize(reader)?,
            rep_count: RepCount::deserialize(reader)?,
            description: VarDescription::deserialize(reader)?,
        })
    }
}

/// A value update: identifier, sequence number, fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarUpdate {
    pub var_id: VarId,
    pub seqno: VarSeqno,
    pub value: VarValue,
}

impl WireSize for VarUpdate {
    fn wire_size(&self) -> usize {
        1 + 1 + self.value.wire_size()
    }
}

impl WireSerialize for VarUpdate {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)?;
        self.seqno.serialize(writer)?;
        self.value.serialize(writer)
    }
}

impl WireDeserialize for VarUpdate {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarUpdate {
            var_id: VarId::deserialize(reader)?,
            seqno: VarSeqno::deserialize(reader)?,
            value: VarValue::deserialize(reader)?,
        })
    }
}

/// First announcement of a variable: its spec plus the initial value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarCreate {
    pub spec: VarSpec,
    pub update: VarUpdate,
}

impl WireSize for VarCreate {
    fn wire_size(&self) -> usize {
        self.spec.wire_size() + self.update.wire_size()
    }
}

impl WireSerialize for VarCreate {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.spec.serialize(writer)?;
        self.update.serialize(writer)
    }
}

impl WireDeserialize for VarCreate {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarCreate {
            spec: VarSpec::deserialize(reader)?,
            update: VarUpdate::deserialize(reader)?,
        })
    }
}

/// Compact "I know this variable at this seqno" advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSummary {
    pub var_id: VarId,
    pub seqno: VarSeqno,
}

impl VarSummary {
    pub const WIRE_SIZE: usize = 2;
}

impl WireSize for VarSummary {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for VarSummary {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)?;
        self.seqno.serialize(writer)
    }
}

impl WireDeserialize for VarSummary {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarSummary {
            var_id: VarId::deserialize(reader)?,
            seqno: VarSeqno::deserialize(reader)?,
        })
    }
}

/// Tombstone announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarDelete {
    pub var_id: VarId,
}

impl VarDelete {
    pub const WIRE_SIZE: usize = 1;
}

impl WireSize for VarDelete {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for VarDelete {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)
    }
}

impl WireDeserialize for VarDelete {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarDelete {
            var_id: VarId::deserialize(reader)?,
        })
    }
}

/// Request for a full VarCreate of an unknown variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarReqCreate {
    pub var_id: VarId,
}

impl VarReqCreate {
    pub const WIRE_SIZE: usize = 1;
}

impl WireSize for VarReqCreate {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for VarReqCreate {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)
    }
}

impl WireDeserialize for VarReqCreate {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarReqCreate {
            var_id: VarId::deserialize(reader)?,
        })
    }
}

/// Request for updates newer than the seqno the requester holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarReqUpdate {
    pub var_id: VarId,
    pub seqno: VarSeqno,
}

impl VarReqUpdate {
    pub const WIRE_SIZE: usize = 2;
}

impl WireSize for VarReqUpdate {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for VarReqUpdate {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.var_id.serialize(writer)?;
        self.seqno.serialize(writer)
    }
}

impl WireDeserialize for VarReqUpdate {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarReqUpdate {
            var_id: VarId::deserialize(reader)?,
            seqno: VarSeqno::deserialize(reader)?,
        })
    }
}

/// Parsed contents of one variable-dissemination payload, grouped per record
/// kind. Arrival order is preserved inside each list; the engine applies the
/// lists in its own canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionBatch {
    pub creates: Vec<VarCreate>,
    pub deletes: Vec<VarDelete>,
    pub updates: Vec<VarUpdate>,
    pub summaries: Vec<VarSummary>,
    pub req_updates: Vec<VarReqUpdate>,
    pub req_creates: Vec<VarReqCreate>,
}

impl InstructionBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.deletes.is_empty()
            && self.updates.is_empty()
            && self.summaries.is_empty()
            && self.req_updates.is_empty()
            && self.req_creates.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.creates.len()
            + self.deletes.len()
            + self.updates.len()
            + self.summaries.len()
            + self.req_updates.len()
            + self.req_creates.len()
    }

    /// Parses containers from the payload until it is exhausted.
    ///
    /// A structural error (unknown kind, zero count, truncated record) stops
    /// parsing; records collected up to that point are kept and the error is
    /// returned alongside them so the caller can count it.
    pub fn parse(payload: &[u8]) -> (InstructionBatch, Option<WireError>) {
        let mut batch = InstructionBatch::default();
        let mut cursor = std::io::Cursor::new(payload);

        while (cursor.position() as usize) < payload.len() {
            let header = match ContainerHeader::deserialize(&mut cursor) {
                Ok(h) => h,
                Err(e) => return (batch, Some(e)),
            };
            for _ in 0..header.count {
                let res = match header.kind {
                    ContainerKind::Summaries => {
                        VarSummary::deserialize(&mut cursor).map(|r| batch.summaries.push(r))
                    }
                    ContainerKind::Updates => {
                        VarUpdate::deserialize(&mut cursor).map(|r| batch.updates.push(r))
                    }
                    ContainerKind::ReqUpdates => {
                        VarReqUpdate::deserialize(&mut cursor).map(|r| batch.req_updates.push(r))
                    }
                    ContainerKind::ReqCreates => {
                        VarReqCreate::deserialize(&mut cursor).map(|r| batch.req_creates.push(r))
                    }
                    ContainerKind::Creates => {
                        VarCreate::deserialize(&mut cursor).map(|r| batch.creates.push(r))
                    }
                    ContainerKind::Deletes => {
                        VarDelete::deserialize(&mut cursor).map(|r| batch.deletes.push(r))
                    }
                };
                if let Err(e) = res {
                    return (batch, Some(e));
                }
            }
        }
        (batch, None)
    }
}
