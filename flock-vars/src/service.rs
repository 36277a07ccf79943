//! Database service primitives exchanged through client shared memory.
//!
//! Each primitive is self-delimiting: length-prefixed fields only, so a
//! request or confirm can be parsed straight out of its slot.

use crate::error::VarsStatus;
use flock_proto::{
    Result as WireResult, RepCount, VarDescription, VarId, VarValue, WireDeserialize,
    WireSerialize, WireSize,
};
use std::io::{Read, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub var_id: VarId,
    pub rep_count: RepCount,
    pub description: VarDescription,
    pub value: VarValue,
}

impl WireSize for CreateRequest {
    fn wire_size(&self) -> usize {
        1 + 1 + self.description.wire_size() + self.value.wire_size()
    }
}

impl WireSerialize for CreateRequest {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.var_id.serialize(writer)?;
        self.rep_count.serialize(writer)?;
        self.description.serialize(writer)?;
        self.value.serialize(writer)
    }
}

impl WireDeserialize for CreateRequest {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(CreateRequest {
            var_id: VarId::deserialize(reader)?,
            rep_count: RepCount::deserialize(reader)?,
            description: VarDescription::deserialize(reader)?,
            value: VarValue::deserialize(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub var_id: VarId,
    pub value: VarValue,
}

impl WireSize for UpdateRequest {
    fn wire_size(&self) -> usize {
        1 + self.value.wire_size()
    }
}

impl WireSerialize for UpdateRequest {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.var_id.serialize(writer)?;
        self.value.serialize(writer)
    }
}

impl WireDeserialize for UpdateRequest {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(UpdateRequest {
            var_id: VarId::deserialize(reader)?,
            value: VarValue::deserialize(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    pub var_id: VarId,
}

impl WireSize for DeleteRequest {
    fn wire_size(&self) -> usize {
        1
    }
}

impl WireSerialize for DeleteRequest {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.var_id.serialize(writer)
    }
}

impl WireDeserialize for DeleteRequest {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(DeleteRequest {
            var_id: VarId::deserialize(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub var_id: VarId,
}

impl WireSize for ReadRequest {
    fn wire_size(&self) -> usize {
        1
    }
}

impl WireSerialize for ReadRequest {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.var_id.serialize(writer)
    }
}

impl WireDeserialize for ReadRequest {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(ReadRequest {
            var_id: VarId::deserialize(reader)?,
        })
    }
}

/// Confirm of the create/update/delete services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusConfirm {
    pub status: VarsStatus,
    pub var_id: VarId,
}

impl WireSize for StatusConfirm {
    fn wire_size(&self) -> usize {
        2 + 1
    }
}

impl WireSerialize for StatusConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.var_id.serialize(writer)
    }
}

impl WireDeserialize for StatusConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(StatusConfirm {
            status: VarsStatus::from_wire(u16::deserialize(reader)?),
            var_id: VarId::deserialize(reader)?,
        })
    }
}

/// Confirm of the read service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadConfirm {
    pub status: VarsStatus,
    pub var_id: VarId,
    pub tstamp_ms: i64,
    pub value: VarValue,
}

impl WireSize for ReadConfirm {
    fn wire_size(&self) -> usize {
        2 + 1 + 8 + self.value.wire_size()
    }
}

impl WireSerialize for ReadConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.var_id.serialize(writer)?;
        self.tstamp_ms.serialize(writer)?;
        self.value.serialize(writer)
    }
}

impl WireDeserialize for ReadConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(ReadConfirm {
            status: VarsStatus::from_wire(u16::deserialize(reader)?),
            var_id: VarId::deserialize(reader)?,
            tstamp_ms: i64::deserialize(reader)?,
            value: VarValue::deserialize(reader)?,
        })
    }
}
