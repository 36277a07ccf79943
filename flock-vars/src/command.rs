//! Management command protocol of the variable daemon.
//!
//! Shares the frame discipline of the beacon daemon's command channel: a
//! `u32` length prefix, a 16-bit service id, a 16-bit status code in every
//! confirm.

use crate::engine::{VariableSnapshot, VarsStats};
use crate::error::{VarsError, VarsStatus};
use flock_proto::{
    NodeId, RepCount, Result as WireResult, VarId, VarSeqno, WireDeserialize, WireError,
    WireSerialize, WireSize,
};
use std::io::{Read, Write};

pub use flock_beacon::command::{read_frame as read_beacon_frame, write_frame, MAX_FRAME_SIZE};

pub const SVC_REGISTER_CLIENT: u16 = 1;
pub const SVC_DEREGISTER_CLIENT: u16 = 2;
pub const SVC_ACTIVATE: u16 = 3;
pub const SVC_DEACTIVATE: u16 = 4;
pub const SVC_SHUTDOWN: u16 = 5;
pub const SVC_GET_STATISTICS: u16 = 6;
pub const SVC_DESCRIBE_DATABASE: u16 = 7;
pub const SVC_DESCRIBE_VARIABLE: u16 = 8;

impl From<flock_beacon::BeaconError> for VarsError {
    fn from(e: flock_beacon::BeaconError) -> VarsError {
        match e {
            flock_beacon::BeaconError::Socket(io) => VarsError::Socket(io),
            flock_beacon::BeaconError::Wire(w) => VarsError::Wire(w),
            flock_beacon::BeaconError::Shm(s) => VarsError::Shm(s),
            flock_beacon::BeaconError::Command(msg) => VarsError::Command(msg),
            other => VarsError::Beacon(other.to_string()),
        }
    }
}

/// Reads one frame, translating the beacon layer's error type.
pub fn read_frame(stream: &mut impl Read) -> Result<Option<Vec<u8>>, VarsError> {
    read_beacon_frame(stream).map_err(VarsError::from)
}

fn put_string<W: Write>(writer: &mut W, text: &str) -> WireResult<()> {
    let len: u16 = text
        .len()
        .try_into()
        .map_err(|_| WireError::Oversized("string"))?;
    len.serialize(writer)?;
    writer.write_all(text.as_bytes()).map_err(WireError::Io)
}

fn take_string<R: Read>(reader: &mut R) -> WireResult<String> {
    let len = u16::deserialize(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(WireError::Io)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

impl WireSize for VariableSnapshot {
    fn wire_size(&self) -> usize {
        1 + NodeId::WIRE_SIZE + 1 + 2 + self.description.len() + 1 + 8 + 3 + 1
    }
}

impl WireSerialize for VariableSnapshot {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.var_id.serialize(writer)?;
        self.producer.serialize(writer)?;
        self.rep_count.serialize(writer)?;
        put_string(writer, &self.description)?;
        self.seqno.serialize(writer)?;
        self.tstamp_ms.serialize(writer)?;
        self.count_create.serialize(writer)?;
        self.count_update.serialize(writer)?;
        self.count_delete.serialize(writer)?;
        self.to_be_deleted.serialize(writer)
    }
}

impl WireDeserialize for VariableSnapshot {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(VariableSnapshot {
            var_id: VarId::deserialize(reader)?,
            producer: NodeId::deserialize(reader)?,
            rep_count: RepCount::deserialize(reader)?,
            description: take_string(reader)?,
            seqno: VarSeqno::deserialize(reader)?,
            tstamp_ms: i64::deserialize(reader)?,
            count_create: u8::deserialize(reader)?,
            count_update: u8::deserialize(reader)?,
            count_delete: u8::deserialize(reader)?,
            to_be_deleted: bool::deserialize(reader)?,
        })
    }
}

/// A parsed management request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarsRequest {
    RegisterClient { name: String, shm_path: String },
    DeregisterClient { name: String },
    Activate,
    Deactivate,
    Shutdown,
    GetStatistics,
    DescribeDatabase,
    DescribeVariable(VarId),
}

impl VarsRequest {
    pub fn service_id(&self) -> u16 {
        match self {
            VarsRequest::RegisterClient { .. } => SVC_REGISTER_CLIENT,
            VarsRequest::DeregisterClient { .. } => SVC_DEREGISTER_CLIENT,
            VarsRequest::Activate => SVC_ACTIVATE,
            VarsRequest::Deactivate => SVC_DEACTIVATE,
            VarsRequest::Shutdown => SVC_SHUTDOWN,
            VarsRequest::GetStatistics => SVC_GET_STATISTICS,
            VarsRequest::DescribeDatabase => SVC_DESCRIBE_DATABASE,
            VarsRequest::DescribeVariable(_) => SVC_DESCRIBE_VARIABLE,
        }
    }

    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let mut body = Vec::new();
        self.service_id().serialize(&mut body)?;
        match self {
            VarsRequest::RegisterClient { name, shm_path } => {
                put_string(&mut body, name)?;
                put_string(&mut body, shm_path)?;
            }
            VarsRequest::DeregisterClient { name } => put_string(&mut body, name)?,
            VarsRequest::DescribeVariable(var_id) => var_id.serialize(&mut body)?,
            _ => {}
        }
        Ok(body)
    }

    /// Decodes a frame body; size mismatches are version skew and fatal to
    /// the server.
    pub fn decode(body: &[u8]) -> Result<VarsRequest, VarsError> {
        // structural failures are client/daemon version skew and fatal
        let skew = |e: WireError| VarsError::Command(format!("undecodable request: {e}"));
        let mut cursor = std::io::Cursor::new(body);
        let service = u16::deserialize(&mut cursor).map_err(skew)?;
        let request = match service {
            SVC_REGISTER_CLIENT => VarsRequest::RegisterClient {
                name: take_string(&mut cursor).map_err(skew)?,
                shm_path: take_string(&mut cursor).map_err(skew)?,
            },
            SVC_DEREGISTER_CLIENT => VarsRequest::DeregisterClient {
                name: take_string(&mut cursor).map_err(skew)?,
            },
            SVC_ACTIVATE => VarsRequest::Activate,
            SVC_DEACTIVATE => VarsRequest::Deactivate,
            SVC_SHUTDOWN => VarsRequest::Shutdown,
            SVC_GET_STATISTICS => VarsRequest::GetStatistics,
            SVC_DESCRIBE_DATABASE => VarsRequest::DescribeDatabase,
            SVC_DESCRIBE_VARIABLE => {
                VarsRequest::DescribeVariable(VarId::deserialize(&mut cursor).map_err(skew)?)
            }
            other => {
                return Err(VarsError::Command(format!("unknown service id {other}")));
            }
        };
        if cursor.position() as usize != body.len() {
            return Err(VarsError::Command(format!(
                "request for service {service} has wrong size"
            )));
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarsSimpleConfirm {
    pub status: VarsStatus,
    pub own_node_id: NodeId,
}

impl WireSize for VarsSimpleConfirm {
    fn wire_size(&self) -> usize {
        2 + NodeId::WIRE_SIZE
    }
}

impl WireSerialize for VarsSimpleConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.own_node_id.serialize(writer)
    }
}

impl WireDeserialize for VarsSimpleConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(VarsSimpleConfirm {
            status: VarsStatus::from_wire(u16::deserialize(reader)?),
            own_node_id: NodeId::deserialize(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarsStatisticsConfirm {
    pub status: VarsStatus,
    pub stats: VarsStats,
}

impl WireSize for VarsStatisticsConfirm {
    fn wire_size(&self) -> usize {
        2 + 13 * 8
    }
}

impl WireSerialize for VarsStatisticsConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        for v in [
            self.stats.creates_processed,
            self.stats.deletes_processed,
            self.stats.updates_processed,
            self.stats.summaries_processed,
            self.stats.req_updates_processed,
            self.stats.req_creates_processed,
            self.stats.malformed_payloads,
            self.stats.payloads_composed,
            self.stats.payloads_processed,
            self.stats.crud_creates,
            self.stats.crud_updates,
            self.stats.crud_deletes,
            self.stats.crud_reads,
        ] {
            v.serialize(writer)?;
        }
        Ok(())
    }
}

impl WireDeserialize for VarsStatisticsConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let status = VarsStatus::from_wire(u16::deserialize(reader)?);
        let mut vals = [0u64; 13];
        for v in vals.iter_mut() {
            *v = u64::deserialize(reader)?;
        }
        Ok(VarsStatisticsConfirm {
            status,
            stats: VarsStats {
                creates_processed: vals[0],
                deletes_processed: vals[1],
                updates_processed: vals[2],
                summaries_processed: vals[3],
                req_updates_processed: vals[4],
                req_creates_processed: vals[5],
                malformed_payloads: vals[6],
                payloads_composed: vals[7],
                payloads_processed: vals[8],
                crud_creates: vals[9],
                crud_updates: vals[10],
                crud_deletes: vals[11],
                crud_reads: vals[12],
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeDatabaseConfirm {
    pub status: VarsStatus,
    pub variables: Vec<VariableSnapshot>,
}

impl WireSize for DescribeDatabaseConfirm {
    fn wire_size(&self) -> usize {
        2 + 2 + self.variables.iter().map(|v| v.wire_size()).sum::<usize>()
    }
}

impl WireSerialize for DescribeDatabaseConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        (self.variables.len() as u16).serialize(writer)?;
        for v in &self.variables {
            v.serialize(writer)?;
        }
        Ok(())
    }
}

impl WireDeserialize for DescribeDatabaseConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let status = VarsStatus::from_wire(u16::deserialize(reader)?);
        let count = u16::deserialize(reader)?;
        let mut variables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            variables.push(VariableSnapshot::deserialize(reader)?);
        }
        Ok(DescribeDatabaseConfirm { status, variables })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeVariableConfirm {
    pub status: VarsStatus,
    pub variable: Option<VariableSnapshot>,
    pub value: Vec<u8>,
}

impl WireSize for DescribeVariableConfirm {
    fn wire_size(&self) -> usize {
        2 + 1
            + self.variable.as_ref().map_or(0, |v| v.wire_size())
            + 2
            + self.value.len()
    }
}

impl WireSerialize for DescribeVariableConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.variable.is_some().serialize(writer)?;
        if let Some(v) = &self.variable {
            v.serialize(writer)?;
        }
        let len: u16 = self
            .value
            .len()
            .try_into()
            .map_err(|_| WireError::Oversized("value"))?;
        len.serialize(writer)?;
        writer.write_all(&self.value).map_err(WireError::Io)
    }
}

impl WireDeserialize for DescribeVariableConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let status = VarsStatus::from_wire(u16::deserialize(reader)?);
        let has_variable = bool::deserialize(reader)?;
        let variable = if has_variable {
            Some(VariableSnapshot::deserialize(reader)?)
        } else {
            None
        };
        let len = u16::deserialize(reader)? as usize;
        let mut value = vec![0u8; len];
        reader.read_exact(&mut value).map_err(WireError::Io)?;
        Ok(DescribeVariableConfirm {
            status,
            variable,
            value,
        })
    }
}

/// Encodes a confirm body: service id, then the confirm struct.
pub fn encode_confirm<T: WireSerialize>(service: u16, confirm: &T) -> WireResult<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + confirm.wire_size());
    service.serialize(&mut body)?;
    confirm.serialize(&mut body)?;
    Ok(body)
}

/// Decodes a confirm body, checking the echoed service id.
pub fn decode_confirm<T: WireDeserialize>(service: u16, body: &[u8]) -> Result<T, VarsError> {
    let mut cursor = std::io::Cursor::new(body);
    let echoed = u16::deserialize(&mut cursor).map_err(VarsError::Wire)?;
    if echoed != service {
        return Err(VarsError::Command(format!(
            "confirm for service {echoed}, expected {service}"
        )));
    }
    T::deserialize(&mut cursor).map_err(VarsError::Wire)
}
