//! Management command channel: framed request/confirm structs over a local
//! stream socket.
//!
//! Every frame is a `u32` length prefix plus a body. A request body starts
//! with a 16-bit service identifier; a confirm body echoes the identifier
//! and carries a 16-bit status code next. A request whose body size does not
//! match its service is treated as client/daemon version skew and is fatal
//! to the server.

use crate::error::{BeaconError, BeaconStatus};
use crate::registry::{ClientStats, QueueingMode};
use crate::stats::DaemonStats;
use flock_proto::{NodeId, ProtocolId, Result as WireResult, WireDeserialize, WireError, WireSerialize, WireSize};
use std::io::{Read, Write};

/// Upper bound on one command frame.
pub const MAX_FRAME_SIZE: usize = 1 << 16;

pub const SVC_REGISTER: u16 = 1;
pub const SVC_DEREGISTER: u16 = 2;
pub const SVC_LIST_PROTOCOLS: u16 = 3;
pub const SVC_CLEAR_BUFFER: u16 = 4;
pub const SVC_QUERY_BUFFERED: u16 = 5;
pub const SVC_ACTIVATE: u16 = 6;
pub const SVC_DEACTIVATE: u16 = 7;
pub const SVC_SHUTDOWN: u16 = 8;
pub const SVC_GET_STATISTICS: u16 = 9;

/// Writes one length-prefixed frame.
pub fn write_frame(stream: &mut impl Write, body: &[u8]) -> std::io::Result<()> {
    let len = body.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

/// Reads one length-prefixed frame; `Ok(None)` on clean end of stream.
pub fn read_frame(stream: &mut impl Read) -> Result<Option<Vec<u8>>, BeaconError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BeaconError::Socket(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(BeaconError::Command(format!("oversized frame of {len} bytes")));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).map_err(BeaconError::Socket)?;
    Ok(Some(body))
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

fn put_f64<W: Write>(writer: &mut W, val: f64) -> WireResult<()> {
    val.to_bits().serialize(writer)
}

fn take_f64<R: Read>(reader: &mut R) -> WireResult<f64> {
    Ok(f64::from_bits(u64::deserialize(reader)?))
}

/// Register a client protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub protocol_id: ProtocolId,
    pub name: String,
    pub max_payload_size: u16,
    pub mode: QueueingMode,
    pub allow_multiple_payloads: bool,
    pub wants_tx_confirms: bool,
    pub shm_path: String,
}

impl WireSize for RegisterRequest {
    fn wire_size(&self) -> usize {
        2 + 2 + self.name.len() + 2 + 1 + 2 + 1 + 1 + 2 + self.shm_path.len()
    }
}

impl WireSerialize for RegisterRequest {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.protocol_id.serialize(writer)?;
        put_string(writer, &self.name)?;
        self.max_payload_size.serialize(writer)?;
        let (mode, max_entries) = self.mode.to_wire();
        mode.serialize(writer)?;
        max_entries.serialize(writer)?;
        self.allow_multiple_payloads.serialize(writer)?;
        self.wants_tx_confirms.serialize(writer)?;
        put_string(writer, &self.shm_path)
    }
}

impl WireDeserialize for RegisterRequest {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let protocol_id = ProtocolId::deserialize(reader)?;
        let name = take_string(reader)?;
        let max_payload_size = u16::deserialize(reader)?;
        let mode_tag = u8::deserialize(reader)?;
        let max_entries = u16::deserialize(reader)?;
        let mode = QueueingMode::from_wire(mode_tag, max_entries)
            .ok_or(WireError::UnknownContainerKind(mode_tag))?;
        Ok(RegisterRequest {
            protocol_id,
            name,
            max_payload_size,
            mode,
            allow_multiple_payloads: bool::deserialize(reader)?,
            wants_tx_confirms: bool::deserialize(reader)?,
            shm_path: take_string(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterConfirm {
    pub status: BeaconStatus,
    pub own_node_id: NodeId,
}

impl WireSize for RegisterConfirm {
    fn wire_size(&self) -> usize {
        2 + NodeId::WIRE_SIZE
    }
}

impl WireSerialize for RegisterConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.own_node_id.serialize(writer)
    }
}

impl WireDeserialize for RegisterConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(RegisterConfirm {
            status: BeaconStatus::from_wire(u16::deserialize(reader)?),
            own_node_id: NodeId::deserialize(reader)?,
        })
    }
}

/// Confirm carrying nothing but a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleConfirm {
    pub status: BeaconStatus,
}

impl WireSize for SimpleConfirm {
    fn wire_size(&self) -> usize {
        2
    }
}

impl WireSerialize for SimpleConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)
    }
}

impl WireDeserialize for SimpleConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(SimpleConfirm {
            status: BeaconStatus::from_wire(u16::deserialize(reader)?),
        })
    }
}

/// Description of one registration in a list confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescription {
    pub protocol_id: ProtocolId,
    pub name: String,
    pub max_payload_size: u16,
    pub mode: QueueingMode,
    pub allow_multiple_payloads: bool,
    pub stats: ClientStats,
}

impl WireSize for ProtocolDescription {
    fn wire_size(&self) -> usize {
        2 + 2 + self.name.len() + 2 + 1 + 2 + 1 + 4 * 8
    }
}

impl WireSerialize for ProtocolDescription {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        self.protocol_id.serialize(writer)?;
        put_string(writer, &self.name)?;
        self.max_payload_size.serialize(writer)?;
        let (mode, max_entries) = self.mode.to_wire();
        mode.serialize(writer)?;
        max_entries.serialize(writer)?;
        self.allow_multiple_payloads.serialize(writer)?;
        self.stats.outgoing_payloads.serialize(writer)?;
        self.stats.received_payloads.serialize(writer)?;
        self.stats.dropped_outgoing_payloads.serialize(writer)?;
        self.stats.dropped_incoming_payloads.serialize(writer)
    }
}

impl WireDeserialize for ProtocolDescription {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let protocol_id = ProtocolId::deserialize(reader)?;
        let name = take_string(reader)?;
        let max_payload_size = u16::deserialize(reader)?;
        let mode_tag = u8::deserialize(reader)?;
        let max_entries = u16::deserialize(reader)?;
        let mode = QueueingMode::from_wire(mode_tag, max_entries)
            .ok_or(WireError::UnknownContainerKind(mode_tag))?;
        Ok(ProtocolDescription {
            protocol_id,
            name,
            max_payload_size,
            mode,
            allow_multiple_payloads: bool::deserialize(reader)?,
            stats: ClientStats {
                outgoing_payloads: u64::deserialize(reader)?,
                received_payloads: u64::deserialize(reader)?,
                dropped_outgoing_payloads: u64::deserialize(reader)?,
                dropped_incoming_payloads: u64::deserialize(reader)?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListConfirm {
    pub status: BeaconStatus,
    pub active: bool,
    pub protocols: Vec<ProtocolDescription>,
}

impl WireSize for ListConfirm {
    fn wire_size(&self) -> usize {
        2 + 1 + 2 + self.protocols.iter().map(|p| p.wire_size()).sum::<usize>()
    }
}

impl WireSerialize for ListConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.active.serialize(writer)?;
        (self.protocols.len() as u16).serialize(writer)?;
        for p in &self.protocols {
            p.serialize(writer)?;
        }
        Ok(())
    }
}

impl WireDeserialize for ListConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        let status = BeaconStatus::from_wire(u16::deserialize(reader)?);
        let active = bool::deserialize(reader)?;
        let count = u16::deserialize(reader)?;
        let mut protocols = Vec::with_capacity(count as usize);
        for _ in 0..count {
            protocols.push(ProtocolDescription::deserialize(reader)?);
        }
        Ok(ListConfirm {
            status,
            active,
            protocols,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBufferedConfirm {
    pub status: BeaconStatus,
    pub buffered_payloads: u32,
}

impl WireSize for QueryBufferedConfirm {
    fn wire_size(&self) -> usize {
        2 + 4
    }
}

impl WireSerialize for QueryBufferedConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.buffered_payloads.serialize(writer)
    }
}

impl WireDeserialize for QueryBufferedConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(QueryBufferedConfirm {
            status: BeaconStatus::from_wire(u16::deserialize(reader)?),
            buffered_payloads: u32::deserialize(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsConfirm {
    pub status: BeaconStatus,
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub malformed_frames: u64,
    pub avg_beacon_size: f64,
    pub avg_inter_beacon_ms: f64,
}

impl StatisticsConfirm {
    pub fn from_stats(stats: &DaemonStats) -> StatisticsConfirm {
        StatisticsConfirm {
            status: BeaconStatus::Ok,
            beacons_sent: stats.beacons_sent,
            beacons_received: stats.beacons_received,
            malformed_frames: stats.malformed_frames,
            avg_beacon_size: stats.avg_beacon_size,
            avg_inter_beacon_ms: stats.avg_inter_beacon_ms,
        }
    }
}

impl WireSize for StatisticsConfirm {
    fn wire_size(&self) -> usize {
        2 + 3 * 8 + 2 * 8
    }
}

impl WireSerialize for StatisticsConfirm {
    fn serialize<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        (self.status as u16).serialize(writer)?;
        self.beacons_sent.serialize(writer)?;
        self.beacons_received.serialize(writer)?;
        self.malformed_frames.serialize(writer)?;
        put_f64(writer, self.avg_beacon_size)?;
        put_f64(writer, self.avg_inter_beacon_ms)
    }
}

impl WireDeserialize for StatisticsConfirm {
    fn deserialize<R: Read>(reader: &mut R) -> WireResult<Self> {
        Ok(StatisticsConfirm {
            status: BeaconStatus::from_wire(u16::deserialize(reader)?),
            beacons_sent: u64::deserialize(reader)?,
            beacons_received: u64::deserialize(reader)?,
            malformed_frames: u64::deserialize(reader)?,
            avg_beacon_size: take_f64(reader)?,
            avg_inter_beacon_ms: take_f64(reader)?,
        })
    }
}

/// A parsed request, keyed on the leading service identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register(RegisterRequest),
    Deregister(ProtocolId),
    ListProtocols,
    ClearBuffer(ProtocolId),
    QueryBuffered(ProtocolId),
    Activate,
    Deactivate,
    Shutdown,
    GetStatistics,
}

impl Request {
    pub fn service_id(&self) -> u16 {
        match self {
            Request::Register(_) => SVC_REGISTER,
            Request::Deregister(_) => SVC_DEREGISTER,
            Request::ListProtocols => SVC_LIST_PROTOCOLS,
            Request::ClearBuffer(_) => SVC_CLEAR_BUFFER,
            Request::QueryBuffered(_) => SVC_QUERY_BUFFERED,
            Request::Activate => SVC_ACTIVATE,
            Request::Deactivate => SVC_DEACTIVATE,
            Request::Shutdown => SVC_SHUTDOWN,
            Request::GetStatistics => SVC_GET_STATISTICS,
        }
    }

    /// Encodes the request into a frame body.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let mut body = Vec::new();
        self.service_id().serialize(&mut body)?;
        match self {
            Request::Register(req) => req.serialize(&mut body)?,
            Request::Deregister(id) | Request::ClearBuffer(id) | Request::QueryBuffered(id) => {
                id.serialize(&mut body)?
            }
            _ => {}
        }
        Ok(body)
    }

    /// Decodes a frame body. The body must be consumed exactly; leftovers or
    /// shortfalls indicate version skew and surface as an error the server
    /// treats as fatal.
    pub fn decode(body: &[u8]) -> Result<Request, BeaconError> {
        // any structural failure here means client/daemon version skew,
        // which the server treats as fatal
        let skew = |e: WireError| BeaconError::Command(format!("undecodable request: {e}"));
        let mut cursor = std::io::Cursor::new(body);
        let service = u16::deserialize(&mut cursor).map_err(skew)?;
        let request = match service {
            SVC_REGISTER => {
                Request::Register(RegisterRequest::deserialize(&mut cursor).map_err(skew)?)
            }
            SVC_DEREGISTER => {
                Request::Deregister(ProtocolId::deserialize(&mut cursor).map_err(skew)?)
            }
            SVC_LIST_PROTOCOLS => Request::ListProtocols,
            SVC_CLEAR_BUFFER => {
                Request::ClearBuffer(ProtocolId::deserialize(&mut cursor).map_err(skew)?)
            }
            SVC_QUERY_BUFFERED => {
                Request::QueryBuffered(ProtocolId::deserialize(&mut cursor).map_err(skew)?)
            }
            SVC_ACTIVATE => Request::Activate,
            SVC_DEACTIVATE => Request::Deactivate,
            SVC_SHUTDOWN => Request::Shutdown,
            SVC_GET_STATISTICS => Request::GetStatistics,
            other => {
                return Err(BeaconError::Command(format!("unknown service id {other}")));
            }
        };
        if cursor.position() as usize != body.len() {
            return Err(BeaconError::Command(format!(
                "request for service {service} has wrong size"
            )));
        }
        Ok(request)
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
pub fn decode_confirm<T: WireDeserialize>(service: u16, body: &[u8]) -> Result<T, BeaconError> {
    let mut cursor = std::io::Cursor::new(body);
    let echoed = u16::deserialize(&mut cursor).map_err(BeaconError::Wire)?;
    if echoed != service {
        return Err(BeaconError::Command(format!(
            "confirm for service {echoed}, expected {service}"
        )));
    }
    T::deserialize(&mut cursor).map_err(BeaconError::Wire)
}
