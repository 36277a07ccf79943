//! Beacon frame wire format.
//!
//! A beacon is one broadcast frame: a fixed header followed by
//! `num_payloads` blocks of payload header plus payload body. The header
//! `length` field counts every byte after the beacon header, payload headers
//! included.

use crate::constants::{BEACON_MAGIC, BEACON_VERSION};
use crate::types::{NodeId, ProtocolId};
use crate::{Result, WireDeserialize, WireSerialize, WireSize};
use std::io::{Read, Write};

/// Fixed header opening every beacon frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconHeader {
    pub magic: u16,
    pub version: u8,
    pub sender: NodeId,
    /// Byte count of everything following this header.
    pub length: u16,
    pub num_payloads: u8,
    pub seqno: u32,
}

impl BeaconHeader {
    pub const WIRE_SIZE: usize = 2 + 1 + NodeId::WIRE_SIZE + 2 + 1 + 4;

    pub fn new(sender: NodeId, length: u16, num_payloads: u8, seqno: u32) -> Self {
        BeaconHeader {
            magic: BEACON_MAGIC,
            version: BEACON_VERSION,
            sender,
            length,
            num_payloads,
            seqno,
        }
    }

    /// A received header is acceptable when the magic and version match and
    /// the frame does not originate from this node.
    pub fn well_formed(&self, own_id: NodeId) -> bool {
        self.magic == BEACON_MAGIC && self.version == BEACON_VERSION && self.sender != own_id
    }
}

impl WireSize for BeaconHeader {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for BeaconHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.magic.serialize(writer)?;
        self.version.serialize(writer)?;
        self.sender.serialize(writer)?;
        self.length.serialize(writer)?;
        self.num_payloads.serialize(writer)?;
        self.seqno.serialize(writer)
    }
}

impl WireDeserialize for BeaconHeader {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(BeaconHeader {
            magic: u16::deserialize(reader)?,
            version: u8::deserialize(reader)?,
            sender: NodeId::deserialize(reader)?,
            length: u16::deserialize(reader)?,
            num_payloads: u8::deserialize(reader)?,
            seqno: u32::deserialize(reader)?,
        })
    }
}

/// Header in front of each client payload inside a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub protocol: ProtocolId,
    pub length: u16,
}

impl PayloadHeader {
    pub const WIRE_SIZE: usize = 2 + 2;
}

impl WireSize for PayloadHeader {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for PayloadHeader {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.protocol.serialize(writer)?;
        self.length.serialize(writer)
    }
}

impl WireDeserialize for PayloadHeader {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(PayloadHeader {
            protocol: ProtocolId::deserialize(reader)?,
            length: u16::deserialize(reader)?,
        })
    }
}
