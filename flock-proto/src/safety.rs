//! Safety-report record carried by the safety client protocol.

use crate::types::NodeId;
use crate::{Result, WireDeserialize, WireSerialize, WireSize};
use std::io::{Read, Write};

/// One-hop safety broadcast: where a node is and where it is heading.
///
/// Positions are millimetres in a swarm-local frame, velocities
/// centimetres per second. The record is fixed-size so a neighbour table
/// can reserve one slot per neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafetyReport {
    pub node: NodeId,
    pub seqno: u32,
    pub position: [i32; 3],
    pub velocity: [i16; 3],
}

impl SafetyReport {
    pub const WIRE_SIZE: usize = NodeId::WIRE_SIZE + 4 + 3 * 4 + 3 * 2;
}

impl WireSize for SafetyReport {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for SafetyReport {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.node.serialize(writer)?;
        self.seqno.serialize(writer)?;
        self.position.serialize(writer)?;
        self.velocity.serialize(writer)
    }
}

impl WireDeserialize for SafetyReport {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(SafetyReport {
            node: NodeId::deserialize(reader)?,
            seqno: u32::deserialize(reader)?,
            position: <[i32; 3]>::deserialize(reader)?,
            velocity: <[i16; 3]>::deserialize(reader)?,
        })
    }
}
