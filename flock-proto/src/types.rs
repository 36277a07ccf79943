//! Semantic newtypes used across the stack.

use crate::{Result, WireDeserialize, WireError, WireSerialize, WireSize};
use std::io::{Read, Write};

macro_rules! wire_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl WireSize for $name {
            fn wire_size(&self) -> usize {
                std::mem::size_of::<$inner>()
            }
        }

        impl WireSerialize for $name {
            fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
                self.0.serialize(writer)
            }
        }

        impl WireDeserialize for $name {
            fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
                Ok($name(<$inner>::deserialize(reader)?))
            }
        }
    };
}

wire_newtype!(
    ProtocolId,
    u16,
    "Multiplexing key for beacon client protocols."
);
wire_newtype!(VarId, u8, "Swarm-wide identifier of a disseminated variable.");
wire_newtype!(
    RepCount,
    u8,
    "Remaining transmissions owed for an instruction record (0-15)."
);

/// Circular per-variable sequence number.
///
/// Compared in the RFC 1982 style: `a` is more recent than `b` when they
/// differ and the forward distance from `b` to `a` is inside the half-window.
/// The antipode (distance 128) is more recent in neither direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarSeqno(pub u8);

impl VarSeqno {
    pub fn next(self) -> Self {
        VarSeqno(self.0.wrapping_add(1))
    }

    pub fn more_recent_than(self, other: VarSeqno) -> bool {
        self.0 != other.0 && self.0.wrapping_sub(other.0) < 128
    }
}

impl From<u8> for VarSeqno {
    fn from(val: u8) -> Self {
        VarSeqno(val)
    }
}

impl std::fmt::Display for VarSeqno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WireSize for VarSeqno {
    fn wire_size(&self) -> usize {
        1
    }
}

impl WireSerialize for VarSeqno {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

impl WireDeserialize for VarSeqno {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarSeqno(u8::deserialize(reader)?))
    }
}

/// A station identifier: six raw bytes in IEEE MAC order.
///
/// Totally ordered by lexicographic byte comparison so identifiers can key
/// the neighbour table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub [u8; 6]);

impl NodeId {
    pub const WIRE_SIZE: usize = 6;
    pub const BROADCAST: NodeId = NodeId([0xff; 6]);
    pub const NULL: NodeId = NodeId([0; 6]);

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parses the usual hex-digits-and-colons notation.
    pub fn parse(text: &str) -> Option<NodeId> {
        let mut out = [0u8; 6];
        let mut parts = text.split(':');
        for byte in out.iter_mut() {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(NodeId(out))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl WireSize for NodeId {
    fn wire_size(&self) -> usize {
        Self::WIRE_SIZE
    }
}

impl WireSerialize for NodeId {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.0).map_err(WireError::Io)
    }
}

impl WireDeserialize for NodeId {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).map_err(WireError::Io)?;
        Ok(NodeId(buf))
    }
}

/// A variable value: u8 length prefix followed by that many bytes.
///
/// The codec accepts a zero length (the handlers decide what to do with it);
/// lengths above 255 cannot be represented and fail to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarValue(pub Vec<u8>);

impl VarValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        VarValue(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl WireSize for VarValue {
    fn wire_size(&self) -> usize {
        1 + self.0.len()
    }
}

impl WireSerialize for VarValue {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        let len: u8 = self
            .0
            .len()
            .try_into()
            .map_err(|_| WireError::Oversized("VarValue"))?;
        len.serialize(writer)?;
        writer.write_all(&self.0).map_err(WireError::Io)
    }
}

impl WireDeserialize for VarValue {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let len = u8::deserialize(reader)? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(WireError::Io)?;
        Ok(VarValue(buf))
    }
}

/// Human-readable variable description: u8 length prefix plus UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VarDescription(pub String);

impl VarDescription {
    pub fn new(text: impl Into<String>) -> Self {
        VarDescription(text.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VarDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl WireSize for VarDescription {
    fn wire_size(&self) -> usize {
        1 + self.0.len()
    }
}

impl WireSerialize for VarDescription {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        let len: u8 = self
            .0
            .len()
            .try_into()
            .map_err(|_| WireError::Oversized("VarDescription"))?;
        len.serialize(writer)?;
        writer.write_all(self.0.as_bytes()).map_err(WireError::Io)
    }
}

impl WireDeserialize for VarDescription {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let len = u8::deserialize(reader)? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(WireError::Io)?;
        let text = String::from_utf8_lossy(&buf).into_owned();
        Ok(VarDescription(text))
    }
}
