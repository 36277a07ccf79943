//! # Flock Proto
//!
//! Wire types and serialization for the flock coordination stack.
//!
//! Everything a beacon carries is encoded in a fixed big-endian layout:
//! multi-byte integers in network byte order, node identifiers as six raw
//! bytes, values and descriptions as length-prefixed byte strings. The
//! [`WireSerialize`]/[`WireDeserialize`] traits capture that discipline once
//! so the beacon layer and the variable layer share the same codec.

use std::io::{Read, Write};
use std::sync::Arc;

pub mod beacon;
pub mod constants;
pub mod safety;
pub mod types;
pub mod vars;

pub use beacon::{BeaconHeader, PayloadHeader};
pub use types::{NodeId, ProtocolId, RepCount, VarDescription, VarId, VarSeqno, VarValue};
pub use vars::{
    ContainerHeader, ContainerKind, InstructionBatch, VarCreate, VarDelete, VarReqCreate,
    VarReqUpdate, VarSpec, VarSummary, VarUpdate,
};

pub type Result<T> = std::result::Result<T, WireError>;

/// Errors raised while encoding or decoding wire types.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown instruction container kind {0}")]
    UnknownContainerKind(u8),
    #[error("instruction container with zero records")]
    EmptyContainer,
    #[error("{0} does not fit its length field")]
    Oversized(&'static str),
    #[error("trailing bytes after {0}")]
    TrailingBytes(&'static str),
}

/// Types with a well-defined serialized length.
///
/// `wire_size` is the exact number of bytes `serialize` will emit for this
/// value. Length-prefixed types report prefix plus payload.
pub trait WireSize {
    fn wire_size(&self) -> usize;
}

pub trait WireSerialize: WireSize {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()>;
}

pub trait WireDeserialize: Sized {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self>;
}

/// Serializes a value into a fresh byte vector.
pub fn to_vec<T: WireSerialize>(val: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(val.wire_size());
    val.serialize(&mut buf)?;
    Ok(buf)
}

/// Deserializes a value from a byte slice, requiring full consumption.
pub fn from_slice<T: WireDeserialize>(bytes: &[u8]) -> Result<T> {
    let mut cursor = std::io::Cursor::new(bytes);
    let val = T::deserialize(&mut cursor)?;
    if cursor.position() as usize != bytes.len() {
        return Err(WireError::TrailingBytes(std::any::type_name::<T>()));
    }
    Ok(val)
}

/// Deserializes a value from the front of a byte slice, returning the rest.
pub fn from_prefix<T: WireDeserialize>(bytes: &[u8]) -> Result<(T, &[u8])> {
    let mut cursor = std::io::Cursor::new(bytes);
    let val = T::deserialize(&mut cursor)?;
    let used = cursor.position() as usize;
    Ok((val, &bytes[used..]))
}

macro_rules! impl_wire_int {
    ($ty:ty) => {
        impl WireSize for $ty {
            fn wire_size(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }
        impl WireSerialize for $ty {
            fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
                writer.write_all(&self.to_be_bytes()).map_err(WireError::Io)
            }
        }
        impl WireDeserialize for $ty {
            fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                reader.read_exact(&mut buf).map_err(WireError::Io)?;
                Ok(<$ty>::from_be_bytes(buf))
            }
        }
    };
}

impl_wire_int!(u8);
impl_wire_int!(u16);
impl_wire_int!(u32);
impl_wire_int!(u64);
impl_wire_int!(i16);
impl_wire_int!(i32);
impl_wire_int!(i64);

impl<const N: usize> WireSize for [u8; N] {
    fn wire_size(&self) -> usize {
        N
    }
}

impl<const N: usize> WireSerialize for [u8; N] {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self).map_err(WireError::Io)
    }
}

impl<const N: usize> WireDeserialize for [u8; N] {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; N];
        reader.read_exact(&mut buf).map_err(WireError::Io)?;
        Ok(buf)
    }
}

impl<const N: usize> WireSize for [i32; N] {
    fn wire_size(&self) -> usize {
        N * 4
    }
}

impl<const N: usize> WireSerialize for [i32; N] {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        for v in self {
            v.serialize(writer)?;
        }
        Ok(())
    }
}

impl<const N: usize> WireDeserialize for [i32; N] {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut out = [0i32; N];
        for v in out.iter_mut() {
            *v = i32::deserialize(reader)?;
        }
        Ok(out)
    }
}

impl<const N: usize> WireSize for [i16; N] {
    fn wire_size(&self) -> usize {
        N * 2
    }
}

impl<const N: usize> WireSerialize for [i16; N] {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        for v in self {
            v.serialize(writer)?;
        }
        Ok(())
    }
}

impl<const N: usize> WireDeserialize for [i16; N] {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut out = [0i16; N];
        for v in out.iter_mut() {
            *v = i16::deserialize(reader)?;
        }
        Ok(out)
    }
}

impl WireSize for bool {
    fn wire_size(&self) -> usize {
        1
    }
}

impl WireSerialize for bool {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_all(&[if *self { 1 } else { 0 }])
            .map_err(WireError::Io)
    }
}

impl WireDeserialize for bool {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).map_err(WireError::Io)?;
        Ok(buf[0] != 0)
    }
}

/// Source of time for protocol bookkeeping.
///
/// Production code uses [`SystemTimeProvider`]; simulations and tests swap in
/// a manual clock so timing-sensitive behaviour is deterministic.
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    fn now_instant(&self) -> std::time::Instant;
    fn now_system_ms(&self) -> i64;
}

#[derive(Debug)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_instant(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn now_system_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(std::time::Duration::ZERO)
            .as_millis() as i64
    }
}

pub type Clock = Arc<dyn TimeProvider>;
