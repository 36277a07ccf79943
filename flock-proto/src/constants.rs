//! Protocol-wide constants shared by the beacon and variable layers.

use crate::types::ProtocolId;

/// Magic number opening every beacon header.
pub const BEACON_MAGIC: u16 = 0x497E;

/// Beacon header version emitted and accepted by this implementation.
pub const BEACON_VERSION: u8 = 1;

/// Default EtherType for beacon frames. Sits in the experimental range.
pub const DEFAULT_ETHER_TYPE: u16 = 0x88B5;

/// Upper bound on a whole beacon frame payload (L2 MTU minus overhead).
pub const MAX_BEACON_SIZE: usize = 1500;

/// Client protocol identifier of the safety-report protocol.
pub const PROTOCOL_SAFETY: ProtocolId = ProtocolId(0x0001);

/// Client protocol identifier of the variable-dissemination protocol.
pub const PROTOCOL_VARS: ProtocolId = ProtocolId(0x0002);

/// Largest number of records one instruction container can carry.
pub const MAX_CONTAINER_RECORDS: usize = u8::MAX as usize;

/// Highest admissible repetition count for a variable.
pub const MAX_REP_COUNT: u8 = 15;

/// Sequence numbers are circular over this modulus.
pub const SEQNO_MODULUS: u16 = 256;
