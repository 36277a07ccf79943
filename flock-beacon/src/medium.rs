//! Abstraction over the broadcast medium.
//!
//! The daemon only needs two operations from the link layer: broadcast one
//! byte string, and deliver the next broadcast byte string. OS packet
//! bindings live outside the core; tests use the simulated air from
//! [`crate::testing`].

use crate::error::BeaconError;
use flock_proto::NodeId;
use std::time::Duration;

/// One received link-layer frame.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub src: NodeId,
    pub dst: NodeId,
    pub ether_type: u16,
    pub payload: Vec<u8>,
}

/// A broadcast-capable link.
pub trait Medium: Send + Sync {
    /// Broadcasts `payload` with the given EtherType to all one-hop
    /// neighbours.
    fn send(&self, ether_type: u16, payload: &[u8]) -> Result<(), BeaconError>;

    /// Returns the next frame, or `None` when `timeout` passes first.
    fn recv(&self, timeout: Duration) -> Result<Option<RxFrame>, BeaconError>;
}
