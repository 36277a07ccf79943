//! # Flock Safety
//!
//! The safety-report client protocol. Every node broadcasts a small
//! fixed-size state record (position, velocity, sequence number) in each
//! beacon and keeps a neighbour table of everyone it hears, with per
//! neighbour reception metadata. At the wire level the protocol rides the
//! beacon daemon exactly like the variable protocol, just with a single
//! record kind.

pub mod neighbour;
pub mod service;

pub use flock_proto::constants::PROTOCOL_SAFETY;
pub use flock_proto::safety::SafetyReport;
pub use neighbour::{NeighbourState, NeighbourTable, MAX_NEIGHBOURS};
pub use service::{ReportLink, SafetyConfig, SafetyService};

pub type Result<T> = std::result::Result<T, SafetyError>;

#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("configuration invalid: {0}")]
    Config(String),
    #[error("link failure: {0}")]
    Link(String),
    #[error("shared structure failure: {0}")]
    Shm(#[from] flock_shm::ShmError),
    #[error("wire format failure: {0}")]
    Wire(#[from] flock_proto::WireError),
    #[error("neighbour table full")]
    TableFull,
}
