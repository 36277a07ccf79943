//! # Flock Client
//!
//! Client-side libraries of the flock stack. [`BeaconClient`] registers a
//! protocol with the beacon daemon and exchanges payloads through the shared
//! pool; [`VarsClient`] talks to the variable daemon's database services.
//! The status code of a failed service call is surfaced verbatim.

pub mod beacon;
pub mod vars;

pub use beacon::{BeaconClient, RegisterOptions};
pub use vars::VarsClient;

use flock_beacon::BeaconStatus;
use flock_vars::VarsStatus;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("socket failure: {0}")]
    Socket(#[from] std::io::Error),
    #[error("shared memory failure: {0}")]
    Shm(#[from] flock_shm::ShmError),
    #[error("wire format failure: {0}")]
    Wire(#[from] flock_proto::WireError),
    #[error("beacon daemon answered: {0}")]
    BeaconStatus(BeaconStatus),
    #[error("variable daemon answered: {0}")]
    VarsStatus(VarsStatus),
    #[error("payload too large: {got} bytes, registered bound {bound}")]
    PayloadTooLarge { got: usize, bound: usize },
    #[error("no confirm within the deadline")]
    Timeout,
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<flock_beacon::BeaconError> for ClientError {
    fn from(e: flock_beacon::BeaconError) -> ClientError {
        match e {
            flock_beacon::BeaconError::Socket(io) => ClientError::Socket(io),
            flock_beacon::BeaconError::Wire(w) => ClientError::Wire(w),
            flock_beacon::BeaconError::Shm(s) => ClientError::Shm(s),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<flock_vars::VarsError> for ClientError {
    fn from(e: flock_vars::VarsError) -> ClientError {
        match e {
            flock_vars::VarsError::Socket(io) => ClientError::Socket(io),
            flock_vars::VarsError::Wire(w) => ClientError::Wire(w),
            flock_vars::VarsError::Shm(s) => ClientError::Shm(s),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}
