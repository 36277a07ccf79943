//! Error and status types of the beacon daemon.

use flock_proto::WireError;
use flock_shm::ShmError;

/// Errors on the daemon-internal paths.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("configuration invalid: {0}")]
    Config(String),
    #[error("socket failure: {0}")]
    Socket(#[from] std::io::Error),
    #[error("shared memory failure: {0}")]
    Shm(#[from] ShmError),
    #[error("wire format failure: {0}")]
    Wire(#[from] WireError),
    #[error("medium failure: {0}")]
    Medium(String),
    #[error("command channel violation: {0}")]
    Command(String),
    #[error("internal inconsistency: {0}")]
    Internal(String),
}

impl BeaconError {
    /// Whether the daemon must shut down over this error.
    ///
    /// Lock expiry and queue-wait expiry are retried; everything pointing at
    /// corruption or protocol version skew takes the daemon down.
    pub fn is_fatal(&self) -> bool {
        match self {
            BeaconError::Shm(ShmError::LockTimeout) | BeaconError::Shm(ShmError::Timeout) => false,
            BeaconError::Shm(_) => true,
            BeaconError::Command(_) | BeaconError::Internal(_) => true,
            _ => false,
        }
    }
}

/// Status code carried in every service confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BeaconStatus {
    Ok = 0,
    AlreadyRegistered = 1,
    IllegalMaxPayloadSize = 2,
    IllegalDroppingQueueSize = 3,
    UnknownProtocol = 4,
    Inactive = 5,
    PayloadTooLarge = 6,
    Internal = 7,
}

impl BeaconStatus {
    pub fn from_wire(val: u16) -> BeaconStatus {
        match val {
            0 => BeaconStatus::Ok,
            1 => BeaconStatus::AlreadyRegistered,
            2 => BeaconStatus::IllegalMaxPayloadSize,
            3 => BeaconStatus::IllegalDroppingQueueSize,
            4 => BeaconStatus::UnknownProtocol,
            5 => BeaconStatus::Inactive,
            6 => BeaconStatus::PayloadTooLarge,
            _ => BeaconStatus::Internal,
        }
    }
}

impl std::fmt::Display for BeaconStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            BeaconStatus::Ok => "ok",
            BeaconStatus::AlreadyRegistered => "protocol already registered",
            BeaconStatus::IllegalMaxPayloadSize => "illegal maximum payload size",
            BeaconStatus::IllegalDroppingQueueSize => "illegal dropping queue size",
            BeaconStatus::UnknownProtocol => "unknown protocol",
            BeaconStatus::Inactive => "daemon inactive",
            BeaconStatus::PayloadTooLarge => "payload too large",
            BeaconStatus::Internal => "internal error",
        };
        f.write_str(text)
    }
}
