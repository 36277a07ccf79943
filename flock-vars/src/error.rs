//! Error and status types of the variable-dissemination daemon.

use flock_proto::WireError;
use flock_shm::ShmError;

/// Daemon-internal errors.
#[derive(Debug, thiserror::Error)]
pub enum VarsError {
    #[error("configuration invalid: {0}")]
    Config(String),
    #[error("socket failure: {0}")]
    Socket(#[from] std::io::Error),
    #[error("shared memory failure: {0}")]
    Shm(#[from] ShmError),
    #[error("wire format failure: {0}")]
    Wire(#[from] WireError),
    #[error("beacon daemon unavailable: {0}")]
    Beacon(String),
    #[error("command channel violation: {0}")]
    Command(String),
    #[error("internal inconsistency: {0}")]
    Internal(String),
}

impl VarsError {
    pub fn is_fatal(&self) -> bool {
        match self {
            VarsError::Shm(ShmError::LockTimeout) | VarsError::Shm(ShmError::Timeout) => false,
            VarsError::Shm(_) => true,
            VarsError::Command(_) | VarsError::Internal(_) => true,
            _ => false,
        }
    }
}

/// Status code of the database services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum VarsStatus {
    Ok = 0,
    Inactive = 1,
    VariableExists = 2,
    VariableDoesNotExist = 3,
    NotProducer = 4,
    VariableBeingDeleted = 5,
    DescriptionTooLong = 6,
    ValueTooLong = 7,
    EmptyValue = 8,
    IllegalRepCount = 9,
    Internal = 10,
}

impl VarsStatus {
    pub fn from_wire(val: u16) -> VarsStatus {
        match val {
            0 => VarsStatus::Ok,
            1 => VarsStatus::Inactive,
            2 => VarsStatus::VariableExists,
            3 => VarsStatus::VariableDoesNotExist,
            4 => VarsStatus::NotProducer,
            5 => VarsStatus::VariableBeingDeleted,
            6 => VarsStatus::DescriptionTooLong,
            7 => VarsStatus::ValueTooLong,
            8 => VarsStatus::EmptyValue,
            9 => VarsStatus::IllegalRepCount,
            _ => VarsStatus::Internal,
        }
    }
}

impl std::fmt::Display for VarsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            VarsStatus::Ok => "ok",
            VarsStatus::Inactive => "daemon inactive",
            VarsStatus::VariableExists => "variable exists",
            VarsStatus::VariableDoesNotExist => "variable does not exist",
            VarsStatus::NotProducer => "not the producer",
            VarsStatus::VariableBeingDeleted => "variable being deleted",
            VarsStatus::DescriptionTooLong => "description too long",
            VarsStatus::ValueTooLong => "value too long",
            VarsStatus::EmptyValue => "empty value",
            VarsStatus::IllegalRepCount => "illegal repetition count",
            VarsStatus::Internal => "internal error",
        };
        f.write_str(text)
    }
}
