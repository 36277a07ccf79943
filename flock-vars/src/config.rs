//! Configuration of the variable-dissemination daemon.

use crate::error::VarsError;
use flock_proto::constants::MAX_REP_COUNT;
use flock_proto::NodeId;
use std::path::PathBuf;
use std::time::Duration;

/// Static parameters of one daemon instance.
#[derive(Debug, Clone)]
pub struct VarsConfig {
    /// This station's identifier; must match the beacon daemon's.
    pub node_id: NodeId,
    /// Longest admissible variable value.
    pub max_value_length: usize,
    /// Longest admissible variable description.
    pub max_description_length: usize,
    /// Highest admissible repetition count.
    pub max_repetitions: u8,
    /// Cap on summary records per payload; zero disables summaries.
    pub max_summaries: usize,
    /// Payload budget per beacon (must fit the beacon client registration).
    pub payload_size: usize,
    /// Pace of payload generation; matches the beacon period.
    pub beacon_period: Duration,
    /// Take the store lock once per received payload (false) or once per
    /// instruction container (true).
    pub lock_per_container: bool,
    /// Path of this daemon's command socket.
    pub socket_path: PathBuf,
    /// Path of the beacon daemon's command socket.
    pub beacon_socket_path: PathBuf,
    /// Shm path of the beacon client pool this daemon creates.
    pub beacon_pool_path: PathBuf,
    /// Timeout of a command-socket read before the exit flag is re-checked.
    pub command_timeout: Duration,
}

impl Default for VarsConfig {
    fn default() -> Self {
        VarsConfig {
            node_id: NodeId::NULL,
            max_value_length: 32,
            max_description_length: 64,
            max_repetitions: 3,
            max_summaries: 20,
            payload_size: 1000,
            beacon_period: Duration::from_millis(100),
            lock_per_container: false,
            socket_path: PathBuf::from("/tmp/flock-vars.sock"),
            beacon_socket_path: PathBuf::from("/tmp/flock-beacon.sock"),
            beacon_pool_path: PathBuf::from("/dev/shm/flock-vars-pool"),
            command_timeout: Duration::from_millis(500),
        }
    }
}

impl VarsConfig {
    pub fn validate(&self) -> Result<(), VarsError> {
        if self.node_id == NodeId::NULL {
            return Err(VarsError::Config("node id must be set".into()));
        }
        if self.max_value_length == 0 || self.max_value_length > u8::MAX as usize {
            return Err(VarsError::Config(format!(
                "max value length {} outside 1..=255",
                self.max_value_length
            )));
        }
        if self.max_description_length == 0 || self.max_description_length > u8::MAX as usize {
            return Err(VarsError::Config(format!(
                "max description length {} outside 1..=255",
                self.max_description_length
            )));
        }
        if self.max_repetitions == 0 || self.max_repetitions > MAX_REP_COUNT {
            return Err(VarsError::Config(format!(
                "max repetitions {} outside 1..={}",
                self.max_repetitions, MAX_REP_COUNT
            )));
        }
        if self.payload_size < flock_proto::ContainerHeader::WIRE_SIZE + 4 {
            return Err(VarsError::Config(
                "payload size leaves no room for a single record".into(),
            ));
        }
        if self.beacon_period.is_zero() {
            return Err(VarsError::Config("beacon period must be positive".into()));
        }
        Ok(())
    }
}
