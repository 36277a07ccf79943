//! Beacon daemon configuration.

use crate::error::BeaconError;
use flock_proto::constants::{DEFAULT_ETHER_TYPE, MAX_BEACON_SIZE};
use flock_proto::{BeaconHeader, NodeId, PayloadHeader};
use std::path::PathBuf;
use std::time::Duration;

/// Static parameters of one beacon daemon instance.
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// This station's identifier, also the sender id of every beacon.
    pub node_id: NodeId,
    /// Mean spacing between two consecutive beacons.
    pub avg_beacon_period: Duration,
    /// Jitter fraction in `[0, 1)`; each period is drawn uniformly from
    /// `avg * (1 - j) ..= avg * (1 + j)`.
    pub jitter_fraction: f64,
    /// Upper bound on a whole beacon frame.
    pub max_beacon_size: usize,
    /// EtherType of beacon frames.
    pub ether_type: u16,
    /// Smoothing factor of the received-beacon-size average.
    pub size_ewma_alpha: f64,
    /// Smoothing factor of the inter-beacon-time average.
    pub gap_ewma_alpha: f64,
    /// Path of the command socket.
    pub socket_path: PathBuf,
    /// Timeout of a command-socket read before the exit flag is re-checked.
    pub command_timeout: Duration,
    /// How long the receive path waits for a frame before re-checking the
    /// exit flag.
    pub sniffer_timeout: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig {
            node_id: NodeId::NULL,
            avg_beacon_period: Duration::from_millis(100),
            jitter_fraction: 0.1,
            max_beacon_size: MAX_BEACON_SIZE,
            ether_type: DEFAULT_ETHER_TYPE,
            size_ewma_alpha: 0.9,
            gap_ewma_alpha: 0.9,
            socket_path: PathBuf::from("/tmp/flock-beacon.sock"),
            command_timeout: Duration::from_millis(500),
            sniffer_timeout: Duration::from_millis(300),
        }
    }
}

impl BeaconConfig {
    /// Largest payload any client protocol may register for.
    pub fn max_client_payload(&self) -> usize {
        self.max_beacon_size
            .saturating_sub(BeaconHeader::WIRE_SIZE + PayloadHeader::WIRE_SIZE)
    }

    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.node_id == NodeId::NULL {
            return Err(BeaconError::Config("node id must be set".into()));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(BeaconError::Config(format!(
                "jitter fraction {} outside [0, 1)",
                self.jitter_fraction
            )));
        }
        let shortest = self.avg_beacon_period.as_secs_f64() * (1.0 - self.jitter_fraction);
        if shortest <= 0.0 {
            return Err(BeaconError::Config(
                "average beacon period collapses to zero under jitter".into(),
            ));
        }
        if self.max_beacon_size > MAX_BEACON_SIZE {
            return Err(BeaconError::Config(format!(
                "max beacon size {} above limit {}",
                self.max_beacon_size, MAX_BEACON_SIZE
            )));
        }
        if self.max_client_payload() == 0 {
            return Err(BeaconError::Config(
                "max beacon size leaves no room for payloads".into(),
            ));
        }
        for alpha in [self.size_ewma_alpha, self.gap_ewma_alpha] {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(BeaconError::Config(format!(
                    "EWMA alpha {alpha} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}
