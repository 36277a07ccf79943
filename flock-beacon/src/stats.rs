//! Daemon-wide statistics.

use crate::config::BeaconConfig;

/// Counters and moving averages kept by the daemon, snapshot on request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DaemonStats {
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub malformed_frames: u64,
    /// EWMA of received beacon sizes in bytes.
    pub avg_beacon_size: f64,
    /// EWMA of the spacing between received beacons in milliseconds.
    pub avg_inter_beacon_ms: f64,
    last_beacon_ms: i64,
}

impl DaemonStats {
    /// Folds one received beacon into the averages.
    ///
    /// The first size sample and the first gap sample bootstrap their
    /// average without mixing.
    pub fn observe_beacon(&mut self, config: &BeaconConfig, frame_len: usize, now_ms: i64) {
        if self.beacons_received == 0 {
            self.avg_beacon_size = frame_len as f64;
        } else {
            let a = config.size_ewma_alpha;
            self.avg_beacon_size = a * self.avg_beacon_size + (1.0 - a) * frame_len as f64;

            let gap = (now_ms - self.last_beacon_ms) as f64;
            if self.beacons_received == 1 {
                self.avg_inter_beacon_ms = gap;
            } else {
                let a = config.gap_ewma_alpha;
                self.avg_inter_beacon_ms = a * self.avg_inter_beacon_ms + (1.0 - a) * gap;
            }
        }
        self.last_beacon_ms = now_ms;
        self.beacons_received += 1;
    }
}
