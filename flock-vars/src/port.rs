//! Seam between the variable daemon and the beacon daemon.
//!
//! The drivers only need payload submission, transmit pacing and payload
//! delivery; the concrete beacon client (command socket + shared memory)
//! lives in the client-library crate, and tests plug in a loopback.

use crate::error::VarsError;
use std::time::Duration;

pub trait BeaconPort: Send + Sync {
    /// Hands one payload to the beacon daemon for the next beacon.
    fn submit_payload(&self, payload: &[u8]) -> Result<(), VarsError>;

    /// Waits for the next transmit confirmation; `Ok(false)` on timeout.
    /// Paces the transmit driver to one payload per beacon window.
    fn wait_tx_confirm(&self, timeout: Duration) -> Result<bool, VarsError>;

    /// Next payload the beacon daemon delivered for this protocol, if any
    /// arrives before the timeout.
    fn receive_payload(&self, timeout: Duration) -> Result<Option<Vec<u8>>, VarsError>;

    /// Payload budget granted at registration.
    fn max_payload_size(&self) -> usize;
}
