//! Receive path: frame filtering, demultiplexing, delivery into client
//! pools.

use crate::config::BeaconConfig;
use crate::medium::RxFrame;
use crate::registry::ClientRegistry;
use crate::stats::DaemonStats;
use flock_proto::{from_prefix, BeaconHeader, PayloadHeader};
use flock_shm::{ShmError, SHORT_LOCK_TIMEOUT};

/// Outcome of one frame for the daemon-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not a beacon for us (wrong destination or EtherType).
    Filtered,
    /// Header failed validation; dropped silently.
    Malformed,
    /// Processed; payloads may still have been dropped individually.
    Accepted,
}

/// Handles one captured frame end to end.
pub fn handle_frame(
    config: &BeaconConfig,
    registry: &mut ClientRegistry,
    stats: &mut DaemonStats,
    frame: &RxFrame,
    now_ms: i64,
) -> FrameOutcome {
    if frame.dst != flock_proto::NodeId::BROADCAST || frame.ether_type != config.ether_type {
        return FrameOutcome::Filtered;
    }

    let Ok((header, rest)) = from_prefix::<BeaconHeader>(&frame.payload) else {
        stats.malformed_frames += 1;
        return FrameOutcome::Malformed;
    };

    if !header.well_formed(config.node_id) || header.length as usize > rest.len() {
        stats.malformed_frames += 1;
        tracing::trace!(sender = %header.sender, "dropping malformed or own beacon");
        return FrameOutcome::Malformed;
    }

    stats.observe_beacon(config, frame.payload.len(), now_ms);

    // the header length may undercut the frame; ignore any padding after it
    let mut rest = &rest[..header.length as usize];

    for _ in 0..header.num_payloads {
        let Ok((pld, tail)) = from_prefix::<PayloadHeader>(rest) else {
            tracing::debug!("truncated payload header aborts remaining payloads");
            return FrameOutcome::Accepted;
        };
        if pld.length as usize > tail.len() {
            tracing::debug!(
                wanted = pld.length,
                have = tail.len(),
                "truncated payload body aborts remaining payloads"
            );
            return FrameOutcome::Accepted;
        }
        let (body, tail) = tail.split_at(pld.length as usize);
        rest = tail;

        deliver_payload(registry, pld, body);
    }

    FrameOutcome::Accepted
}

/// Pushes one received payload into the owning client's pool.
fn deliver_payload(registry: &mut ClientRegistry, header: PayloadHeader, body: &[u8]) {
    let Some(client) = registry.get_mut(header.protocol) else {
        tracing::trace!(protocol = %header.protocol, "payload for unregistered protocol, skipping");
        return;
    };
    client.stats.received_payloads += 1;

    let deliver = || -> Result<bool, ShmError> {
        let mut guard = client.pool.lock(SHORT_LOCK_TIMEOUT)?;
        if guard.rx_indication.is_full() {
            return Ok(false);
        }
        let Some(mut desc) = guard.free.pop() else {
            return Ok(false);
        };
        if body.len() > desc.capacity as usize {
            guard.release_slot(desc)?;
            return Ok(false);
        }
        guard.fill_slot(&mut desc, body)?;
        guard.rx_indication.push(desc)?;
        Ok(true)
    };

    match deliver() {
        Ok(true) => {}
        Ok(false) => {
            client.stats.dropped_incoming_payloads += 1;
            tracing::debug!(
                protocol = %header.protocol,
                "no room in client pool, dropping inbound payload"
            );
        }
        Err(e) => {
            client.stats.dropped_incoming_payloads += 1;
            tracing::warn!(protocol = %header.protocol, error = %e, "delivery failed");
        }
    }
}
