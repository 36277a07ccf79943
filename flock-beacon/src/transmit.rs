//! Beacon assembly and the transmit scheduler.

use crate::config::BeaconConfig;
use crate::registry::{ClientProtocol, ClientRegistry, QueueingMode};
use flock_proto::{to_vec, BeaconHeader, PayloadHeader, WireSerialize};
use flock_shm::{ShmError, SlotDesc, SHORT_LOCK_TIMEOUT};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Draws the next inter-beacon gap: uniform over
/// `avg * (1 - j) ..= avg * (1 + j)`.
pub fn next_beacon_gap(config: &BeaconConfig, rng: &mut StdRng) -> Duration {
    let avg = config.avg_beacon_period.as_secs_f64();
    let j = config.jitter_fraction;
    if j == 0.0 {
        return config.avg_beacon_period;
    }
    let gap = rng.gen_range(avg * (1.0 - j)..=avg * (1.0 + j));
    Duration::from_secs_f64(gap)
}

/// Pulls at most one payload from a client's holding area into the beacon
/// body, provided it fits in `remaining` bytes.
///
/// Returns the payload that was appended, if any.
fn pull_one(
    client: &mut ClientProtocol,
    body: &mut Vec<u8>,
    remaining: &mut usize,
) -> Result<bool, ShmError> {
    let mut guard = match client.pool.lock(SHORT_LOCK_TIMEOUT) {
        Ok(guard) => guard,
        Err(ShmError::LockTimeout) => return Ok(false),
        Err(e) => return Err(e),
    };

    let desc: Option<(SlotDesc, bool)> = match client.mode {
        QueueingMode::Once | QueueingMode::Repeat => {
            if guard.hold_occupied != 0 {
                let consume = client.mode == QueueingMode::Once;
                Some((guard.hold_buffer, consume))
            } else {
                None
            }
        }
        QueueingMode::DropHead { .. } | QueueingMode::DropTail { .. } => {
            guard.hold_queue.peek().copied().map(|d| (d, true))
        }
    };

    let Some((desc, consume)) = desc else {
        return Ok(false);
    };

    let needed = PayloadHeader::WIRE_SIZE + desc.used as usize;
    if needed > *remaining {
        return Ok(false);
    }

    let header = PayloadHeader {
        protocol: client.protocol_id,
        length: desc.used as u16,
    };
    header
        .serialize(body)
        .map_err(|_| ShmError::Corrupt("payload header failed to serialize"))?;
    body.extend_from_slice(guard.slot_bytes(&desc)?);
    *remaining -= needed;

    if consume {
        match client.mode {
            QueueingMode::Once | QueueingMode::Repeat => {
                guard.hold_occupied = 0;
                let freed = guard.hold_buffer;
                guard.hold_buffer = SlotDesc::default();
                guard.release_slot(freed)?;
            }
            _ => {
                let freed = guard
                    .hold_queue
                    .pop()
                    .ok_or(ShmError::Corrupt("holding queue lost its head"))?;
                guard.release_slot(freed)?;
            }
        }
    }

    if client.wants_tx_confirms && !guard.tx_confirm.is_full() {
        guard.tx_confirm.push(SlotDesc::default())?;
    }

    client.stats.outgoing_payloads += 1;
    Ok(true)
}

/// Assembles one beacon from the registered clients, in registration order.
///
/// Returns the serialized frame, or `None` when no client had data.
pub fn assemble_beacon(
    config: &BeaconConfig,
    registry: &mut ClientRegistry,
    seqno: u32,
) -> Result<Option<Vec<u8>>, ShmError> {
    let mut body = Vec::with_capacity(config.max_beacon_size);
    let mut remaining = config.max_beacon_size - BeaconHeader::WIRE_SIZE;
    let mut num_payloads: u8 = 0;

    for client in registry.iter_mut() {
        if num_payloads == u8::MAX {
            break;
        }
        if pull_one(client, &mut body, &mut remaining)? {
            num_payloads += 1;
        }
    }

    if num_payloads == 0 {
        return Ok(None);
    }

    let header = BeaconHeader::new(config.node_id, body.len() as u16, num_payloads, seqno);
    let mut frame =
        to_vec(&header).map_err(|_| ShmError::Corrupt("beacon header failed to serialize"))?;
    frame.extend_from_slice(&body);
    tracing::trace!(
        seqno,
        num_payloads,
        frame_len = frame.len(),
        "assembled beacon"
    );
    Ok(Some(frame))
}
