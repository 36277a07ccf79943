//! Payload collector: moves client-submitted payloads from the request ring
//! into the per-mode holding area.

use crate::registry::{ClientProtocol, QueueingMode};
use flock_shm::{ShmError, SHORT_LOCK_TIMEOUT};

/// Drains one client's `tx_request` ring, applying its admission policy.
///
/// Runs under the registry mutex; takes the segment lock with the short
/// timeout so a stuck client cannot stall the daemon (expiry just retries on
/// the next round).
pub fn collect_client(client: &mut ClientProtocol) -> Result<(), ShmError> {
    let mut guard = match client.pool.lock(SHORT_LOCK_TIMEOUT) {
        Ok(guard) => guard,
        Err(ShmError::LockTimeout) => return Ok(()),
        Err(e) => return Err(e),
    };

    while let Some(incoming) = guard.tx_request.pop() {
        if incoming.used as usize > client.max_payload_size as usize {
            tracing::warn!(
                protocol = %client.protocol_id,
                used = incoming.used,
                "submitted payload exceeds registered bound, dropping"
            );
            guard.release_slot(incoming)?;
            client.stats.dropped_outgoing_payloads += 1;
            continue;
        }

        match client.mode {
            QueueingMode::Once | QueueingMode::Repeat => {
                if guard.hold_occupied != 0 {
                    // overwrite: the superseded payload counts as dropped
                    let old = guard.hold_buffer;
                    guard.release_slot(old)?;
                    client.stats.dropped_outgoing_payloads += 1;
                }
                guard.hold_buffer = incoming;
                guard.hold_occupied = 1;
            }
            QueueingMode::DropTail { max_entries } => {
                if guard.hold_queue.len() >= max_entries as usize {
                    guard.release_slot(incoming)?;
                    client.stats.dropped_outgoing_payloads += 1;
                } else {
                    guard.hold_queue.push(incoming)?;
                }
            }
            QueueingMode::DropHead { max_entries } => {
                if guard.hold_queue.len() >= max_entries as usize {
                    if let Some(oldest) = guard.hold_queue.pop() {
                        guard.release_slot(oldest)?;
                        client.stats.dropped_outgoing_payloads += 1;
                    }
                }
                guard.hold_queue.push(incoming)?;
            }
        }
    }
    Ok(())
}
