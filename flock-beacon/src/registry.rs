//! Client-protocol registry and queueing policy.

use crate::config::BeaconConfig;
use crate::error::BeaconStatus;
use crate::segment::{ClientSegment, CLIENT_SLOT_COUNT, MAX_QUEUE_ENTRIES};
use flock_proto::{NodeId, ProtocolId};
use flock_shm::BufferPool;
use std::path::Path;
use std::time::Instant;

/// Admission and retransmission policy of a client's outbound payloads.
///
/// Selected at registration and dispatched as a plain enum on both the
/// collector and the transmit side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueingMode {
    /// One-slot buffer, overwritten on submit, consumed on transmit.
    Once,
    /// One-slot buffer, overwritten on submit, copied on transmit; cleared
    /// only explicitly.
    Repeat,
    /// Bounded FIFO; the oldest entry is evicted to admit a newcomer.
    DropHead { max_entries: u16 },
    /// Bounded FIFO; a newcomer is dropped when the queue is full.
    DropTail { max_entries: u16 },
}

impl QueueingMode {
    pub fn from_wire(mode: u8, max_entries: u16) -> Option<QueueingMode> {
        match mode {
            0 => Some(QueueingMode::Once),
            1 => Some(QueueingMode::Repeat),
            2 => Some(QueueingMode::DropHead { max_entries }),
            3 => Some(QueueingMode::DropTail { max_entries }),
            _ => None,
        }
    }

    pub fn to_wire(self) -> (u8, u16) {
        match self {
            QueueingMode::Once => (0, 0),
            QueueingMode::Repeat => (1, 0),
            QueueingMode::DropHead { max_entries } => (2, max_entries),
            QueueingMode::DropTail { max_entries } => (3, max_entries),
        }
    }

    pub fn is_queue(&self) -> bool {
        matches!(
            self,
            QueueingMode::DropHead { .. } | QueueingMode::DropTail { .. }
        )
    }
}

/// Per-client counters, exposed through the management interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub outgoing_payloads: u64,
    pub received_payloads: u64,
    pub dropped_outgoing_payloads: u64,
    pub dropped_incoming_payloads: u64,
}

/// One registered client protocol.
pub struct ClientProtocol {
    pub protocol_id: ProtocolId,
    pub name: String,
    pub max_payload_size: u16,
    pub mode: QueueingMode,
    pub allow_multiple_payloads: bool,
    pub wants_tx_confirms: bool,
    pub registered_at: Instant,
    pub stats: ClientStats,
    pub pool: BufferPool<ClientSegment>,
}

/// Registration table of the daemon. Iteration order is insertion order and
/// stays stable across transmissions.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<ClientProtocol>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            clients: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ProtocolId) -> bool {
        self.clients.iter().any(|c| c.protocol_id == id)
    }

    pub fn get(&self, id: ProtocolId) -> Option<&ClientProtocol> {
        self.clients.iter().find(|c| c.protocol_id == id)
    }

    pub fn get_mut(&mut self, id: ProtocolId) -> Option<&mut ClientProtocol> {
        self.clients.iter_mut().find(|c| c.protocol_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientProtocol> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientProtocol> {
        self.clients.iter_mut()
    }

    /// Validates and applies a registration request.
    ///
    /// Checks run in the order: duplicate id, payload size bounds, queue
    /// size bounds. On success the daemon attaches to the client's pool.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        config: &BeaconConfig,
        protocol_id: ProtocolId,
        name: &str,
        max_payload_size: u16,
        mode: QueueingMode,
        allow_multiple_payloads: bool,
        wants_tx_confirms: bool,
        shm_path: &Path,
        now: Instant,
    ) -> Result<NodeId, BeaconStatus> {
        if self.contains(protocol_id) {
            return Err(BeaconStatus::AlreadyRegistered);
        }
        if max_payload_size == 0 || max_payload_size as usize > config.max_client_payload() {
            return Err(BeaconStatus::IllegalMaxPayloadSize);
        }
        if let QueueingMode::DropHead { max_entries } | QueueingMode::DropTail { max_entries } =
            mode
        {
            if max_entries == 0 || max_entries > MAX_QUEUE_ENTRIES {
                return Err(BeaconStatus::IllegalDroppingQueueSize);
            }
        }

        let pool = match BufferPool::<ClientSegment>::open(shm_path) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!(%protocol_id, error = %e, "cannot attach to client pool");
                return Err(BeaconStatus::Internal);
            }
        };
        if pool.slot_count() != CLIENT_SLOT_COUNT
            || pool.slot_size() < max_payload_size as usize
        {
            tracing::error!(%protocol_id, "client pool geometry does not match registration");
            return Err(BeaconStatus::Internal);
        }

        tracing::info!(%protocol_id, name, max_payload_size, ?mode, "registered client protocol");
        self.clients.push(ClientProtocol {
            protocol_id,
            name: name.to_owned(),
            max_payload_size,
            mode,
            allow_multiple_payloads,
            wants_tx_confirms,
            registered_at: now,
            stats: ClientStats::default(),
            pool,
        });
        Ok(config.node_id)
    }

    /// Removes a registration; the client's pool is detached (and removed by
    /// its creator, not by the daemon).
    pub fn deregister(&mut self, protocol_id: ProtocolId) -> Result<(), BeaconStatus> {
        let before = self.clients.len();
        self.clients.retain(|c| c.protocol_id != protocol_id);
        if self.clients.len() == before {
            return Err(BeaconStatus::UnknownProtocol);
        }
        tracing::info!(%protocol_id, "deregistered client protocol");
        Ok(())
    }
}
