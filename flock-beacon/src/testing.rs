//! Simulated broadcast medium for integration tests.

use crate::error::BeaconError;
use crate::medium::{Medium, RxFrame};
use flock_proto::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// A shared piece of air: every frame sent by one station is delivered to
/// all other registered stations.
#[derive(Default)]
pub struct VirtualAir {
    stations: Mutex<HashMap<NodeId, Sender<RxFrame>>>,
}

impl VirtualAir {
    pub fn new() -> Arc<VirtualAir> {
        Arc::new(VirtualAir::default())
    }

    /// Registers a station and returns its endpoint.
    pub fn join(self: &Arc<VirtualAir>, id: NodeId) -> AirEndpoint {
        let (tx, rx) = channel();
        self.stations.lock().insert(id, tx);
        AirEndpoint {
            id,
            air: Arc::clone(self),
            inbox: Mutex::new(rx),
        }
    }

    fn broadcast(&self, from: NodeId, ether_type: u16, payload: &[u8]) {
        let stations = self.stations.lock();
        for (id, tx) in stations.iter() {
            if *id == from {
                continue;
            }
            let _ = tx.send(RxFrame {
                src: from,
                dst: NodeId::BROADCAST,
                ether_type,
                payload: payload.to_vec(),
            });
        }
    }
}

/// One station's attachment to the virtual air.
pub struct AirEndpoint {
    id: NodeId,
    air: Arc<VirtualAir>,
    inbox: Mutex<Receiver<RxFrame>>,
}

impl AirEndpoint {
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// Injects a raw frame into this station's inbox, bypassing the air.
    /// Useful for malformed-frame tests.
    pub fn inject(&self, frame: RxFrame) {
        let stations = self.air.stations.lock();
        if let Some(tx) = stations.get(&self.id) {
            let _ = tx.send(frame);
        }
    }
}

impl Medium for AirEndpoint {
    fn send(&self, ether_type: u16, payload: &[u8]) -> Result<(), BeaconError> {
        self.air.broadcast(self.id, ether_type, payload);
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<RxFrame>, BeaconError> {
        match self.inbox.lock().recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(BeaconError::Medium("virtual air shut down".into()))
            }
        }
    }
}

/// Unique shm path for a test client pool.
pub fn test_pool_path(tag: &str) -> std::path::PathBuf {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "flock-pool-{}-{}-{}",
        std::process::id(),
        tag,
        n
    ));
    let _ = std::fs::remove_file(&path);
    path
}

/// Unique command-socket path for a test daemon.
pub fn test_socket_path(tag: &str) -> std::path::PathBuf {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "flock-sock-{}-{}-{}",
        std::process::id(),
        tag,
        n
    ))
}
