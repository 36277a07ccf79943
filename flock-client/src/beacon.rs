//! Client of the beacon daemon.

use crate::{ClientError, Result};
use flock_beacon::command::{
    decode_confirm, read_frame, write_frame, ListConfirm, QueryBufferedConfirm, RegisterConfirm,
    RegisterRequest, Request, SimpleConfirm, StatisticsConfirm, SVC_ACTIVATE, SVC_CLEAR_BUFFER,
    SVC_DEACTIVATE, SVC_DEREGISTER, SVC_GET_STATISTICS, SVC_LIST_PROTOCOLS, SVC_QUERY_BUFFERED,
    SVC_REGISTER,
};
use flock_beacon::{BeaconStatus, ClientSegment, QueueingMode, CLIENT_SLOT_COUNT};
use flock_proto::{NodeId, ProtocolId};
use flock_shm::{BufferPool, ShmError, LONG_LOCK_TIMEOUT, SHORT_LOCK_TIMEOUT};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Registration parameters of a client protocol.
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub protocol_id: ProtocolId,
    pub name: String,
    pub max_payload_size: u16,
    pub mode: QueueingMode,
    pub allow_multiple_payloads: bool,
    pub wants_tx_confirms: bool,
}

/// One registered client protocol's handle on the beacon daemon.
///
/// The client creates the shared pool (and removes it when dropped); the
/// daemon attaches at registration. Payloads travel exclusively through the
/// pool; the command socket only carries management calls.
pub struct BeaconClient {
    socket_path: PathBuf,
    protocol_id: ProtocolId,
    max_payload_size: u16,
    own_node_id: NodeId,
    pool: BufferPool<ClientSegment>,
}

impl BeaconClient {
    /// Creates the shared pool at `pool_path` and registers with the daemon
    /// listening at `socket_path`.
    pub fn register(
        socket_path: &Path,
        pool_path: &Path,
        options: RegisterOptions,
    ) -> Result<BeaconClient> {
        let slot_size = (options.max_payload_size as usize).max(64);
        let pool: BufferPool<ClientSegment> =
            BufferPool::create(pool_path, CLIENT_SLOT_COUNT, slot_size)?;

        let request = Request::Register(RegisterRequest {
            protocol_id: options.protocol_id,
            name: options.name.clone(),
            max_payload_size: options.max_payload_size,
            mode: options.mode,
            allow_multiple_payloads: options.allow_multiple_payloads,
            wants_tx_confirms: options.wants_tx_confirms,
            shm_path: pool_path.to_string_lossy().into_owned(),
        });
        let body = call(socket_path, &request)?;
        let confirm: RegisterConfirm = decode_confirm(SVC_REGISTER, &body)?;
        if confirm.status != BeaconStatus::Ok {
            return Err(ClientError::BeaconStatus(confirm.status));
        }

        tracing::info!(
            protocol = %options.protocol_id,
            node = %confirm.own_node_id,
            "registered with beacon daemon"
        );
        Ok(BeaconClient {
            socket_path: socket_path.to_owned(),
            protocol_id: options.protocol_id,
            max_payload_size: options.max_payload_size,
            own_node_id: confirm.own_node_id,
            pool,
        })
    }

    pub fn protocol_id(&self) -> ProtocolId {
        self.protocol_id
    }

    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size as usize
    }

    /// Submits one payload for transmission.
    pub fn transmit_payload(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size as usize {
            return Err(ClientError::PayloadTooLarge {
                got: payload.len(),
                bound: self.max_payload_size as usize,
            });
        }
        let mut guard = self.pool.lock(LONG_LOCK_TIMEOUT)?;
        let Some(mut desc) = guard.free.pop() else {
            return Err(ClientError::Shm(ShmError::RingFull));
        };
        guard.fill_slot(&mut desc, payload)?;
        guard.tx_request.push(desc)?;
        Ok(())
    }

    /// Next payload the daemon delivered for this protocol.
    pub fn receive_payload(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.pool.lock(SHORT_LOCK_TIMEOUT) {
                Ok(mut guard) => {
                    if let Some(desc) = guard.rx_indication.pop() {
                        let payload = guard.slot_bytes(&desc)?.to_vec();
                        guard.release_slot(desc)?;
                        return Ok(Some(payload));
                    }
                }
                Err(ShmError::LockTimeout) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Waits for the next transmit confirm (only delivered when requested at
    /// registration). `Ok(false)` when the deadline passes first.
    pub fn wait_tx_confirm(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.pool.lock(SHORT_LOCK_TIMEOUT) {
                Ok(mut guard) => {
                    if guard.tx_confirm.pop().is_some() {
                        return Ok(true);
                    }
                }
                Err(ShmError::LockTimeout) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn clear_buffer(&self) -> Result<()> {
        let body = call(&self.socket_path, &Request::ClearBuffer(self.protocol_id))?;
        expect_ok(decode_confirm::<SimpleConfirm>(SVC_CLEAR_BUFFER, &body)?.status)
    }

    pub fn query_buffered_payloads(&self) -> Result<u32> {
        let body = call(&self.socket_path, &Request::QueryBuffered(self.protocol_id))?;
        let confirm: QueryBufferedConfirm = decode_confirm(SVC_QUERY_BUFFERED, &body)?;
        expect_ok(confirm.status)?;
        Ok(confirm.buffered_payloads)
    }

    pub fn list_protocols(&self) -> Result<ListConfirm> {
        let body = call(&self.socket_path, &Request::ListProtocols)?;
        let confirm: ListConfirm = decode_confirm(SVC_LIST_PROTOCOLS, &body)?;
        expect_ok(confirm.status)?;
        Ok(confirm)
    }

    pub fn activate(&self) -> Result<()> {
        let body = call(&self.socket_path, &Request::Activate)?;
        expect_ok(decode_confirm::<SimpleConfirm>(SVC_ACTIVATE, &body)?.status)
    }

    pub fn deactivate(&self) -> Result<()> {
        let body = call(&self.socket_path, &Request::Deactivate)?;
        expect_ok(decode_confirm::<SimpleConfirm>(SVC_DEACTIVATE, &body)?.status)
    }

    pub fn statistics(&self) -> Result<StatisticsConfirm> {
        let body = call(&self.socket_path, &Request::GetStatistics)?;
        let confirm: StatisticsConfirm = decode_confirm(SVC_GET_STATISTICS, &body)?;
        expect_ok(confirm.status)?;
        Ok(confirm)
    }

    pub fn deregister(&self) -> Result<()> {
        let body = call(&self.socket_path, &Request::Deregister(self.protocol_id))?;
        expect_ok(decode_confirm::<SimpleConfirm>(SVC_DEREGISTER, &body)?.status)
    }

    /// Asks the daemon to shut down. No confirm is awaited; the daemon may
    /// tear its endpoint down before any reply could be read.
    pub fn shutdown_daemon(&self) -> Result<()> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        write_frame(&mut stream, &Request::Shutdown.encode()?)?;
        Ok(())
    }
}

fn call(socket_path: &Path, request: &Request) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket_path)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write_frame(&mut stream, &request.encode()?)?;
    match read_frame(&mut stream)? {
        Some(body) => Ok(body),
        None => Err(ClientError::Protocol(
            "daemon closed the stream without a confirm".into(),
        )),
    }
}

fn expect_ok(status: BeaconStatus) -> Result<()> {
    if status == BeaconStatus::Ok {
        Ok(())
    } else {
        Err(ClientError::BeaconStatus(status))
    }
}

// The beacon client doubles as the transport seam of the higher layers.

impl flock_vars::BeaconPort for BeaconClient {
    fn submit_payload(&self, payload: &[u8]) -> std::result::Result<(), flock_vars::VarsError> {
        self.transmit_payload(payload)
            .map_err(|e| flock_vars::VarsError::Beacon(e.to_string()))
    }

    fn wait_tx_confirm(
        &self,
        timeout: Duration,
    ) -> std::result::Result<bool, flock_vars::VarsError> {
        BeaconClient::wait_tx_confirm(self, timeout)
            .map_err(|e| flock_vars::VarsError::Beacon(e.to_string()))
    }

    fn receive_payload(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<Vec<u8>>, flock_vars::VarsError> {
        BeaconClient::receive_payload(self, timeout)
            .map_err(|e| flock_vars::VarsError::Beacon(e.to_string()))
    }

    fn max_payload_size(&self) -> usize {
        BeaconClient::max_payload_size(self)
    }
}

impl flock_safety::ReportLink for BeaconClient {
    fn publish(&self, payload: &[u8]) -> std::result::Result<(), flock_safety::SafetyError> {
        self.transmit_payload(payload)
            .map_err(|e| flock_safety::SafetyError::Link(e.to_string()))
    }

    fn receive(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Option<Vec<u8>>, flock_safety::SafetyError> {
        self.receive_payload(timeout)
            .map_err(|e| flock_safety::SafetyError::Link(e.to_string()))
    }
}
