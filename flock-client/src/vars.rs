//! Client of the variable daemon's database services.

use crate::{ClientError, Result};
use flock_proto::{from_slice, to_vec, NodeId, RepCount, VarDescription, VarId, VarValue};
use flock_shm::{BufferPool, ShmError, SlotDesc, LONG_LOCK_TIMEOUT, SHORT_LOCK_TIMEOUT};
use flock_vars::command::{
    decode_confirm, read_frame, write_frame, DescribeDatabaseConfirm, DescribeVariableConfirm,
    VarsRequest, VarsSimpleConfirm, VarsStatisticsConfirm, SVC_ACTIVATE, SVC_DEACTIVATE,
    SVC_DEREGISTER_CLIENT, SVC_DESCRIBE_DATABASE, SVC_DESCRIBE_VARIABLE, SVC_GET_STATISTICS,
    SVC_REGISTER_CLIENT,
};
use flock_vars::service::{
    CreateRequest, DeleteRequest, ReadConfirm, ReadRequest, StatusConfirm, UpdateRequest,
};
use flock_vars::{VariableDetail, VariableSnapshot, VarsClientSegment, VarsStats, VarsStatus,
    VARS_CLIENT_SLOT_COUNT};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Slot size of a database-client pool: enough for the largest request or
/// confirm (bounded by the 255-byte value and description fields).
const VARS_SLOT_SIZE: usize = 640;

const CRUD_TIMEOUT: Duration = Duration::from_secs(2);

enum CrudService {
    Create,
    Update,
    Delete,
    Read,
}

/// A database client: CRUD over shared memory, management over the command
/// socket.
pub struct VarsClient {
    socket_path: PathBuf,
    name: String,
    own_node_id: NodeId,
    pool: BufferPool<VarsClientSegment>,
}

impl VarsClient {
    /// Creates the client pool at `pool_path` and registers with the
    /// variable daemon.
    pub fn connect(socket_path: &Path, pool_path: &Path, name: &str) -> Result<VarsClient> {
        let pool: BufferPool<VarsClientSegment> =
            BufferPool::create(pool_path, VARS_CLIENT_SLOT_COUNT, VARS_SLOT_SIZE)?;

        let body = call(
            socket_path,
            &VarsRequest::RegisterClient {
                name: name.to_owned(),
                shm_path: pool_path.to_string_lossy().into_owned(),
            },
        )?;
        let confirm: VarsSimpleConfirm = decode_confirm(SVC_REGISTER_CLIENT, &body)?;
        if confirm.status != VarsStatus::Ok {
            return Err(ClientError::VarsStatus(confirm.status));
        }
        tracing::info!(name, node = %confirm.own_node_id, "registered with variable daemon");

        Ok(VarsClient {
            socket_path: socket_path.to_owned(),
            name: name.to_owned(),
            own_node_id: confirm.own_node_id,
            pool,
        })
    }

    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    /// Creates a variable produced by this node.
    pub fn create(
        &self,
        var_id: VarId,
        rep_count: RepCount,
        description: &str,
        value: &[u8],
    ) -> Result<()> {
        let request = CreateRequest {
            var_id,
            rep_count,
            description: VarDescription::new(description),
            value: VarValue::new(value),
        };
        let confirm: StatusConfirm = self.crud_call(CrudService::Create, &to_vec(&request)?)?;
        expect_ok(confirm.status)
    }

    /// Writes a new value to a variable this node produces.
    pub fn update(&self, var_id: VarId, value: &[u8]) -> Result<()> {
        let request = UpdateRequest {
            var_id,
            value: VarValue::new(value),
        };
        let confirm: StatusConfirm = self.crud_call(CrudService::Update, &to_vec(&request)?)?;
        expect_ok(confirm.status)
    }

    /// Starts deletion of a variable this node produces.
    pub fn delete(&self, var_id: VarId) -> Result<()> {
        let request = DeleteRequest { var_id };
        let confirm: StatusConfirm = self.crud_call(CrudService::Delete, &to_vec(&request)?)?;
        expect_ok(confirm.status)
    }

    /// Reads a variable's value and local timestamp.
    pub fn read(&self, var_id: VarId) -> Result<(Vec<u8>, i64)> {
        let request = ReadRequest { var_id };
        let confirm: ReadConfirm = self.crud_call(CrudService::Read, &to_vec(&request)?)?;
        if confirm.status != VarsStatus::Ok {
            return Err(ClientError::VarsStatus(confirm.status));
        }
        Ok((confirm.value.0, confirm.tstamp_ms))
    }

    /// One request/confirm round trip through the rings.
    fn crud_call<C: flock_proto::WireDeserialize>(
        &self,
        service: CrudService,
        request_bytes: &[u8],
    ) -> Result<C> {
        {
            let mut guard = self.pool.lock(LONG_LOCK_TIMEOUT)?;
            let Some(mut desc) = guard.free.pop() else {
                return Err(ClientError::Shm(ShmError::RingFull));
            };
            guard.fill_slot(&mut desc, request_bytes)?;
            match service {
                CrudService::Create => guard.create_req.push(desc)?,
                CrudService::Update => guard.update_req.push(desc)?,
                CrudService::Delete => guard.delete_req.push(desc)?,
                CrudService::Read => guard.read_req.push(desc)?,
            }
        }

        let deadline = Instant::now() + CRUD_TIMEOUT;
        loop {
            match self.pool.lock(SHORT_LOCK_TIMEOUT) {
                Ok(mut guard) => {
                    let popped: Option<SlotDesc> = match service {
                        CrudService::Create => guard.create_conf.pop(),
                        CrudService::Update => guard.update_conf.pop(),
                        CrudService::Delete => guard.delete_conf.pop(),
                        CrudService::Read => guard.read_conf.pop(),
                    };
                    if let Some(desc) = popped {
                        let bytes = guard.slot_bytes(&desc)?.to_vec();
                        guard.release_slot(desc)?;
                        return Ok(from_slice(&bytes)?);
                    }
                }
                Err(ShmError::LockTimeout) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn describe_database(&self) -> Result<Vec<VariableSnapshot>> {
        let body = call(&self.socket_path, &VarsRequest::DescribeDatabase)?;
        let confirm: DescribeDatabaseConfirm = decode_confirm(SVC_DESCRIBE_DATABASE, &body)?;
        expect_ok(confirm.status)?;
        Ok(confirm.variables)
    }

    pub fn describe_variable(&self, var_id: VarId) -> Result<VariableDetail> {
        let body = call(&self.socket_path, &VarsRequest::DescribeVariable(var_id))?;
        let confirm: DescribeVariableConfirm = decode_confirm(SVC_DESCRIBE_VARIABLE, &body)?;
        expect_ok(confirm.status)?;
        let snapshot = confirm
            .variable
            .ok_or_else(|| ClientError::Protocol("confirm without a snapshot".into()))?;
        Ok(VariableDetail {
            snapshot,
            value: confirm.value,
        })
    }

    pub fn activate(&self) -> Result<()> {
        let body = call(&self.socket_path, &VarsRequest::Activate)?;
        expect_ok(decode_confirm::<VarsSimpleConfirm>(SVC_ACTIVATE, &body)?.status)
    }

    pub fn deactivate(&self) -> Result<()> {
        let body = call(&self.socket_path, &VarsRequest::Deactivate)?;
        expect_ok(decode_confirm::<VarsSimpleConfirm>(SVC_DEACTIVATE, &body)?.status)
    }

    pub fn statistics(&self) -> Result<VarsStats> {
        let body = call(&self.socket_path, &VarsRequest::GetStatistics)?;
        let confirm: VarsStatisticsConfirm = decode_confirm(SVC_GET_STATISTICS, &body)?;
        expect_ok(confirm.status)?;
        Ok(confirm.stats)
    }

    pub fn deregister(&self) -> Result<()> {
        let body = call(
            &self.socket_path,
            &VarsRequest::DeregisterClient {
                name: self.name.clone(),
            },
        )?;
        expect_ok(decode_confirm::<VarsSimpleConfirm>(SVC_DEREGISTER_CLIENT, &body)?.status)
    }

    /// Asks the daemon to shut down; no confirm is awaited.
    pub fn shutdown_daemon(&self) -> Result<()> {
        let mut stream = UnixStream::connect(&self.socket_path)?;
        write_frame(&mut stream, &VarsRequest::Shutdown.encode()?)?;
        Ok(())
    }
}

fn call(socket_path: &Path, request: &VarsRequest) -> Result<Vec<u8>> {
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

fn expect_ok(status: VarsStatus) -> Result<()> {
    if status == VarsStatus::Ok {
        Ok(())
    } else {
        Err(ClientError::VarsStatus(status))
    }
}
