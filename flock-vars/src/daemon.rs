//! The variable daemon: command server, transmit driver, receive driver and
//! database management threads over one engine.

use crate::command::{
    encode_confirm, read_frame, write_frame, DescribeDatabaseConfirm, DescribeVariableConfirm,
    VarsRequest, VarsSimpleConfirm, VarsStatisticsConfirm, SVC_ACTIVATE, SVC_DEACTIVATE,
    SVC_DEREGISTER_CLIENT, SVC_DESCRIBE_DATABASE, SVC_DESCRIBE_VARIABLE, SVC_GET_STATISTICS,
    SVC_REGISTER_CLIENT,
};
use crate::config::VarsConfig;
use crate::engine::ProtocolData;
use crate::error::{VarsError, VarsStatus};
use crate::port::BeaconPort;
use crate::segment::{VarsClientSegment, VARS_CLIENT_SLOT_COUNT};
use crate::service::{
    CreateRequest, DeleteRequest, ReadConfirm, ReadRequest, StatusConfirm, UpdateRequest,
};
use flock_proto::{from_slice, to_vec, Clock, InstructionBatch, VarValue, WireDeserialize};
use flock_shm::{BufferPool, ShmError, SHORT_LOCK_TIMEOUT};
use parking_lot::Mutex;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One registered database client.
struct RegisteredClient {
    name: String,
    pool: BufferPool<VarsClientSegment>,
}

/// State shared by the daemon threads.
pub struct VarsContext {
    pub config: VarsConfig,
    pub engine: Mutex<ProtocolData>,
    clients: Mutex<Vec<RegisteredClient>>,
    pub port: Arc<dyn BeaconPort>,
    pub clock: Clock,
    pub exit: AtomicBool,
}

impl VarsContext {
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Relaxed)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    fn escalate(&self, context: &str, error: &VarsError) -> bool {
        if error.is_fatal() {
            tracing::error!(context, %error, "fatal error, shutting down");
            self.request_exit();
            true
        } else {
            tracing::debug!(context, %error, "recoverable error");
            false
        }
    }
}

pub struct VarsDaemon {
    pub ctx: Arc<VarsContext>,
    threads: Vec<JoinHandle<()>>,
    socket_path: std::path::PathBuf,
}

impl VarsDaemon {
    /// Starts the four daemon threads. The daemon begins inactive; the
    /// beacon registration is the caller's business (it owns the port).
    pub fn start(
        config: VarsConfig,
        port: Arc<dyn BeaconPort>,
        clock: Clock,
    ) -> Result<VarsDaemon, VarsError> {
        config.validate()?;
        let socket_path = config.socket_path.clone();
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let engine = ProtocolData::new(&config, Arc::clone(&clock))?;
        let ctx = Arc::new(VarsContext {
            config,
            engine: Mutex::new(engine),
            clients: Mutex::new(Vec::new()),
            port,
            clock,
            exit: AtomicBool::new(false),
        });

        tracing::info!(node = %ctx.config.node_id, "starting variable daemon");

        let threads = vec![
            spawn_named("var-command", {
                let ctx = Arc::clone(&ctx);
                move || command_loop(ctx, listener)
            }),
            spawn_named("var-transmit", {
                let ctx = Arc::clone(&ctx);
                move || transmit_loop(ctx)
            }),
            spawn_named("var-receive", {
                let ctx = Arc::clone(&ctx);
                move || receive_loop(ctx)
            }),
            spawn_named("var-rtdb", {
                let ctx = Arc::clone(&ctx);
                move || management_loop(ctx)
            }),
        ];

        Ok(VarsDaemon {
            ctx,
            threads,
            socket_path,
        })
    }

    pub fn shutdown(&mut self) {
        self.ctx.request_exit();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(node = %self.ctx.config.node_id, "variable daemon stopped");
    }

    pub fn wait(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for VarsDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .expect("spawning a daemon thread cannot fail")
}

// ------------------------------------------------------------------ drivers

fn transmit_loop(ctx: Arc<VarsContext>) {
    tracing::debug!("transmit driver running");
    while !ctx.exit_requested() {
        let active = ctx.engine.lock().active;
        if active {
            let limit = ctx.config.payload_size.min(ctx.port.max_payload_size());
            let payload = match ctx.engine.lock().compose_payload(limit) {
                Ok(payload) => payload,
                Err(e) => {
                    ctx.escalate("payload composition", &e);
                    continue;
                }
            };
            if !payload.is_empty() {
                if let Err(e) = ctx.port.submit_payload(&payload) {
                    ctx.escalate("payload submission", &e);
                    continue;
                }
            }
        }
        // paced by transmit confirms, bounded by the beacon period
        match ctx.port.wait_tx_confirm(ctx.config.beacon_period) {
            Ok(_) => {}
            Err(e) => {
                ctx.escalate("transmit pacing", &e);
            }
        }
    }
    tracing::debug!("transmit driver stopped");
}

fn receive_loop(ctx: Arc<VarsContext>) {
    tracing::debug!("receive driver running");
    while !ctx.exit_requested() {
        match ctx.port.receive_payload(Duration::from_millis(300)) {
            Ok(Some(payload)) => {
                if !ctx.engine.lock().active {
                    continue;
                }
                if ctx.config.lock_per_container {
                    apply_per_container(&ctx, &payload);
                } else {
                    ctx.engine.lock().process_payload(&payload);
                }
            }
            Ok(None) => {}
            Err(e) => {
                if ctx.escalate("payload reception", &e) {
                    break;
                }
            }
        }
    }
    tracing::debug!("receive driver stopped");
}

/// Canonical application order with one lock acquisition per container kind.
fn apply_per_container(ctx: &VarsContext, payload: &[u8]) {
    let (batch, err) = InstructionBatch::parse(payload);
    if err.is_some() {
        ctx.engine.lock().stats.malformed_payloads += 1;
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.creates {
            engine.apply_create(r);
        }
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.deletes {
            engine.apply_delete(r);
        }
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.updates {
            engine.apply_update(r);
        }
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.summaries {
            engine.apply_summary(r);
        }
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.req_updates {
            engine.apply_req_update(r);
        }
    }
    {
        let mut engine = ctx.engine.lock();
        for r in &batch.req_creates {
            engine.apply_req_create(r);
        }
        engine.stats.payloads_processed += 1;
    }
}

// --------------------------------------------------------------- management

fn management_loop(ctx: Arc<VarsContext>) {
    tracing::debug!("database management running");
    while !ctx.exit_requested() {
        {
            let clients = ctx.clients.lock();
            for client in clients.iter() {
                if let Err(e) = service_pool(&ctx, &client.pool) {
                    if ctx.escalate("database service", &e) {
                        return;
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    tracing::debug!("database management stopped");
}

/// A request primitive that does not parse to exactly its slot length is
/// client/daemon version skew, which must take the daemon down.
fn parse_primitive<T: WireDeserialize>(bytes: &[u8]) -> Result<T, VarsError> {
    from_slice(bytes).map_err(|e| VarsError::Command(format!("undecodable service request: {e}")))
}

/// Services every pending CRUD request of one client pool.
fn service_pool(ctx: &VarsContext, pool: &BufferPool<VarsClientSegment>) -> Result<(), VarsError> {
    let mut guard = match pool.lock(SHORT_LOCK_TIMEOUT) {
        Ok(guard) => guard,
        Err(ShmError::LockTimeout) => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    // create
    while let Some(mut desc) = guard.create_req.pop() {
        let request: CreateRequest = parse_primitive(guard.slot_bytes(&desc)?)?;
        let status = ctx.engine.lock().handle_create(
            request.var_id,
            request.rep_count,
            request.description.as_str(),
            request.value.as_slice(),
        );
        let confirm = StatusConfirm {
            status,
            var_id: request.var_id,
        };
        guard.fill_slot(&mut desc, &to_vec(&confirm)?)?;
        guard.create_conf.push(desc)?;
    }

    // update
    while let Some(mut desc) = guard.update_req.pop() {
        let request: UpdateRequest = parse_primitive(guard.slot_bytes(&desc)?)?;
        let status = ctx
            .engine
            .lock()
            .handle_update(request.var_id, request.value.as_slice());
        let confirm = StatusConfirm {
            status,
            var_id: request.var_id,
        };
        guard.fill_slot(&mut desc, &to_vec(&confirm)?)?;
        guard.update_conf.push(desc)?;
    }

    // delete
    while let Some(mut desc) = guard.delete_req.pop() {
        let request: DeleteRequest = parse_primitive(guard.slot_bytes(&desc)?)?;
        let status = ctx.engine.lock().handle_delete(request.var_id);
        let confirm = StatusConfirm {
            status,
            var_id: request.var_id,
        };
        guard.fill_slot(&mut desc, &to_vec(&confirm)?)?;
        guard.delete_conf.push(desc)?;
    }

    // read
    while let Some(mut desc) = guard.read_req.pop() {
        let request: ReadRequest = parse_primitive(guard.slot_bytes(&desc)?)?;
        let confirm = match ctx.engine.lock().handle_read(request.var_id) {
            Ok((value, tstamp_ms)) => ReadConfirm {
                status: VarsStatus::Ok,
                var_id: request.var_id,
                tstamp_ms,
                value: VarValue::new(value),
            },
            Err(status) => ReadConfirm {
                status,
                var_id: request.var_id,
                tstamp_ms: 0,
                value: VarValue::default(),
            },
        };
        guard.fill_slot(&mut desc, &to_vec(&confirm)?)?;
        guard.read_conf.push(desc)?;
    }

    Ok(())
}

// ------------------------------------------------------------------ command

fn command_loop(ctx: Arc<VarsContext>, listener: UnixListener) {
    tracing::debug!("command server running");
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();
    while !ctx.exit_requested() {
        handlers.retain(|h| !h.is_finished());
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = Arc::clone(&ctx);
                handlers.push(spawn_named("var-handler", move || {
                    if let Err(e) = serve_connection(&ctx, stream) {
                        ctx.escalate("command connection", &e);
                    }
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                ctx.escalate("command accept", &VarsError::Socket(e));
                break;
            }
        }
    }
    for handler in handlers {
        let _ = handler.join();
    }
    tracing::debug!("command server stopped");
}

fn serve_connection(ctx: &VarsContext, stream: UnixStream) -> Result<(), VarsError> {
    let mut stream = stream;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(ctx.config.command_timeout))?;

    loop {
        let body = match read_frame(&mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(VarsError::Socket(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                if ctx.exit_requested() {
                    return Ok(());
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        let request = VarsRequest::decode(&body)?;
        tracing::trace!(?request, "handling management request");
        match handle_request(ctx, &request)? {
            Some(reply) => write_frame(&mut stream, &reply)?,
            None => return Ok(()),
        }
    }
}

fn handle_request(ctx: &VarsContext, request: &VarsRequest) -> Result<Option<Vec<u8>>, VarsError> {
    let node = ctx.config.node_id;
    let reply = match request {
        VarsRequest::RegisterClient { name, shm_path } => {
            let status = register_client(ctx, name, shm_path);
            encode_confirm(
                SVC_REGISTER_CLIENT,
                &VarsSimpleConfirm {
                    status,
                    own_node_id: node,
                },
            )?
        }
        VarsRequest::DeregisterClient { name } => {
            let mut clients = ctx.clients.lock();
            let before = clients.len();
            clients.retain(|c| c.name != *name);
            let status = if clients.len() == before {
                VarsStatus::Internal
            } else {
                VarsStatus::Ok
            };
            encode_confirm(
                SVC_DEREGISTER_CLIENT,
                &VarsSimpleConfirm {
                    status,
                    own_node_id: node,
                },
            )?
        }
        VarsRequest::Activate => {
            ctx.engine.lock().active = true;
            tracing::info!("daemon activated");
            encode_confirm(
                SVC_ACTIVATE,
                &VarsSimpleConfirm {
                    status: VarsStatus::Ok,
                    own_node_id: node,
                },
            )?
        }
        VarsRequest::Deactivate => {
            ctx.engine.lock().active = false;
            tracing::info!("daemon deactivated");
            encode_confirm(
                SVC_DEACTIVATE,
                &VarsSimpleConfirm {
                    status: VarsStatus::Ok,
                    own_node_id: node,
                },
            )?
        }
        VarsRequest::Shutdown => {
            tracing::info!("shutdown requested over command channel");
            ctx.request_exit();
            return Ok(None);
        }
        VarsRequest::GetStatistics => {
            let stats = ctx.engine.lock().stats;
            encode_confirm(
                SVC_GET_STATISTICS,
                &VarsStatisticsConfirm {
                    status: VarsStatus::Ok,
                    stats,
                },
            )?
        }
        VarsRequest::DescribeDatabase => {
            let variables = ctx.engine.lock().describe_database();
            encode_confirm(
                SVC_DESCRIBE_DATABASE,
                &DescribeDatabaseConfirm {
                    status: VarsStatus::Ok,
                    variables,
                },
            )?
        }
        VarsRequest::DescribeVariable(var_id) => {
            let detail = ctx.engine.lock().describe_variable(*var_id);
            let confirm = match detail {
                Some(detail) => DescribeVariableConfirm {
                    status: VarsStatus::Ok,
                    variable: Some(detail.snapshot),
                    value: detail.value,
                },
                None => DescribeVariableConfirm {
                    status: VarsStatus::VariableDoesNotExist,
                    variable: None,
                    value: Vec::new(),
                },
            };
            encode_confirm(SVC_DESCRIBE_VARIABLE, &confirm)?
        }
    };
    Ok(Some(reply))
}

fn register_client(ctx: &VarsContext, name: &str, shm_path: &str) -> VarsStatus {
    let pool = match BufferPool::<VarsClientSegment>::open(std::path::Path::new(shm_path)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(name, error = %e, "cannot attach to client pool");
            return VarsStatus::Internal;
        }
    };
    if pool.slot_count() != VARS_CLIENT_SLOT_COUNT {
        tracing::error!(name, "client pool geometry mismatch");
        return VarsStatus::Internal;
    }
    let mut clients = ctx.clients.lock();
    if clients.iter().any(|c| c.name == name) {
        return VarsStatus::Internal;
    }
    tracing::info!(name, "registered database client");
    clients.push(RegisteredClient {
        name: name.to_owned(),
        pool,
    });
    VarsStatus::Ok
}
