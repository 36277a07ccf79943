//! The beacon daemon: four long-lived threads over a shared context.

use crate::collector::collect_client;
use crate::command::{
    encode_confirm, read_frame, write_frame, ListConfirm, ProtocolDescription, QueryBufferedConfirm,
    RegisterConfirm, Request, SimpleConfirm, StatisticsConfirm,
};
use crate::config::BeaconConfig;
use crate::error::{BeaconError, BeaconStatus};
use crate::medium::Medium;
use crate::receive::handle_frame;
use crate::registry::ClientRegistry;
use crate::stats::DaemonStats;
use crate::transmit::{assemble_beacon, next_beacon_gap};
use flock_proto::{Clock, NodeId};
use flock_shm::LONG_LOCK_TIMEOUT;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// State shared by all daemon threads.
pub struct DaemonContext {
    pub config: BeaconConfig,
    pub registry: Mutex<ClientRegistry>,
    pub stats: Mutex<DaemonStats>,
    pub medium: Arc<dyn Medium>,
    pub clock: Clock,
    /// Raised for clean shutdown; every loop checks it each iteration.
    pub exit: AtomicBool,
    /// Payload intake and beacon generation run only while active.
    pub active: AtomicBool,
    seqno: AtomicU32,
}

impl DaemonContext {
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Relaxed)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Raises the exit flag on fatal errors, returns whether it did.
    fn escalate(&self, context: &str, error: &BeaconError) -> bool {
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

/// Handle for a started daemon; joins its threads on `shutdown`.
pub struct BeaconDaemon {
    pub ctx: Arc<DaemonContext>,
    threads: Vec<JoinHandle<()>>,
    socket_path: std::path::PathBuf,
}

impl BeaconDaemon {
    /// Validates the configuration, binds the command socket and spawns the
    /// command server, transmit scheduler, receive sniffer and payload
    /// collector threads. The daemon starts inactive.
    pub fn start(
        config: BeaconConfig,
        medium: Arc<dyn Medium>,
        clock: Clock,
    ) -> Result<BeaconDaemon, BeaconError> {
        config.validate()?;
        let socket_path = config.socket_path.clone();
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let ctx = Arc::new(DaemonContext {
            config,
            registry: Mutex::new(ClientRegistry::new()),
            stats: Mutex::new(DaemonStats::default()),
            medium,
            clock,
            exit: AtomicBool::new(false),
            active: AtomicBool::new(false),
            seqno: AtomicU32::new(0),
        });

        tracing::info!(node = %ctx.config.node_id, "starting beacon daemon");

        let threads = vec![
            spawn_named("bcn-command", {
                let ctx = Arc::clone(&ctx);
                move || command_loop(ctx, listener)
            }),
            spawn_named("bcn-transmit", {
                let ctx = Arc::clone(&ctx);
                move || transmit_loop(ctx)
            }),
            spawn_named("bcn-receive", {
                let ctx = Arc::clone(&ctx);
                move || receive_loop(ctx)
            }),
            spawn_named("bcn-collect", {
                let ctx = Arc::clone(&ctx);
                move || collector_loop(ctx)
            }),
        ];

        Ok(BeaconDaemon {
            ctx,
            threads,
            socket_path,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.ctx.config.node_id
    }

    /// Raises the exit flag and joins all threads.
    pub fn shutdown(&mut self) {
        self.ctx.request_exit();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(node = %self.ctx.config.node_id, "beacon daemon stopped");
    }

    /// Blocks until the daemon exits on its own (e.g. a Shutdown command).
    pub fn wait(&mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for BeaconDaemon {
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

// ---------------------------------------------------------------- transmit

fn transmit_loop(ctx: Arc<DaemonContext>) {
    tracing::debug!("transmit scheduler running");
    let mut rng = StdRng::from_entropy();

    while !ctx.exit_requested() {
        let gap = next_beacon_gap(&ctx.config, &mut rng);
        sleep_checking_exit(&ctx, gap);
        if ctx.exit_requested() {
            break;
        }
        if !ctx.is_active() {
            continue;
        }

        let seqno = ctx.seqno.load(Ordering::Relaxed);
        let frame = {
            let mut registry = ctx.registry.lock();
            assemble_beacon(&ctx.config, &mut registry, seqno)
        };
        match frame {
            Ok(Some(frame)) => {
                if let Err(e) = ctx.medium.send(ctx.config.ether_type, &frame) {
                    ctx.escalate("beacon transmission", &e);
                    continue;
                }
                ctx.seqno.fetch_add(1, Ordering::Relaxed);
                ctx.stats.lock().beacons_sent += 1;
            }
            Ok(None) => {}
            Err(e) => {
                ctx.escalate("beacon assembly", &BeaconError::Shm(e));
            }
        }
    }
    tracing::debug!("transmit scheduler stopped");
}

fn sleep_checking_exit(ctx: &DaemonContext, total: Duration) {
    let step = Duration::from_millis(20);
    let mut remaining = total;
    while remaining > Duration::ZERO && !ctx.exit_requested() {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining = remaining.saturating_sub(chunk);
    }
}

// ----------------------------------------------------------------- receive

fn receive_loop(ctx: Arc<DaemonContext>) {
    tracing::debug!("receive sniffer running");
    while !ctx.exit_requested() {
        match ctx.medium.recv(ctx.config.sniffer_timeout) {
            Ok(Some(frame)) => {
                if !ctx.is_active() {
                    continue;
                }
                let now_ms = ctx.clock.now_system_ms();
                let mut registry = ctx.registry.lock();
                let mut stats = ctx.stats.lock();
                handle_frame(&ctx.config, &mut registry, &mut stats, &frame, now_ms);
            }
            Ok(None) => {}
            Err(e) => {
                if ctx.escalate("frame capture", &e) {
                    break;
                }
            }
        }
    }
    tracing::debug!("receive sniffer stopped");
}

// --------------------------------------------------------------- collector

fn collector_loop(ctx: Arc<DaemonContext>) {
    tracing::debug!("payload collector running");
    while !ctx.exit_requested() {
        if ctx.is_active() {
            let mut registry = ctx.registry.lock();
            for client in registry.iter_mut() {
                if let Err(e) = collect_client(client) {
                    if ctx.escalate("payload collection", &BeaconError::Shm(e)) {
                        return;
                    }
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    tracing::debug!("payload collector stopped");
}

// ----------------------------------------------------------------- command

fn command_loop(ctx: Arc<DaemonContext>, listener: UnixListener) {
    tracing::debug!("command server running");
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();
    while !ctx.exit_requested() {
        handlers.retain(|h| !h.is_finished());
        match listener.accept() {
            Ok((stream, _)) => {
                // transient per-connection handler
                let ctx = Arc::clone(&ctx);
                handlers.push(spawn_named("bcn-handler", move || {
                    if let Err(e) = serve_connection(&ctx, stream) {
                        ctx.escalate("command connection", &e);
                    }
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                ctx.escalate("command accept", &BeaconError::Socket(e));
                break;
            }
        }
    }
    for handler in handlers {
        let _ = handler.join();
    }
    tracing::debug!("command server stopped");
}

fn serve_connection(ctx: &DaemonContext, stream: UnixStream) -> Result<(), BeaconError> {
    let mut stream = stream;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(ctx.config.command_timeout))?;

    loop {
        let body = match read_frame(&mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(()),
            Err(BeaconError::Socket(e))
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

        let request = Request::decode(&body)?;
        tracing::trace!(?request, "handling management request");
        match handle_request(ctx, &request)? {
            Some(reply) => write_frame(&mut stream, &reply)?,
            // Shutdown tears the endpoint down before any reply
            None => return Ok(()),
        }
    }
}

fn handle_request(ctx: &DaemonContext, request: &Request) -> Result<Option<Vec<u8>>, BeaconError> {
    use crate::command::{
        SVC_ACTIVATE, SVC_CLEAR_BUFFER, SVC_DEACTIVATE, SVC_DEREGISTER, SVC_GET_STATISTICS,
        SVC_LIST_PROTOCOLS, SVC_QUERY_BUFFERED, SVC_REGISTER,
    };

    let reply = match request {
        Request::Register(req) => {
            let mut registry = ctx.registry.lock();
            let confirm = match registry.register(
                &ctx.config,
                req.protocol_id,
                &req.name,
                req.max_payload_size,
                req.mode,
                req.allow_multiple_payloads,
                req.wants_tx_confirms,
                std::path::Path::new(&req.shm_path),
                ctx.clock.now_instant(),
            ) {
                Ok(node) => RegisterConfirm {
                    status: BeaconStatus::Ok,
                    own_node_id: node,
                },
                Err(status) => RegisterConfirm {
                    status,
                    own_node_id: NodeId::NULL,
                },
            };
            encode_confirm(SVC_REGISTER, &confirm)?
        }
        Request::Deregister(id) => {
            let mut registry = ctx.registry.lock();
            let status = match registry.deregister(*id) {
                Ok(()) => BeaconStatus::Ok,
                Err(status) => status,
            };
            encode_confirm(SVC_DEREGISTER, &SimpleConfirm { status })?
        }
        Request::ListProtocols => {
            let registry = ctx.registry.lock();
            let confirm = ListConfirm {
                status: BeaconStatus::Ok,
                active: ctx.is_active(),
                protocols: registry
                    .iter()
                    .map(|c| ProtocolDescription {
                        protocol_id: c.protocol_id,
                        name: c.name.clone(),
                        max_payload_size: c.max_payload_size,
                        mode: c.mode,
                        allow_multiple_payloads: c.allow_multiple_payloads,
                        stats: c.stats,
                    })
                    .collect(),
            };
            encode_confirm(SVC_LIST_PROTOCOLS, &confirm)?
        }
        Request::ClearBuffer(id) => {
            let mut registry = ctx.registry.lock();
            let status = match registry.get_mut(*id) {
                Some(client) => match client.pool.lock(LONG_LOCK_TIMEOUT) {
                    Ok(mut guard) => match guard.clear_holding_area() {
                        Ok(()) => BeaconStatus::Ok,
                        Err(_) => BeaconStatus::Internal,
                    },
                    Err(_) => BeaconStatus::Internal,
                },
                None => BeaconStatus::UnknownProtocol,
            };
            encode_confirm(SVC_CLEAR_BUFFER, &SimpleConfirm { status })?
        }
        Request::QueryBuffered(id) => {
            let mut registry = ctx.registry.lock();
            let confirm = match registry.get_mut(*id) {
                Some(client) => match client.pool.lock(LONG_LOCK_TIMEOUT) {
                    Ok(guard) => QueryBufferedConfirm {
                        status: BeaconStatus::Ok,
                        buffered_payloads: guard.buffered_payloads() as u32,
                    },
                    Err(_) => QueryBufferedConfirm {
                        status: BeaconStatus::Internal,
                        buffered_payloads: 0,
                    },
                },
                None => QueryBufferedConfirm {
                    status: BeaconStatus::UnknownProtocol,
                    buffered_payloads: 0,
                },
            };
            encode_confirm(SVC_QUERY_BUFFERED, &confirm)?
        }
        Request::Activate => {
            ctx.active.store(true, Ordering::Relaxed);
            tracing::info!("daemon activated");
            encode_confirm(SVC_ACTIVATE, &SimpleConfirm { status: BeaconStatus::Ok })?
        }
        Request::Deactivate => {
            ctx.active.store(false, Ordering::Relaxed);
            tracing::info!("daemon deactivated");
            encode_confirm(SVC_DEACTIVATE, &SimpleConfirm { status: BeaconStatus::Ok })?
        }
        Request::Shutdown => {
            tracing::info!("shutdown requested over command channel");
            ctx.request_exit();
            return Ok(None);
        }
        Request::GetStatistics => {
            let stats = *ctx.stats.lock();
            encode_confirm(SVC_GET_STATISTICS, &StatisticsConfirm::from_stats(&stats))?
        }
    };
    Ok(Some(reply))
}
