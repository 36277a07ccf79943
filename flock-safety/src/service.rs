//! Safety-report drivers: own-report transmission and neighbour intake.

use crate::neighbour::NeighbourTable;
use crate::{Result, SafetyError};
use flock_proto::safety::SafetyReport;
use flock_proto::{from_slice, to_vec, Clock, NodeId};
use flock_shm::FiniteQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Seam to the beacon daemon: the safety protocol only broadcasts its
/// current report and consumes delivered payloads.
pub trait ReportLink: Send + Sync {
    /// Replaces the payload carried in upcoming beacons.
    fn publish(&self, payload: &[u8]) -> Result<()>;

    /// Next payload delivered for this protocol, if any arrives in time.
    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub node_id: NodeId,
    /// Pace of own-report publication.
    pub report_period: Duration,
    /// Own reports older than this are not published (the application
    /// stopped feeding us, better to fall silent than to lie).
    pub keepalive_timeout: Duration,
    /// Neighbours unheard for this long are aged out.
    pub neighbour_timeout: Duration,
    /// Smoothing of the per-neighbour seqno-gap estimator.
    pub gap_ewma_alpha: f64,
    /// Capacity of the inbound report queue towards the application.
    pub inbound_queue_len: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            node_id: NodeId::NULL,
            report_period: Duration::from_millis(100),
            keepalive_timeout: Duration::from_millis(500),
            neighbour_timeout: Duration::from_secs(3),
            gap_ewma_alpha: 0.9,
            inbound_queue_len: 32,
        }
    }
}

struct OwnReport {
    report: SafetyReport,
    written_at_ms: i64,
    valid: bool,
    next_seqno: u32,
}

struct ServiceShared {
    config: SafetyConfig,
    clock: Clock,
    link: Arc<dyn ReportLink>,
    table: Mutex<NeighbourTable>,
    own: Mutex<OwnReport>,
    exit: AtomicBool,
    // the queue lives in one slab owned by the service; views are cheap
    _inbound_mem: Box<[u8]>,
    inbound: FiniteQueue,
}

/// The running safety service: a transmit driver publishing the own report
/// each period and a receive driver feeding the neighbour table plus an
/// inbound queue for the application.
pub struct SafetyService {
    shared: Arc<ServiceShared>,
    threads: Vec<JoinHandle<()>>,
}

impl SafetyService {
    pub fn start(
        config: SafetyConfig,
        link: Arc<dyn ReportLink>,
        clock: Clock,
    ) -> Result<SafetyService> {
        if config.node_id == NodeId::NULL {
            return Err(SafetyError::Config("node id must be set".into()));
        }
        let table = NeighbourTable::new(config.gap_ewma_alpha)?;

        let queue_len = FiniteQueue::required_size(
            config.inbound_queue_len,
            SafetyReport::WIRE_SIZE,
        );
        let mut inbound_mem = vec![0u8; queue_len].into_boxed_slice();
        let inbound = unsafe {
            FiniteQueue::init_at(
                inbound_mem.as_mut_ptr(),
                inbound_mem.len(),
                config.inbound_queue_len,
                SafetyReport::WIRE_SIZE,
            )?
        };

        let shared = Arc::new(ServiceShared {
            config,
            clock,
            link,
            table: Mutex::new(table),
            own: Mutex::new(OwnReport {
                report: SafetyReport::default(),
                written_at_ms: 0,
                valid: false,
                next_seqno: 0,
            }),
            exit: AtomicBool::new(false),
            _inbound_mem: inbound_mem,
            inbound,
        });

        let threads = vec![
            spawn_named("sfy-transmit", {
                let shared = Arc::clone(&shared);
                move || transmit_loop(shared)
            }),
            spawn_named("sfy-receive", {
                let shared = Arc::clone(&shared);
                move || receive_loop(shared)
            }),
        ];

        Ok(SafetyService { shared, threads })
    }

    /// Feeds fresh own state; picked up by the next publication round.
    pub fn write_own_report(&self, position: [i32; 3], velocity: [i16; 3]) {
        let mut own = self.shared.own.lock();
        own.report = SafetyReport {
            node: self.shared.config.node_id,
            seqno: own.next_seqno,
            position,
            velocity,
        };
        own.written_at_ms = self.shared.clock.now_system_ms();
        own.valid = true;
    }

    /// Current neighbour snapshot, ascending by node id.
    pub fn neighbours(&self) -> Vec<crate::neighbour::NeighbourState> {
        self.shared.table.lock().snapshot()
    }

    /// Next received report, waiting up to `timeout`.
    pub fn next_report(&self, timeout: Duration) -> Result<Option<SafetyReport>> {
        match self.shared.inbound.pop_wait(timeout) {
            Ok(bytes) => Ok(Some(from_slice(&bytes)?)),
            Err(flock_shm::ShmError::Timeout) => Ok(None),
            Err(e) => Err(SafetyError::Shm(e)),
        }
    }

    pub fn stop(&mut self) {
        self.shared.exit.store(true, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SafetyService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .expect("spawning a service thread cannot fail")
}

fn transmit_loop(shared: Arc<ServiceShared>) {
    tracing::debug!("safety transmit driver running");
    while !shared.exit.load(Ordering::Relaxed) {
        std::thread::sleep(shared.config.report_period);
        if shared.exit.load(Ordering::Relaxed) {
            break;
        }

        let now_ms = shared.clock.now_system_ms();
        let payload = {
            let mut own = shared.own.lock();
            if !own.valid {
                continue;
            }
            let age = now_ms.saturating_sub(own.written_at_ms);
            if age as u128 > shared.config.keepalive_timeout.as_millis() {
                // state went stale, fall silent until the application writes
                continue;
            }
            own.report.seqno = own.next_seqno;
            own.next_seqno = own.next_seqno.wrapping_add(1);
            match to_vec(&own.report) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "own report failed to serialize");
                    continue;
                }
            }
        };

        if let Err(e) = shared.link.publish(&payload) {
            tracing::warn!(error = %e, "could not publish safety report");
        }

        // piggyback the age-out scan on the transmit pace
        let cutoff = now_ms - shared.config.neighbour_timeout.as_millis() as i64;
        if let Err(e) = shared.table.lock().purge_stale(cutoff) {
            tracing::error!(error = %e, "neighbour purge failed");
        }
    }
    tracing::debug!("safety transmit driver stopped");
}

fn receive_loop(shared: Arc<ServiceShared>) {
    tracing::debug!("safety receive driver running");
    while !shared.exit.load(Ordering::Relaxed) {
        let payload = match shared.link.receive(Duration::from_millis(300)) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "report reception failed");
                continue;
            }
        };

        let report: SafetyReport = match from_slice(&payload) {
            Ok(report) => report,
            Err(e) => {
                tracing::debug!(error = %e, "malformed safety report dropped");
                continue;
            }
        };
        if report.node == shared.config.node_id {
            continue;
        }

        let now_ms = shared.clock.now_system_ms();
        match shared.table.lock().observe(report, now_ms) {
            Ok(()) => {}
            Err(SafetyError::TableFull) => {
                tracing::warn!(node = %report.node, "neighbour table full, report dropped");
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "neighbour table update failed");
                continue;
            }
        }

        // non-blocking towards the application; a slow consumer loses the
        // oldest news, not the newest
        match push_inbound(&shared, &payload) {
            Ok(()) => {}
            Err(e) => tracing::debug!(error = %e, "inbound queue rejected report"),
        }
    }
    tracing::debug!("safety receive driver stopped");
}

fn push_inbound(shared: &ServiceShared, payload: &[u8]) -> Result<()> {
    let timeout = Duration::from_millis(20);
    if !shared.inbound.try_push(payload, timeout)? {
        let _ = shared.inbound.try_pop(timeout)?;
        shared.inbound.try_push(payload, timeout)?;
    }
    Ok(())
}
