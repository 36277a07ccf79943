use flock_beacon::command::{
    decode_confirm, read_frame, write_frame, QueryBufferedConfirm, RegisterConfirm, Request,
    SimpleConfirm, StatisticsConfirm, SVC_ACTIVATE, SVC_GET_STATISTICS, SVC_QUERY_BUFFERED,
    SVC_REGISTER,
};
use flock_beacon::testing::{test_pool_path, test_socket_path, VirtualAir};
use flock_beacon::{
    BeaconConfig, BeaconDaemon, BeaconStatus, ClientSegment, QueueingMode, CLIENT_SLOT_COUNT,
};
use flock_proto::{NodeId, ProtocolId, SystemTimeProvider};
use flock_shm::BufferPool;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

const T: Duration = Duration::from_millis(500);

fn daemon(air: &Arc<VirtualAir>, node: u8, tag: &str) -> BeaconDaemon {
    let id = NodeId([node; 6]);
    let endpoint = air.join(id);
    let config = BeaconConfig {
        node_id: id,
        avg_beacon_period: Duration::from_millis(20),
        jitter_fraction: 0.1,
        socket_path: test_socket_path(tag),
        ..BeaconConfig::default()
    };
    BeaconDaemon::start(config, Arc::new(endpoint), Arc::new(SystemTimeProvider)).unwrap()
}

fn call(stream: &mut UnixStream, request: &Request) -> Vec<u8> {
    write_frame(stream, &request.encode().unwrap()).unwrap();
    read_frame(stream).unwrap().expect("confirm expected")
}

fn register_client(
    daemon: &BeaconDaemon,
    proto: u16,
    mode: QueueingMode,
    tag: &str,
) -> (UnixStream, BufferPool<ClientSegment>) {
    let pool_path = test_pool_path(tag);
    let pool: BufferPool<ClientSegment> =
        BufferPool::create(&pool_path, CLIENT_SLOT_COUNT, 1600).unwrap();

    let mut stream = UnixStream::connect(&daemon.ctx.config.socket_path).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let body = call(
        &mut stream,
        &Request::Register(flock_beacon::command::RegisterRequest {
            protocol_id: ProtocolId(proto),
            name: format!("test-{proto}"),
            max_payload_size: 1000,
            mode,
            allow_multiple_payloads: false,
            wants_tx_confirms: false,
            shm_path: pool_path.to_string_lossy().into_owned(),
        }),
    );
    let confirm: RegisterConfirm = decode_confirm(SVC_REGISTER, &body).unwrap();
    assert_eq!(confirm.status, BeaconStatus::Ok);
    assert_eq!(confirm.own_node_id, daemon.node_id());

    let body = call(&mut stream, &Request::Activate);
    let confirm: SimpleConfirm = decode_confirm(SVC_ACTIVATE, &body).unwrap();
    assert_eq!(confirm.status, BeaconStatus::Ok);

    (stream, pool)
}

fn submit(pool: &BufferPool<ClientSegment>, bytes: &[u8]) {
    let mut guard = pool.lock(T).unwrap();
    let mut desc = guard.free.pop().unwrap();
    guard.fill_slot(&mut desc, bytes).unwrap();
    guard.tx_request.push(desc).unwrap();
}

fn receive(pool: &BufferPool<ClientSegment>, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        {
            let mut guard = pool.lock(T).unwrap();
            if let Some(desc) = guard.rx_indication.pop() {
                let bytes = guard.slot_bytes(&desc).unwrap().to_vec();
                guard.release_slot(desc).unwrap();
                return Some(bytes);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn payload_travels_between_two_daemons() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 1, "travel-a");
    let mut bob = daemon(&air, 2, "travel-b");

    let (_stream_a, pool_a) = register_client(&alice, 0x0042, QueueingMode::Once, "travel-a");
    let (_stream_b, pool_b) = register_client(&bob, 0x0042, QueueingMode::Once, "travel-b");

    submit(&pool_a, b"over the air");
    let got = receive(&pool_b, Duration::from_secs(5)).expect("payload should arrive");
    assert_eq!(got, b"over the air");

    // traffic is one-way so far; nothing appeared at Alice
    assert!(receive(&pool_a, Duration::from_millis(100)).is_none());

    alice.shutdown();
    bob.shutdown();
}

#[test]
fn repeat_client_is_carried_in_every_beacon() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 3, "rep-a");
    let mut bob = daemon(&air, 4, "rep-b");

    let (_sa, pool_a) = register_client(&alice, 0x0007, QueueingMode::Repeat, "rep-a");
    let (_sb, pool_b) = register_client(&bob, 0x0007, QueueingMode::Once, "rep-b");

    submit(&pool_a, b"heartbeat");
    for _ in 0..3 {
        let got = receive(&pool_b, Duration::from_secs(5)).expect("repeat payload arrives again");
        assert_eq!(got, b"heartbeat");
    }

    alice.shutdown();
    bob.shutdown();
}

#[test]
fn query_buffered_counts_holding_area() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 5, "query");

    let (mut stream, pool) = register_client(
        &alice,
        0x0009,
        QueueingMode::DropTail { max_entries: 8 },
        "query",
    );

    // deactivate so the collector holds off and the scheduler does not drain
    let body = call(&mut stream, &Request::Deactivate);
    let _: SimpleConfirm = decode_confirm(flock_beacon::command::SVC_DEACTIVATE, &body).unwrap();

    submit(&pool, b"queued-1");
    submit(&pool, b"queued-2");

    // reactivate just the collector path long enough to pick them up
    let body = call(&mut stream, &Request::Activate);
    let _: SimpleConfirm = decode_confirm(SVC_ACTIVATE, &body).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let body = call(&mut stream, &Request::QueryBuffered(ProtocolId(0x0009)));
    let confirm: QueryBufferedConfirm = decode_confirm(SVC_QUERY_BUFFERED, &body).unwrap();
    assert_eq!(confirm.status, BeaconStatus::Ok);
    // payloads may already be leaving with beacons; at most two are pending
    assert!(confirm.buffered_payloads <= 2);

    alice.shutdown();
}

#[test]
fn statistics_reflect_sent_beacons() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 6, "stats-a");
    let mut bob = daemon(&air, 7, "stats-b");

    let (mut stream_a, pool_a) = register_client(&alice, 0x0010, QueueingMode::Repeat, "stats-a");
    let (_sb, pool_b) = register_client(&bob, 0x0010, QueueingMode::Once, "stats-b");

    submit(&pool_a, b"counted");
    assert!(receive(&pool_b, Duration::from_secs(5)).is_some());

    let body = call(&mut stream_a, &Request::GetStatistics);
    let stats: StatisticsConfirm = decode_confirm(SVC_GET_STATISTICS, &body).unwrap();
    assert!(stats.beacons_sent >= 1);

    alice.shutdown();
    bob.shutdown();
}

#[test]
fn shutdown_command_stops_the_daemon() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 8, "shutdown");

    let mut stream = UnixStream::connect(&alice.ctx.config.socket_path).unwrap();
    write_frame(&mut stream, &Request::Shutdown.encode().unwrap()).unwrap();

    // Shutdown returns no confirm; the daemon just exits.
    alice.wait();
    assert!(alice.ctx.exit_requested());
}

#[test]
fn inactive_daemon_emits_nothing() {
    let _ = tracing_subscriber::fmt::try_init();
    let air = VirtualAir::new();
    let mut alice = daemon(&air, 9, "silent-a");
    let mut bob = daemon(&air, 10, "silent-b");

    // register at Alice but never activate her
    let pool_path = test_pool_path("silent-a");
    let pool_a: BufferPool<ClientSegment> =
        BufferPool::create(&pool_path, CLIENT_SLOT_COUNT, 1600).unwrap();
    let mut stream = UnixStream::connect(&alice.ctx.config.socket_path).unwrap();
    let body = call(
        &mut stream,
        &Request::Register(flock_beacon::command::RegisterRequest {
            protocol_id: ProtocolId(0x0011),
            name: "silent".into(),
            max_payload_size: 1000,
            mode: QueueingMode::Repeat,
            allow_multiple_payloads: false,
            wants_tx_confirms: false,
            shm_path: pool_path.to_string_lossy().into_owned(),
        }),
    );
    let confirm: RegisterConfirm = decode_confirm(SVC_REGISTER, &body).unwrap();
    assert_eq!(confirm.status, BeaconStatus::Ok);

    let (_sb, pool_b) = register_client(&bob, 0x0011, QueueingMode::Once, "silent-b");

    submit(&pool_a, b"never sent");
    assert!(
        receive(&pool_b, Duration::from_millis(300)).is_none(),
        "inactive daemon must not beacon"
    );

    alice.shutdown();
    bob.shutdown();
}
