use flock_beacon::receive::{handle_frame, FrameOutcome};
use flock_beacon::testing::test_pool_path;
use flock_beacon::{
    BeaconConfig, ClientRegistry, ClientSegment, DaemonStats, QueueingMode, RxFrame,
    CLIENT_SLOT_COUNT,
};
use flock_proto::{to_vec, BeaconHeader, NodeId, PayloadHeader, ProtocolId, WireSerialize};
use flock_shm::BufferPool;
use std::time::{Duration, Instant};

const T: Duration = Duration::from_millis(200);

fn config() -> BeaconConfig {
    BeaconConfig {
        node_id: NodeId([9, 9, 9, 9, 9, 9]),
        ..BeaconConfig::default()
    }
}

fn beacon_frame(sender: NodeId, payloads: &[(u16, &[u8])], seqno: u32) -> Vec<u8> {
    let mut body = Vec::new();
    for (proto, bytes) in payloads {
        PayloadHeader {
            protocol: ProtocolId(*proto),
            length: bytes.len() as u16,
        }
        .serialize(&mut body)
        .unwrap();
        body.extend_from_slice(bytes);
    }
    let header = BeaconHeader::new(sender, body.len() as u16, payloads.len() as u8, seqno);
    let mut frame = to_vec(&header).unwrap();
    frame.extend_from_slice(&body);
    frame
}

fn rx(config: &BeaconConfig, payload: Vec<u8>) -> RxFrame {
    RxFrame {
        src: NodeId([2; 6]),
        dst: NodeId::BROADCAST,
        ether_type: config.ether_type,
        payload,
    }
}

fn registered_registry(
    config: &BeaconConfig,
    proto: u16,
    tag: &str,
) -> (ClientRegistry, BufferPool<ClientSegment>) {
    let path = test_pool_path(tag);
    let pool = BufferPool::create(&path, CLIENT_SLOT_COUNT, 1600).unwrap();
    let mut registry = ClientRegistry::new();
    registry
        .register(
            config,
            ProtocolId(proto),
            "test",
            1000,
            QueueingMode::Once,
            false,
            false,
            &path,
            Instant::now(),
        )
        .unwrap();
    (registry, pool)
}

#[test]
fn payload_lands_in_client_pool() {
    let config = config();
    let (mut registry, pool) = registered_registry(&config, 42, "land");
    let mut stats = DaemonStats::default();

    let frame = beacon_frame(NodeId([2; 6]), &[(42, b"hello")], 1);
    let outcome = handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0);
    assert_eq!(outcome, FrameOutcome::Accepted);

    let mut guard = pool.lock(T).unwrap();
    let desc = guard.rx_indication.pop().unwrap();
    assert_eq!(guard.slot_bytes(&desc).unwrap(), b"hello");
    assert_eq!(stats.beacons_received, 1);
    assert_eq!(
        registry.get(ProtocolId(42)).unwrap().stats.received_payloads,
        1
    );
}

#[test]
fn wrong_ethertype_or_destination_is_filtered() {
    let config = config();
    let mut registry = ClientRegistry::new();
    let mut stats = DaemonStats::default();
    let frame = beacon_frame(NodeId([2; 6]), &[], 0);

    let mut f = rx(&config, frame.clone());
    f.ether_type = 0x0800;
    assert_eq!(
        handle_frame(&config, &mut registry, &mut stats, &f, 0),
        FrameOutcome::Filtered
    );

    let mut f = rx(&config, frame);
    f.dst = NodeId([1; 6]);
    assert_eq!(
        handle_frame(&config, &mut registry, &mut stats, &f, 0),
        FrameOutcome::Filtered
    );
    assert_eq!(stats.beacons_received, 0);
}

#[test]
fn own_sender_id_drops_frame() {
    let config = config();
    let (mut registry, pool) = registered_registry(&config, 42, "own");
    let mut stats = DaemonStats::default();

    let frame = beacon_frame(config.node_id, &[(42, b"loopback")], 3);
    let outcome = handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0);
    assert_eq!(outcome, FrameOutcome::Malformed);
    assert!(pool.lock(T).unwrap().rx_indication.is_empty());
    assert_eq!(stats.malformed_frames, 1);
    assert_eq!(stats.beacons_received, 0);
}

#[test]
fn bad_magic_or_version_drops_frame() {
    let config = config();
    let (mut registry, _pool) = registered_registry(&config, 42, "magic");
    let mut stats = DaemonStats::default();

    let mut frame = beacon_frame(NodeId([2; 6]), &[(42, b"x")], 0);
    frame[0] = 0x00; // corrupt the magic
    assert_eq!(
        handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0),
        FrameOutcome::Malformed
    );

    let mut frame = beacon_frame(NodeId([2; 6]), &[(42, b"x")], 0);
    frame[2] = 99; // corrupt the version
    assert_eq!(
        handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0),
        FrameOutcome::Malformed
    );
    assert_eq!(stats.malformed_frames, 2);
}

#[test]
fn length_exceeding_frame_drops_frame() {
    let config = config();
    let (mut registry, _pool) = registered_registry(&config, 42, "len");
    let mut stats = DaemonStats::default();

    let mut frame = beacon_frame(NodeId([2; 6]), &[(42, b"abc")], 0);
    // inflate the advertised length beyond the actual frame
    frame[9] = 0xff;
    frame[10] = 0xff;
    assert_eq!(
        handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0),
        FrameOutcome::Malformed
    );
}

#[test]
fn unknown_protocol_payload_is_skipped_others_delivered() {
    let config = config();
    let (mut registry, pool) = registered_registry(&config, 42, "skip");
    let mut stats = DaemonStats::default();

    let frame = beacon_frame(
        NodeId([2; 6]),
        &[(77, b"not-for-us"), (42, b"for-us")],
        0,
    );
    let outcome = handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0);
    assert_eq!(outcome, FrameOutcome::Accepted);

    let mut guard = pool.lock(T).unwrap();
    let desc = guard.rx_indication.pop().unwrap();
    assert_eq!(guard.slot_bytes(&desc).unwrap(), b"for-us");
    assert!(guard.rx_indication.is_empty());
}

#[test]
fn exhausted_free_list_counts_incoming_drop() {
    let config = config();
    let (mut registry, pool) = registered_registry(&config, 42, "exhaust");
    let mut stats = DaemonStats::default();

    // drain the free list so delivery cannot allocate a slot
    {
        let mut guard = pool.lock(T).unwrap();
        while guard.free.pop().is_some() {}
    }

    let frame = beacon_frame(NodeId([2; 6]), &[(42, b"nowhere-to-go")], 0);
    handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0);
    assert_eq!(
        registry
            .get(ProtocolId(42))
            .unwrap()
            .stats
            .dropped_incoming_payloads,
        1
    );
}

#[test]
fn truncated_payload_header_aborts_rest_of_frame() {
    let config = config();
    let (mut registry, pool) = registered_registry(&config, 42, "trunc");
    let mut stats = DaemonStats::default();

    // one good payload, then a header that claims more than remains
    let mut body = Vec::new();
    PayloadHeader {
        protocol: ProtocolId(42),
        length: 4,
    }
    .serialize(&mut body)
    .unwrap();
    body.extend_from_slice(b"good");
    PayloadHeader {
        protocol: ProtocolId(42),
        length: 500,
    }
    .serialize(&mut body)
    .unwrap();
    body.extend_from_slice(b"short");
    let header = BeaconHeader::new(NodeId([2; 6]), body.len() as u16, 2, 0);
    let mut frame = to_vec(&header).unwrap();
    frame.extend_from_slice(&body);

    let outcome = handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 0);
    assert_eq!(outcome, FrameOutcome::Accepted);

    let mut guard = pool.lock(T).unwrap();
    let desc = guard.rx_indication.pop().unwrap();
    assert_eq!(guard.slot_bytes(&desc).unwrap(), b"good");
    assert!(guard.rx_indication.is_empty(), "second payload aborted");
}

#[test]
fn ewma_bootstraps_then_mixes() {
    let mut config = config();
    config.size_ewma_alpha = 0.5;
    config.gap_ewma_alpha = 0.5;
    let mut registry = ClientRegistry::new();
    let mut stats = DaemonStats::default();

    let frame = beacon_frame(NodeId([2; 6]), &[], 0);
    let len = frame.len() as f64;

    handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame.clone()), 1000);
    assert_eq!(stats.avg_beacon_size, len, "first sample bootstraps");
    assert_eq!(stats.avg_inter_beacon_ms, 0.0);

    handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame.clone()), 1100);
    assert_eq!(stats.avg_inter_beacon_ms, 100.0, "first gap bootstraps");

    handle_frame(&config, &mut registry, &mut stats, &rx(&config, frame), 1300);
    assert_eq!(stats.avg_inter_beacon_ms, 0.5 * 100.0 + 0.5 * 200.0);
    assert_eq!(stats.beacons_received, 3);
}
