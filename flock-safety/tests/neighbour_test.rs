use flock_proto::safety::SafetyReport;
use flock_proto::NodeId;
use flock_safety::{NeighbourTable, SafetyError, MAX_NEIGHBOURS};

fn report(node: u8, seqno: u32) -> SafetyReport {
    SafetyReport {
        node: NodeId([node; 6]),
        seqno,
        position: [node as i32 * 10, 0, 0],
        velocity: [1, 0, 0],
    }
}

#[test]
fn observe_inserts_then_updates() {
    let mut table = NeighbourTable::new(0.5).unwrap();
    table.observe(report(1, 0), 100).unwrap();
    assert_eq!(table.len(), 1);

    let state = table.get(&NodeId([1; 6])).unwrap();
    assert_eq!(state.last_seqno, 0);
    assert_eq!(state.last_heard_ms, 100);

    table.observe(report(1, 1), 200).unwrap();
    assert_eq!(table.len(), 1);
    let state = table.get(&NodeId([1; 6])).unwrap();
    assert_eq!(state.last_seqno, 1);
    assert_eq!(state.last_heard_ms, 200);
    assert_eq!(state.report.position, [10, 0, 0]);
}

#[test]
fn gap_estimator_tracks_losses() {
    let mut table = NeighbourTable::new(0.5).unwrap();
    table.observe(report(1, 10), 0).unwrap();
    // next report skips two (gap 3): bootstrap takes the raw gap
    table.observe(report(1, 13), 1).unwrap();
    assert_eq!(table.get(&NodeId([1; 6])).unwrap().avg_seqno_gap, 3.0);
    // lossless reception pulls the average towards 1
    table.observe(report(1, 14), 2).unwrap();
    assert_eq!(table.get(&NodeId([1; 6])).unwrap().avg_seqno_gap, 2.0);
}

#[test]
fn snapshot_is_ordered_by_node_id() {
    let mut table = NeighbourTable::new(0.9).unwrap();
    for node in [9u8, 3, 200, 57] {
        table.observe(report(node, 0), 0).unwrap();
    }
    let ids: Vec<u8> = table.snapshot().iter().map(|s| s.report.node.0[0]).collect();
    assert_eq!(ids, vec![3, 9, 57, 200]);
}

#[test]
fn purge_removes_only_stale_neighbours() {
    let mut table = NeighbourTable::new(0.9).unwrap();
    table.observe(report(1, 0), 100).unwrap();
    table.observe(report(2, 0), 500).unwrap();
    table.observe(report(3, 0), 900).unwrap();

    let purged = table.purge_stale(600).unwrap();
    assert_eq!(purged, 2);
    assert_eq!(table.len(), 1);
    assert!(table.get(&NodeId([3; 6])).is_some());

    // a purged neighbour can come back
    table.observe(report(1, 5), 1000).unwrap();
    assert_eq!(table.len(), 2);
}

#[test]
fn table_rejects_overflow_but_keeps_known_neighbours_updatable() {
    let mut table = NeighbourTable::new(0.9).unwrap();
    for node in 0..MAX_NEIGHBOURS as u8 {
        table.observe(report(node, 0), 0).unwrap();
    }
    assert_eq!(table.len(), MAX_NEIGHBOURS);

    let err = table.observe(report(200, 0), 1).unwrap_err();
    assert!(matches!(err, SafetyError::TableFull));

    // an existing neighbour still updates at capacity
    table.observe(report(5, 7), 2).unwrap();
    assert_eq!(table.get(&NodeId([5; 6])).unwrap().last_seqno, 7);
}
