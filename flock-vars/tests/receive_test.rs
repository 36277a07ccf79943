use flock_beacon::time::ManualTimeProvider;
use flock_proto::{
    ContainerKind, NodeId, RepCount, VarCreate, VarDelete, VarDescription, VarId, VarReqCreate,
    VarReqUpdate, VarSeqno, VarSpec, VarSummary, VarUpdate, VarValue,
};
use flock_vars::{ProtocolData, VarsConfig};
use std::sync::Arc;
use std::time::Instant;

const OWN: NodeId = NodeId([1; 6]);
const PEER: NodeId = NodeId([2; 6]);

fn engine() -> ProtocolData {
    let config = VarsConfig {
        node_id: OWN,
        ..VarsConfig::default()
    };
    let clock = Arc::new(ManualTimeProvider::new(Instant::now(), 1_000));
    let mut engine = ProtocolData::new(&config, clock).unwrap();
    engine.active = true;
    engine
}

fn create_record(id: u8, producer: NodeId, rep: u8, seqno: u8, value: &[u8]) -> VarCreate {
    VarCreate {
        spec: VarSpec {
            var_id: VarId(id),
            producer,
            rep_count: RepCount(rep),
            description: VarDescription::new("remote"),
        },
        update: VarUpdate {
            var_id: VarId(id),
            seqno: VarSeqno(seqno),
            value: VarValue::new(value),
        },
    }
}

#[test]
fn remote_create_is_adopted() {
    let mut a = engine();
    a.apply_create(&create_record(10, PEER, 3, 5, &[0x2a]));

    let entry = a.store.entry(VarId(10)).unwrap();
    assert_eq!(entry.producer, PEER);
    assert_eq!(entry.seqno, VarSeqno(5));
    assert_eq!(entry.count_create, 3);
    assert_eq!(entry.count_update, 0);
    assert!(!entry.to_be_deleted);
    assert_eq!(a.store.value(VarId(10)).unwrap(), &[0x2a]);
    assert_eq!(a.queue_contents(ContainerKind::Creates), vec![VarId(10)]);
    assert_eq!(a.queue_contents(ContainerKind::Summaries), vec![VarId(10)]);
}

#[test]
fn create_rejects_invalid_records() {
    let mut a = engine();

    // own production cannot be overwritten from outside
    a.apply_create(&create_record(1, OWN, 3, 0, &[1]));
    assert!(!a.store.contains(VarId(1)));

    // rep count outside 1..=max
    a.apply_create(&create_record(2, PEER, 0, 0, &[1]));
    a.apply_create(&create_record(3, PEER, 16, 0, &[1]));
    assert!(!a.store.contains(VarId(2)));
    assert!(!a.store.contains(VarId(3)));

    // empty and oversized values
    a.apply_create(&create_record(4, PEER, 3, 0, &[]));
    a.apply_create(&create_record(5, PEER, 3, 0, &[0; 200]));
    assert!(!a.store.contains(VarId(4)));
    assert!(!a.store.contains(VarId(5)));

    // duplicate is ignored, original survives
    a.apply_create(&create_record(6, PEER, 3, 1, &[1]));
    a.apply_create(&create_record(6, PEER, 3, 9, &[9]));
    assert_eq!(a.store.entry(VarId(6)).unwrap().seqno, VarSeqno(1));
}

#[test]
fn remote_delete_freezes_and_schedules_tombstones() {
    let mut a = engine();
    a.apply_create(&create_record(10, PEER, 3, 0, &[1]));
    a.apply_delete(&VarDelete { var_id: VarId(10) });

    let entry = a.store.entry(VarId(10)).unwrap();
    assert!(entry.to_be_deleted);
    assert_eq!(entry.count_delete, 3);
    assert_eq!(entry.count_create, 0);
    assert_eq!(a.queue_contents(ContainerKind::Deletes), vec![VarId(10)]);
    assert!(a.queue_contents(ContainerKind::Creates).is_empty());
    assert!(a.queue_contents(ContainerKind::Summaries).is_empty());

    // a second delete is a no-op
    a.apply_delete(&VarDelete { var_id: VarId(10) });
    assert_eq!(a.queue_contents(ContainerKind::Deletes), vec![VarId(10)]);

    // updates for a dying variable are ignored
    a.apply_update(&VarUpdate {
        var_id: VarId(10),
        seqno: VarSeqno(9),
        value: VarValue::new([9]),
    });
    assert_eq!(a.store.entry(VarId(10)).unwrap().seqno, VarSeqno(0));
}

#[test]
fn delete_of_unknown_or_own_variable_is_ignored() {
    let mut a = engine();
    a.apply_delete(&VarDelete { var_id: VarId(50) });
    assert!(a.queue_contents(ContainerKind::Deletes).is_empty());

    a.handle_create(VarId(51), RepCount(2), "mine", &[1]);
    a.apply_delete(&VarDelete { var_id: VarId(51) });
    assert!(!a.store.entry(VarId(51)).unwrap().to_be_deleted);
}

#[test]
fn update_for_unknown_variable_requests_create() {
    let mut a = engine();
    a.apply_update(&VarUpdate {
        var_id: VarId(20),
        seqno: VarSeqno(4),
        value: VarValue::new([1]),
    });
    assert_eq!(a.queue_contents(ContainerKind::ReqCreates), vec![VarId(20)]);

    // no duplicate entries on repetition
    a.apply_update(&VarUpdate {
        var_id: VarId(20),
        seqno: VarSeqno(5),
        value: VarValue::new([2]),
    });
    assert_eq!(a.queue_contents(ContainerKind::ReqCreates), vec![VarId(20)]);
}

#[test]
fn newer_update_is_applied() {
    let mut a = engine();
    a.apply_create(&create_record(20, PEER, 3, 5, &[1]));
    a.apply_update(&VarUpdate {
        var_id: VarId(20),
        seqno: VarSeqno(7),
        value: VarValue::new([7, 7]),
    });

    let entry = a.store.entry(VarId(20)).unwrap();
    assert_eq!(entry.seqno, VarSeqno(7));
    assert_eq!(entry.count_update, 3);
    assert_eq!(a.store.value(VarId(20)).unwrap(), &[7, 7]);
    assert_eq!(a.queue_contents(ContainerKind::Updates), vec![VarId(20)]);
}

#[test]
fn stale_update_triggers_reeducation() {
    let mut a = engine();
    a.apply_create(&create_record(20, PEER, 3, 10, &[1]));
    a.apply_update(&VarUpdate {
        var_id: VarId(20),
        seqno: VarSeqno(8),
        value: VarValue::new([8]),
    });

    // value unchanged, but updates scheduled to teach the stale sender
    let entry = a.store.entry(VarId(20)).unwrap();
    assert_eq!(entry.seqno, VarSeqno(10));
    assert_eq!(a.store.value(VarId(20)).unwrap(), &[1]);
    assert_eq!(entry.count_update, 3);
    assert_eq!(a.queue_contents(ContainerKind::Updates), vec![VarId(20)]);
}

#[test]
fn equal_seqno_update_is_a_noop() {
    let mut a = engine();
    a.apply_create(&create_record(20, PEER, 3, 5, &[1]));
    a.apply_update(&VarUpdate {
        var_id: VarId(20),
        seqno: VarSeqno(5),
        value: VarValue::new([9]),
    });
    assert_eq!(a.store.value(VarId(20)).unwrap(), &[1]);
    assert!(a.queue_contents(ContainerKind::Updates).is_empty());
}

#[test]
fn update_clears_pending_request() {
    let mut a = engine();
    a.apply_create(&create_record(21, PEER, 3, 1, &[1]));
    // summary for a newer version queues a request
    a.apply_summary(&VarSummary {
        var_id: VarId(21),
        seqno: VarSeqno(3),
    });
    assert_eq!(a.queue_contents(ContainerKind::ReqUpdates), vec![VarId(21)]);

    // the update arriving satisfies the request
    a.apply_update(&VarUpdate {
        var_id: VarId(21),
        seqno: VarSeqno(3),
        value: VarValue::new([3]),
    });
    assert!(a.queue_contents(ContainerKind::ReqUpdates).is_empty());
}

#[test]
fn summary_branches() {
    let mut a = engine();

    // unknown: request a create
    a.apply_summary(&VarSummary {
        var_id: VarId(30),
        seqno: VarSeqno(7),
    });
    assert_eq!(a.queue_contents(ContainerKind::ReqCreates), vec![VarId(30)]);

    // known at same seqno: nothing happens
    a.apply_create(&create_record(31, PEER, 3, 5, &[1]));
    a.apply_summary(&VarSummary {
        var_id: VarId(31),
        seqno: VarSeqno(5),
    });
    assert!(a.queue_contents(ContainerKind::ReqUpdates).is_empty());

    // peer is newer: request an update
    a.apply_summary(&VarSummary {
        var_id: VarId(31),
        seqno: VarSeqno(7),
    });
    assert_eq!(a.queue_contents(ContainerKind::ReqUpdates), vec![VarId(31)]);

    // peer is older: schedule updates to teach it
    a.apply_create(&create_record(32, PEER, 3, 9, &[1]));
    a.apply_summary(&VarSummary {
        var_id: VarId(32),
        seqno: VarSeqno(2),
    });
    assert!(a.queue_contents(ContainerKind::Updates).contains(&VarId(32)));
    assert_eq!(a.store.entry(VarId(32)).unwrap().count_update, 3);
}

#[test]
fn req_update_schedules_updates_only_when_we_are_fresher() {
    let mut a = engine();
    a.apply_create(&create_record(40, PEER, 3, 8, &[1]));

    // requester already as fresh as us: ignored
    a.apply_req_update(&VarReqUpdate {
        var_id: VarId(40),
        seqno: VarSeqno(8),
    });
    assert!(a.queue_contents(ContainerKind::Updates).is_empty());

    a.apply_req_update(&VarReqUpdate {
        var_id: VarId(40),
        seqno: VarSeqno(9),
    });
    assert!(a.queue_contents(ContainerKind::Updates).is_empty());

    // requester lags: schedule updates
    a.apply_req_update(&VarReqUpdate {
        var_id: VarId(40),
        seqno: VarSeqno(2),
    });
    assert_eq!(a.queue_contents(ContainerKind::Updates), vec![VarId(40)]);
    assert_eq!(a.store.entry(VarId(40)).unwrap().count_update, 3);
}

#[test]
fn req_create_reschedules_creates() {
    let mut a = engine();
    a.handle_create(VarId(41), RepCount(2), "mine", &[1]);
    // drain the initial creates
    for _ in 0..2 {
        a.compose_payload(1000).unwrap();
    }
    assert!(a.queue_contents(ContainerKind::Creates).is_empty());

    a.apply_req_create(&VarReqCreate { var_id: VarId(41) });
    assert_eq!(a.queue_contents(ContainerKind::Creates), vec![VarId(41)]);
    assert_eq!(a.store.entry(VarId(41)).unwrap().count_create, 2);
}

#[test]
fn circular_seqno_wraparound_summary() {
    let mut a = engine();
    // we hold seqno 0 (freshly wrapped); a peer summary at 250 is stale
    a.apply_create(&create_record(60, PEER, 3, 0, &[1]));
    a.apply_summary(&VarSummary {
        var_id: VarId(60),
        seqno: VarSeqno(250),
    });
    assert!(
        a.queue_contents(ContainerKind::Updates).contains(&VarId(60)),
        "wrapped seqno 0 is fresher than 250, teach the peer"
    );
    assert!(a.queue_contents(ContainerKind::ReqUpdates).is_empty());
}

#[test]
fn process_payload_applies_in_canonical_order() {
    let mut sender = engine();
    // build a payload whose wire order is summary-then-create for the same id
    let summary = VarSummary {
        var_id: VarId(70),
        seqno: VarSeqno(3),
    };
    let create = create_record(70, PEER, 3, 3, &[1]);

    use flock_proto::{ContainerHeader, WireSerialize};
    let mut payload = Vec::new();
    ContainerHeader {
        kind: ContainerKind::Summaries,
        count: 1,
    }
    .serialize(&mut payload)
    .unwrap();
    summary.serialize(&mut payload).unwrap();
    ContainerHeader {
        kind: ContainerKind::Creates,
        count: 1,
    }
    .serialize(&mut payload)
    .unwrap();
    create.serialize(&mut payload).unwrap();

    sender.process_payload(&payload);
    // create ran first, so the summary saw the variable and matched seqno:
    // no spurious create request
    assert!(sender.store.contains(VarId(70)));
    assert!(sender.queue_contents(ContainerKind::ReqCreates).is_empty());
}
