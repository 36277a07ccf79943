use flock_proto::constants::{BEACON_MAGIC, BEACON_VERSION};
use flock_proto::safety::SafetyReport;
use flock_proto::{
    from_slice, to_vec, BeaconHeader, ContainerHeader, ContainerKind, InstructionBatch, NodeId,
    PayloadHeader, ProtocolId, RepCount, VarCreate, VarDelete, VarDescription, VarId, VarReqCreate,
    VarReqUpdate, VarSeqno, VarSpec, VarSummary, VarUpdate, VarValue, WireSerialize, WireSize,
};

fn node(byte: u8) -> NodeId {
    NodeId([byte, byte, byte, byte, byte, byte])
}

#[test]
fn beacon_header_round_trip() {
    let hdr = BeaconHeader::new(node(0xaa), 321, 4, 0xdead_beef);
    let bytes = to_vec(&hdr).unwrap();
    assert_eq!(bytes.len(), BeaconHeader::WIRE_SIZE);
    // magic and version lead the frame in network byte order
    assert_eq!(&bytes[..3], &[0x49, 0x7e, 0x01]);
    let back: BeaconHeader = from_slice(&bytes).unwrap();
    assert_eq!(back, hdr);
}

#[test]
fn beacon_header_well_formedness() {
    let own = node(1);
    let hdr = BeaconHeader::new(node(2), 0, 0, 7);
    assert!(hdr.well_formed(own));
    assert!(!hdr.well_formed(node(2)), "own frames are rejected");

    let mut bad = hdr;
    bad.magic = 0x1234;
    assert!(!bad.well_formed(own));

    let mut bad = hdr;
    bad.version = BEACON_VERSION + 1;
    assert!(!bad.well_formed(own));
    assert_eq!(hdr.magic, BEACON_MAGIC);
}

#[test]
fn payload_header_round_trip() {
    let hdr = PayloadHeader {
        protocol: ProtocolId(0x0002),
        length: 999,
    };
    let bytes = to_vec(&hdr).unwrap();
    assert_eq!(bytes, vec![0x00, 0x02, 0x03, 0xe7]);
    assert_eq!(from_slice::<PayloadHeader>(&bytes).unwrap(), hdr);
}

#[test]
fn node_id_parse_and_format() {
    let id = NodeId::parse("02:0a:ff:00:10:2a").unwrap();
    assert_eq!(id.0, [0x02, 0x0a, 0xff, 0x00, 0x10, 0x2a]);
    assert_eq!(id.to_string(), "02:0a:ff:00:10:2a");
    assert!(NodeId::parse("02:0a:ff:00:10").is_none());
    assert!(NodeId::parse("02:0a:ff:00:10:2a:33").is_none());
    assert!(NodeId::parse("zz:0a:ff:00:10:2a").is_none());
}

#[test]
fn var_create_round_trip() {
    let create = VarCreate {
        spec: VarSpec {
            var_id: VarId(10),
            producer: node(9),
            rep_count: RepCount(3),
            description: VarDescription::new("altitude"),
        },
        update: VarUpdate {
            var_id: VarId(10),
            seqno: VarSeqno(0),
            value: VarValue::new([0x2a]),
        },
    };
    let bytes = to_vec(&create).unwrap();
    assert_eq!(bytes.len(), create.wire_size());
    assert_eq!(from_slice::<VarCreate>(&bytes).unwrap(), create);
}

#[test]
fn record_round_trips() {
    let summ = VarSummary {
        var_id: VarId(1),
        seqno: VarSeqno(200),
    };
    assert_eq!(from_slice::<VarSummary>(&to_vec(&summ).unwrap()).unwrap(), summ);

    let del = VarDelete { var_id: VarId(250) };
    assert_eq!(from_slice::<VarDelete>(&to_vec(&del).unwrap()).unwrap(), del);

    let rc = VarReqCreate { var_id: VarId(7) };
    assert_eq!(from_slice::<VarReqCreate>(&to_vec(&rc).unwrap()).unwrap(), rc);

    let ru = VarReqUpdate {
        var_id: VarId(7),
        seqno: VarSeqno(5),
    };
    assert_eq!(from_slice::<VarReqUpdate>(&to_vec(&ru).unwrap()).unwrap(), ru);

    let upd = VarUpdate {
        var_id: VarId(12),
        seqno: VarSeqno(255),
        value: VarValue::new(vec![1, 2, 3, 4, 5]),
    };
    assert_eq!(from_slice::<VarUpdate>(&to_vec(&upd).unwrap()).unwrap(), upd);
}

#[test]
fn safety_report_round_trip() {
    let report = SafetyReport {
        node: node(3),
        seqno: 77,
        position: [1000, -2000, 30],
        velocity: [-5, 12, 0],
    };
    let bytes = to_vec(&report).unwrap();
    assert_eq!(bytes.len(), SafetyReport::WIRE_SIZE);
    assert_eq!(from_slice::<SafetyReport>(&bytes).unwrap(), report);
}

#[test]
fn oversized_value_fails_to_serialize() {
    let val = VarValue::new(vec![0u8; 256]);
    assert!(to_vec(&val).is_err());
}

#[test]
fn batch_parses_multiple_containers() {
    let mut payload = Vec::new();
    ContainerHeader {
        kind: ContainerKind::Summaries,
        count: 2,
    }
    .serialize(&mut payload)
    .unwrap();
    VarSummary {
        var_id: VarId(1),
        seqno: VarSeqno(4),
    }
    .serialize(&mut payload)
    .unwrap();
    VarSummary {
        var_id: VarId(2),
        seqno: VarSeqno(9),
    }
    .serialize(&mut payload)
    .unwrap();
    ContainerHeader {
        kind: ContainerKind::Deletes,
        count: 1,
    }
    .serialize(&mut payload)
    .unwrap();
    VarDelete { var_id: VarId(1) }.serialize(&mut payload).unwrap();

    let (batch, err) = InstructionBatch::parse(&payload);
    assert!(err.is_none());
    assert_eq!(batch.summaries.len(), 2);
    assert_eq!(batch.deletes.len(), 1);
    assert_eq!(batch.record_count(), 3);
}

#[test]
fn batch_stops_on_unknown_kind() {
    let mut payload = Vec::new();
    ContainerHeader {
        kind: ContainerKind::Deletes,
        count: 1,
    }
    .serialize(&mut payload)
    .unwrap();
    VarDelete { var_id: VarId(9) }.serialize(&mut payload).unwrap();
    payload.extend_from_slice(&[0xfe, 0x01, 0x00]); // unknown kind 0xfe

    let (batch, err) = InstructionBatch::parse(&payload);
    assert_eq!(batch.deletes.len(), 1, "records before the error survive");
    assert!(matches!(
        err,
        Some(flock_proto::WireError::UnknownContainerKind(0xfe))
    ));
}

#[test]
fn batch_rejects_zero_record_container() {
    let payload = [ContainerKind::Updates as u8, 0x00];
    let (batch, err) = InstructionBatch::parse(&payload);
    assert!(batch.is_empty());
    assert!(matches!(err, Some(flock_proto::WireError::EmptyContainer)));
}

#[test]
fn full_container_of_255_records_round_trips() {
    let mut payload = Vec::new();
    ContainerHeader {
        kind: ContainerKind::ReqCreates,
        count: 255,
    }
    .serialize(&mut payload)
    .unwrap();
    for i in 0..255u16 {
        VarReqCreate {
            var_id: VarId(i as u8),
        }
        .serialize(&mut payload)
        .unwrap();
    }
    let (batch, err) = InstructionBatch::parse(&payload);
    assert!(err.is_none());
    assert_eq!(batch.req_creates.len(), 255);
}
