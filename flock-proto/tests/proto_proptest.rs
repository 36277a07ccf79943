use flock_proto::{
    from_slice, to_vec, NodeId, RepCount, VarCreate, VarDescription, VarId, VarSeqno, VarSpec,
    VarSummary, VarUpdate, VarValue, WireSize,
};
use proptest::prelude::*;

fn arb_node_id() -> impl Strategy<Value = NodeId> {
    any::<[u8; 6]>().prop_map(NodeId)
}

fn arb_value() -> impl Strategy<Value = VarValue> {
    proptest::collection::vec(any::<u8>(), 0..=255).prop_map(VarValue::new)
}

fn arb_description() -> impl Strategy<Value = VarDescription> {
    "[ -~]{0,100}".prop_map(VarDescription::new)
}

fn arb_update() -> impl Strategy<Value = VarUpdate> {
    (any::<u8>(), any::<u8>(), arb_value()).prop_map(|(id, seqno, value)| VarUpdate {
        var_id: VarId(id),
        seqno: VarSeqno(seqno),
        value,
    })
}

proptest! {
    #[test]
    fn update_round_trips(update in arb_update()) {
        let bytes = to_vec(&update).unwrap();
        prop_assert_eq!(bytes.len(), update.wire_size());
        prop_assert_eq!(from_slice::<VarUpdate>(&bytes).unwrap(), update);
    }

    #[test]
    fn create_round_trips(
        update in arb_update(),
        producer in arb_node_id(),
        rep in 0u8..=15,
        descr in arb_description(),
    ) {
        let create = VarCreate {
            spec: VarSpec {
                var_id: update.var_id,
                producer,
                rep_count: RepCount(rep),
                description: descr,
            },
            update,
        };
        let bytes = to_vec(&create).unwrap();
        prop_assert_eq!(bytes.len(), create.wire_size());
        prop_assert_eq!(from_slice::<VarCreate>(&bytes).unwrap(), create);
    }

    #[test]
    fn summary_round_trips(id in any::<u8>(), seqno in any::<u8>()) {
        let summ = VarSummary { var_id: VarId(id), seqno: VarSeqno(seqno) };
        prop_assert_eq!(from_slice::<VarSummary>(&to_vec(&summ).unwrap()).unwrap(), summ);
    }

    #[test]
    fn more_recent_is_a_strict_half_order(a in any::<u8>(), b in any::<u8>()) {
        let fwd = VarSeqno(a).more_recent_than(VarSeqno(b));
        let rev = VarSeqno(b).more_recent_than(VarSeqno(a));
        prop_assert!(!(fwd && rev));
        if a != b && a.wrapping_sub(b) != 128 {
            prop_assert!(fwd || rev);
        }
    }
}
