use flock_proto::VarSeqno;

#[test]
fn never_more_recent_than_itself() {
    for v in 0..=255u8 {
        assert!(!VarSeqno(v).more_recent_than(VarSeqno(v)));
    }
}

#[test]
fn adjacent_values() {
    assert!(VarSeqno(1).more_recent_than(VarSeqno(0)));
    assert!(!VarSeqno(0).more_recent_than(VarSeqno(1)));
    assert!(VarSeqno(0).more_recent_than(VarSeqno(255)), "wraps around");
    assert!(!VarSeqno(255).more_recent_than(VarSeqno(0)));
}

#[test]
fn half_window_boundaries() {
    // 127 steps ahead is still "more recent"
    assert!(VarSeqno(127).more_recent_than(VarSeqno(0)));
    assert!(VarSeqno(0).more_recent_than(VarSeqno(129)));
    // the antipode is more recent in neither direction
    assert!(!VarSeqno(128).more_recent_than(VarSeqno(0)));
    assert!(!VarSeqno(0).more_recent_than(VarSeqno(128)));
}

#[test]
fn antisymmetric_away_from_antipode() {
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            let fwd = VarSeqno(a).more_recent_than(VarSeqno(b));
            let rev = VarSeqno(b).more_recent_than(VarSeqno(a));
            if a == b || a.wrapping_sub(b) == 128 {
                assert!(!fwd && !rev, "a={a} b={b}");
            } else {
                assert!(fwd ^ rev, "exactly one direction wins: a={a} b={b}");
            }
        }
    }
}

#[test]
fn next_wraps_modulo_256() {
    assert_eq!(VarSeqno(254).next(), VarSeqno(255));
    assert_eq!(VarSeqno(255).next(), VarSeqno(0));
    assert!(VarSeqno(255).next().more_recent_than(VarSeqno(255)));
}
