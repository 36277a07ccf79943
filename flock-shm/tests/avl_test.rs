use flock_shm::{ArrayAvl, ShmError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn insert_find_remove() {
    let mut tree: ArrayAvl<u32, u64, 16> = ArrayAvl::new().unwrap();
    assert!(tree.is_empty());
    tree.insert(5, 50).unwrap();
    tree.insert(3, 30).unwrap();
    tree.insert(8, 80).unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.get(&3), Some(&30));
    assert_eq!(tree.get(&9), None);
    assert!(tree.contains(&8));

    assert_eq!(tree.remove(&3).unwrap(), Some(30));
    assert_eq!(tree.remove(&3).unwrap(), None);
    assert_eq!(tree.len(), 2);
    tree.validate().unwrap();
}

#[test]
fn insert_replaces_existing_value() {
    let mut tree: ArrayAvl<u8, u8, 8> = ArrayAvl::new().unwrap();
    tree.insert(1, 10).unwrap();
    tree.insert(1, 20).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.get(&1), Some(&20));
}

#[test]
fn get_mut_updates_in_place() {
    let mut tree: ArrayAvl<u8, u32, 8> = ArrayAvl::new().unwrap();
    tree.insert(4, 1).unwrap();
    *tree.get_mut(&4).unwrap() += 41;
    assert_eq!(tree.get(&4), Some(&42));
}

#[test]
fn rejects_insert_when_full() {
    let mut tree: ArrayAvl<u8, u8, 4> = ArrayAvl::new().unwrap();
    for k in 0..4 {
        tree.insert(k, k).unwrap();
    }
    assert!(tree.is_full());
    assert!(matches!(tree.insert(100, 0), Err(ShmError::TreeFull)));
    // replacing an existing key still works at capacity
    tree.insert(2, 99).unwrap();
    assert_eq!(tree.get(&2), Some(&99));
}

#[test]
fn ascending_inserts_stay_balanced() {
    let mut tree: ArrayAvl<u32, u32, 64> = ArrayAvl::new().unwrap();
    for k in 0..63 {
        tree.insert(k, k * 2).unwrap();
        tree.validate().unwrap();
    }
    let mut keys = Vec::new();
    tree.walk(&mut |k, _| keys.push(*k));
    let expected: Vec<u32> = (0..63).collect();
    assert_eq!(keys, expected, "in-order walk is strictly increasing");
}

#[test]
fn descending_inserts_stay_balanced() {
    let mut tree: ArrayAvl<i64, u8, 64> = ArrayAvl::new().unwrap();
    for k in (0..60).rev() {
        tree.insert(k, 0).unwrap();
        tree.validate().unwrap();
    }
}

#[test]
fn random_interleaving_keeps_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tree: ArrayAvl<u16, u16, 96> = ArrayAvl::new().unwrap();
    let mut shadow = std::collections::BTreeMap::new();

    for _ in 0..4000 {
        let key: u16 = rng.gen_range(0..128);
        if rng.gen_bool(0.6) && !tree.is_full() {
            tree.insert(key, key ^ 0xff).unwrap();
            shadow.insert(key, key ^ 0xff);
        } else {
            let removed = tree.remove(&key).unwrap();
            assert_eq!(removed, shadow.remove(&key));
        }
        tree.validate().unwrap();
        assert_eq!(tree.len(), shadow.len());
    }

    let mut walked = Vec::new();
    tree.walk(&mut |k, v| walked.push((*k, *v)));
    let expected: Vec<(u16, u16)> = shadow.into_iter().collect();
    assert_eq!(walked, expected);
}

#[test]
fn slots_are_reusable_after_removal() {
    let mut tree: ArrayAvl<u8, u8, 4> = ArrayAvl::new().unwrap();
    for round in 0..50u8 {
        for k in 0..4u8 {
            tree.insert(k.wrapping_add(round), 0).unwrap();
        }
        assert!(tree.is_full());
        for k in 0..4u8 {
            assert!(tree.remove(&k.wrapping_add(round)).unwrap().is_some());
        }
        assert!(tree.is_empty());
        tree.validate().unwrap();
    }
}

#[test]
fn keys_where_selects_by_value() {
    let mut tree: ArrayAvl<u8, u32, 16> = ArrayAvl::new().unwrap();
    for k in 0..10u8 {
        tree.insert(k, k as u32 * 10).unwrap();
    }
    let stale = tree.keys_where(|_, v| *v >= 70);
    assert_eq!(stale, vec![7, 8, 9]);
}
