use flock_shm::{FiniteQueue, ShmError, ShmRegion};
use std::sync::Arc;
use std::time::Duration;

const T: Duration = Duration::from_millis(200);

fn region_path(name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "flock-queue-test-{}-{}",
        std::process::id(),
        name
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn make_queue(name: &str, slots: u64, slot_bytes: usize) -> (ShmRegion, FiniteQueue) {
    let path = region_path(name);
    let len = FiniteQueue::required_size(slots, slot_bytes);
    let region = ShmRegion::create(&path, len).unwrap();
    let queue = unsafe { FiniteQueue::init_at(region.base_ptr(), region.len(), slots, slot_bytes) }
        .unwrap();
    (region, queue)
}

#[test]
fn push_pop_preserves_order_and_content() {
    let (_region, queue) = make_queue("order", 8, 64);
    queue.push_wait(b"first", T).unwrap();
    queue.push_wait(b"second", T).unwrap();
    queue.push_wait(b"", T).unwrap();
    assert_eq!(queue.len(T).unwrap(), 3);
    assert_eq!(queue.pop_wait(T).unwrap(), b"first");
    assert_eq!(queue.pop_wait(T).unwrap(), b"second");
    assert_eq!(queue.pop_wait(T).unwrap(), b"");
    assert!(queue.is_empty(T).unwrap());
}

#[test]
fn try_push_reports_full() {
    let (_region, queue) = make_queue("full", 2, 32);
    assert!(queue.try_push(b"a", T).unwrap());
    assert!(queue.try_push(b"b", T).unwrap());
    assert!(!queue.try_push(b"c", T).unwrap(), "queue is full");
    assert_eq!(queue.pop_wait(T).unwrap(), b"a");
    assert!(queue.try_push(b"c", T).unwrap());
}

#[test]
fn pop_times_out_on_empty_queue() {
    let (_region, queue) = make_queue("timeout", 2, 32);
    let start = std::time::Instant::now();
    let err = queue.pop_wait(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ShmError::Timeout));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn oversized_message_rejected() {
    let (_region, queue) = make_queue("oversize", 2, 16);
    let big = vec![0u8; 64];
    assert!(matches!(
        queue.try_push(&big, T),
        Err(ShmError::TooSmall { .. })
    ));
}

#[test]
fn attach_sees_pushed_messages() {
    let (region, queue) = make_queue("attach", 4, 48);
    queue.push_wait(b"cross-view", T).unwrap();

    let attached = unsafe { FiniteQueue::attach(region.base_ptr(), region.len()) }.unwrap();
    assert_eq!(attached.pop_wait(T).unwrap(), b"cross-view");
}

#[test]
fn blocked_push_succeeds_once_space_frees_up() {
    let (region, queue) = make_queue("unblock", 2, 32);
    queue.push_wait(b"a", T).unwrap();
    queue.push_wait(b"b", T).unwrap();

    let region = Arc::new(region);
    let drainer = {
        let region = Arc::clone(&region);
        std::thread::spawn(move || {
            let q = unsafe { FiniteQueue::attach(region.base_ptr(), region.len()) }.unwrap();
            std::thread::sleep(Duration::from_millis(40));
            q.pop_wait(T).unwrap()
        })
    };

    // blocks until the drainer removes one message
    queue.push_wait(b"c", Duration::from_secs(2)).unwrap();
    assert_eq!(drainer.join().unwrap(), b"a");
    assert_eq!(queue.pop_wait(T).unwrap(), b"b");
    assert_eq!(queue.pop_wait(T).unwrap(), b"c");
}

#[test]
fn slots_are_recycled_through_many_cycles() {
    let (_region, queue) = make_queue("recycle", 3, 32);
    for round in 0..100u32 {
        let msg = round.to_be_bytes();
        queue.push_wait(&msg, T).unwrap();
        assert_eq!(queue.pop_wait(T).unwrap(), msg);
    }
}
