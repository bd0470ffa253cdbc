//! Integration test: cross-connection renewal lock contention.
//!
//! Two lock services, each with its own connection to the same database
//! file, stand in for two worker processes. Exclusion must come from the
//! store's unique index, not from anything in-process.
//!
//! Uses renova-locks, renova-db and tempfile.

use renova_locks::RenewalLockService;

const CYCLE: u32 = 20_260_315;

fn two_workers() -> (RenewalLockService, RenewalLockService, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("renova.db");
    let w1 = RenewalLockService::open(&db_path).expect("worker 1 store");
    let w2 = RenewalLockService::open(&db_path).expect("worker 2 store");
    (w1, w2, dir)
}

#[test]
fn only_one_worker_wins_the_cycle() {
    let (w1, w2, _dir) = two_workers();

    assert!(w1.acquire("sub-a", CYCLE, "worker-1", 30_000).expect("w1 acquire"));
    assert!(!w2.acquire("sub-a", CYCLE, "worker-2", 30_000).expect("w2 contended"));

    // The loser can see the lock without blocking on it
    assert!(w2.is_locked("sub-a").expect("w2 check"));
}

#[test]
fn release_hands_the_cycle_to_the_next_worker() {
    let (w1, w2, _dir) = two_workers();

    assert!(w1.acquire("sub-a", CYCLE, "worker-1", 30_000).expect("w1 acquire"));
    w1.release("sub-a", CYCLE).expect("w1 release");

    assert!(w2.acquire("sub-a", CYCLE, "worker-3", 30_000).expect("w2 acquire after release"));
}

#[test]
fn crashed_holder_is_healed_by_the_next_acquire() {
    let (w1, w2, _dir) = two_workers();

    // Worker 1 "crashes" holding a lock that immediately expires
    assert!(w1.acquire("sub-a", CYCLE, "worker-1", 0).expect("w1 acquire"));
    drop(w1);

    // Worker 2 does not wait for the sweep; acquire self-heals the key
    assert!(w2.acquire("sub-a", CYCLE, "worker-2", 30_000).expect("w2 self-heal acquire"));
}

#[test]
fn sweep_from_either_connection_expires_abandoned_locks() {
    let (w1, w2, _dir) = two_workers();

    assert!(w1.acquire("sub-a", CYCLE, "worker-1", 0).expect("expired hold"));
    assert!(w1.acquire("sub-b", CYCLE, "worker-1", 0).expect("expired hold"));
    assert!(w1.acquire("sub-c", CYCLE, "worker-1", 60_000).expect("live hold"));

    assert_eq!(w2.sweep_expired().expect("sweep"), 2);
    assert!(w2.is_locked("sub-c").expect("live lock survives"));
}

#[test]
fn different_subscriptions_and_cycles_are_independent() {
    let (w1, w2, _dir) = two_workers();

    assert!(w1.acquire("sub-a", CYCLE, "worker-1", 30_000).expect("acquire"));
    assert!(w2.acquire("sub-b", CYCLE, "worker-2", 30_000).expect("other subscription"));
    assert!(w2.acquire("sub-a", CYCLE + 100, "worker-2", 30_000).expect("other cycle"));
}
