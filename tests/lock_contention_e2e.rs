//! Cross-thread properties of the worker-lease-aware lock.
//!
//! Exercises mutual exclusion, contended handoff, panic release, liveness
//! without fairness, cancellation isolation, and capacity-callback
//! bracketing with real OS threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use worklock::test_utils::init_test_logging;
use worklock::{LeaseRegistry, LockError, RegistryOptions};

const WORKERS: usize = 4;
const ROUNDS: usize = 200;

#[test]
fn mutual_exclusion_under_contention() {
    init_test_logging();
    worklock::test_phase!("mutual_exclusion_under_contention");

    let registry = LeaseRegistry::new();
    let lock = registry.synchronizer();
    let active = AtomicUsize::new(0);
    let overlaps = AtomicUsize::new(0);
    let counter = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..WORKERS {
            scope.spawn(|| {
                let _worker = registry.register();
                for _ in 0..ROUNDS {
                    lock.with_lock(|| {
                        let concurrent = active.fetch_add(1, Ordering::SeqCst);
                        if concurrent != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .expect("worker acquisition failed");
                }
            });
        }
    });

    let total = counter.load(Ordering::SeqCst);
    let overlapped = overlaps.load(Ordering::SeqCst);
    worklock::assert_with_log!(overlapped == 0, "no overlapping critical sections", 0usize, overlapped);
    worklock::assert_with_log!(total == WORKERS * ROUNDS, "every round ran", WORKERS * ROUNDS, total);
    assert!(!lock.is_locked());
    worklock::test_complete!("mutual_exclusion_under_contention", rounds = total);
}

#[test]
fn contended_waiter_parks_and_runs_after_release() {
    init_test_logging();
    worklock::test_phase!("contended_waiter_parks_and_runs_after_release");

    let registry = LeaseRegistry::new();
    let lock = registry.synchronizer();
    let release = AtomicBool::new(false);
    let order = AtomicUsize::new(0);
    let holder_pos = AtomicUsize::new(usize::MAX);
    let waiter_pos = AtomicUsize::new(usize::MAX);
    let waiter_runs = AtomicUsize::new(0);

    thread::scope(|scope| {
        scope.spawn(|| {
            let _worker = registry.register();
            lock.with_lock(|| {
                holder_pos.store(order.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                while !release.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("holder acquisition failed");
        });

        while !lock.is_locked() {
            thread::sleep(Duration::from_millis(1));
        }

        scope.spawn(|| {
            let _worker = registry.register();
            lock.with_lock(|| {
                waiter_pos.store(order.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
                waiter_runs.fetch_add(1, Ordering::SeqCst);
            })
            .expect("waiter acquisition failed");
        });

        // The waiter must park inside the coordinator's blocking section
        // before the holder lets go.
        while registry.blocked_workers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        release.store(true, Ordering::Release);
    });

    assert_eq!(holder_pos.load(Ordering::SeqCst), 0);
    assert_eq!(waiter_pos.load(Ordering::SeqCst), 1);
    assert_eq!(waiter_runs.load(Ordering::SeqCst), 1);
    assert_eq!(registry.blocked_workers(), 0);
    assert!(!lock.is_locked());
    worklock::test_complete!("contended_waiter_parks_and_runs_after_release");
}

#[test]
fn panic_release_is_visible_to_other_threads() {
    init_test_logging();
    worklock::test_phase!("panic_release_is_visible_to_other_threads");

    let registry = LeaseRegistry::new();
    let lock = registry.synchronizer();

    thread::scope(|scope| {
        scope
            .spawn(|| {
                let _worker = registry.register();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    lock.with_lock(|| panic!("deliberate panic while holding the lock"))
                }));
                assert!(outcome.is_err());
            })
            .join()
            .expect("panicking holder thread failed");

        scope
            .spawn(|| {
                let _worker = registry.register();
                let value = lock.with_lock(|| 7).expect("acquisition after panic failed");
                assert_eq!(value, 7);
            })
            .join()
            .expect("follow-up thread failed");
    });

    assert!(!lock.is_locked());
    worklock::test_complete!("panic_release_is_visible_to_other_threads");
}

#[test]
fn every_waiter_eventually_acquires() {
    init_test_logging();
    worklock::test_phase!("every_waiter_eventually_acquires");

    let registry = LeaseRegistry::new();
    let lock = registry.synchronizer();
    let acquired: Vec<AtomicUsize> = (0..WORKERS).map(|_| AtomicUsize::new(0)).collect();

    let registry = &registry;
    let lock = &lock;
    thread::scope(|scope| {
        for slot in &acquired {
            scope.spawn(move || {
                let _worker = registry.register();
                for _ in 0..ROUNDS {
                    lock.with_lock(|| {
                        slot.fetch_add(1, Ordering::SeqCst);
                    })
                    .expect("worker acquisition failed");
                }
            });
        }
    });

    // No ordering is guaranteed among waiters, but nobody starves.
    for slot in &acquired {
        let count = slot.load(Ordering::SeqCst);
        worklock::assert_with_log!(count == ROUNDS, "worker completed all rounds", ROUNDS, count);
    }
    worklock::test_complete!("every_waiter_eventually_acquires");
}

#[test]
fn cancelled_waiter_leaves_holder_and_lock_usable() {
    init_test_logging();
    worklock::test_phase!("cancelled_waiter_leaves_holder_and_lock_usable");

    let registry = LeaseRegistry::new();
    let lock = registry.synchronizer();
    let release = AtomicBool::new(false);
    let (handle_tx, handle_rx) = mpsc::channel();

    thread::scope(|scope| {
        scope.spawn(|| {
            let _worker = registry.register();
            lock.with_lock(|| {
                while !release.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("holder acquisition failed");
        });

        while !lock.is_locked() {
            thread::sleep(Duration::from_millis(1));
        }

        let waiter = scope.spawn(|| {
            let worker = registry.register();
            handle_tx
                .send(worker.cancel_handle())
                .expect("handle receiver gone");
            lock.with_lock(|| ())
        });

        let handle = handle_rx.recv().expect("no cancel handle");
        while registry.blocked_workers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        handle.cancel();

        let waited = waiter.join().expect("waiter panicked");
        assert_eq!(waited, Err(LockError::Cancelled));
        assert!(lock.is_locked(), "holder must be unaffected by the cancel");
        release.store(true, Ordering::Release);
    });

    // The lock stays usable after the cancelled wait.
    thread::scope(|scope| {
        scope.spawn(|| {
            let _worker = registry.register();
            let value = lock.with_lock(|| 3).expect("acquisition after cancel failed");
            assert_eq!(value, 3);
        });
    });
    assert!(!lock.is_locked());
    worklock::test_complete!("cancelled_waiter_leaves_holder_and_lock_usable");
}

#[test]
fn capacity_hooks_bracket_every_blocking_section() {
    init_test_logging();
    worklock::test_phase!("capacity_hooks_bracket_every_blocking_section");

    let blocked = Arc::new(AtomicUsize::new(0));
    let resumed = Arc::new(AtomicUsize::new(0));
    let registry = LeaseRegistry::with_options(RegistryOptions {
        on_worker_blocked: Some(Arc::new({
            let blocked = Arc::clone(&blocked);
            move || {
                blocked.fetch_add(1, Ordering::SeqCst);
            }
        })),
        on_worker_resumed: Some(Arc::new({
            let resumed = Arc::clone(&resumed);
            move || {
                resumed.fetch_add(1, Ordering::SeqCst);
            }
        })),
    });
    let lock = registry.synchronizer();
    let release = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            let _worker = registry.register();
            lock.with_lock(|| {
                while !release.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("holder acquisition failed");
        });

        while !lock.is_locked() {
            thread::sleep(Duration::from_millis(1));
        }

        for _ in 0..2 {
            scope.spawn(|| {
                let _worker = registry.register();
                lock.with_lock(|| ()).expect("waiter acquisition failed");
            });
        }

        while registry.blocked_workers() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        release.store(true, Ordering::Release);
    });

    let blocked_total = blocked.load(Ordering::SeqCst);
    let resumed_total = resumed.load(Ordering::SeqCst);
    worklock::assert_with_log!(
        blocked_total == resumed_total,
        "every blocked notification pairs with a resume",
        blocked_total,
        resumed_total
    );
    assert_eq!(blocked_total, 2);
    assert_eq!(registry.blocked_workers(), 0);
    worklock::test_complete!(
        "capacity_hooks_bracket_every_blocking_section",
        sections = blocked_total
    );
}
