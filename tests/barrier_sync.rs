//! Barrier Synchronization Tests
//!
//! End-to-end tests for the core barrier and its thread-queue foundation:
//! - automatic-release threshold arithmetic
//! - deletion vs release status reporting
//! - the timeout-vs-surrender race: exactly one side may wake a thread,
//!   and the queue ends with zero dangling entries either way

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use kairos_sched::{
    BarrierDiscipline, BarrierSeize, CoreBarrier, ThreadId, WaitStatus,
};

fn must_block(barrier: &mut CoreBarrier, thread: u32, timeout: Option<u64>, now: u64) -> Arc<kairos_sched::Waiter> {
    match barrier.seize(ThreadId(thread), true, timeout, now) {
        BarrierSeize::Blocked(waiter) => {
            assert!(waiter.commit_block());
            waiter
        }
        other => panic!("thread {} should have blocked, got {:?}", thread, other),
    }
}

// ============================================================================
// Automatic Release
// ============================================================================

#[test]
fn test_barrier_exactly_threshold_minus_one_block() {
    // For every threshold N, the first N-1 callers block and the N-th
    // triggers the release of all of them without blocking.
    for n in 2..=6usize {
        let mut barrier = CoreBarrier::new(BarrierDiscipline::AutomaticRelease(n)).unwrap();
        let waiters: Vec<_> = (0..n - 1)
            .map(|t| must_block(&mut barrier, t as u32, None, 0))
            .collect();
        assert_eq!(barrier.number_of_waiting_threads(), n - 1);

        match barrier.seize(ThreadId(99), true, None, 0) {
            BarrierSeize::AutomaticallyReleased(released) => {
                assert_eq!(released.len(), n - 1, "threshold {}", n);
            }
            other => panic!("threshold {}: expected release, got {:?}", n, other),
        }

        assert_eq!(
            barrier.number_of_waiting_threads(),
            0,
            "count must drop to zero immediately after release"
        );
        for waiter in waiters {
            assert_eq!(waiter.status(), WaitStatus::Successful);
        }
    }
}

#[test]
fn test_barrier_refills_after_release() {
    let mut barrier = CoreBarrier::new(BarrierDiscipline::AutomaticRelease(2)).unwrap();

    for _cycle in 0..3 {
        let w = must_block(&mut barrier, 1, None, 0);
        match barrier.seize(ThreadId(2), true, None, 0) {
            BarrierSeize::AutomaticallyReleased(released) => assert_eq!(released.len(), 1),
            other => panic!("expected release, got {:?}", other),
        }
        assert_eq!(w.status(), WaitStatus::Successful);
        assert_eq!(barrier.number_of_waiting_threads(), 0);
    }
}

// ============================================================================
// Manual Release and Deletion
// ============================================================================

#[test]
fn test_barrier_surrender_vs_flush_statuses() {
    let mut barrier = CoreBarrier::new(BarrierDiscipline::ManualRelease).unwrap();
    let released = must_block(&mut barrier, 1, None, 0);
    assert_eq!(barrier.surrender().len(), 1);
    assert_eq!(released.status(), WaitStatus::Successful);

    let deleted = must_block(&mut barrier, 2, None, 0);
    assert_eq!(barrier.flush().len(), 1);
    assert_eq!(
        deleted.status(),
        WaitStatus::ObjectWasDeleted,
        "deletion must not look like a successful release"
    );
}

#[test]
fn test_barrier_timeout_then_manual_release() {
    let mut barrier = CoreBarrier::new(BarrierDiscipline::ManualRelease).unwrap();
    let timed = must_block(&mut barrier, 1, Some(10), 0);
    let patient = must_block(&mut barrier, 2, None, 0);

    let fired = barrier.tick(10);
    assert_eq!(fired.len(), 1);
    assert_eq!(timed.status(), WaitStatus::Timeout);
    assert_eq!(barrier.number_of_waiting_threads(), 1);

    assert_eq!(barrier.surrender().len(), 1);
    assert_eq!(patient.status(), WaitStatus::Successful);
}

// ============================================================================
// Timeout vs Surrender Race
// ============================================================================

#[test]
fn test_barrier_timeout_surrender_race_single_winner() {
    // A thread blocks with a 10-tick timeout; a releaser and the timer
    // race at tick 10 exactly. Exactly one wins, the woken status reflects
    // the winner, and the queue is left clean. Repeat many times to give
    // both interleavings a chance.
    for round in 0..200 {
        let barrier = Arc::new(Mutex::new(
            CoreBarrier::new(BarrierDiscipline::ManualRelease).unwrap(),
        ));
        let waiter = must_block(&mut barrier.lock().unwrap(), 1, Some(10), 0);

        let start = Arc::new(Barrier::new(2));

        let surrenderer = {
            let barrier = Arc::clone(&barrier);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                barrier.lock().unwrap().surrender().len()
            })
        };
        let timer = {
            let barrier = Arc::clone(&barrier);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                barrier.lock().unwrap().tick(10).len()
            })
        };

        let surrendered = surrenderer.join().unwrap();
        let timed_out = timer.join().unwrap();

        assert_eq!(
            surrendered + timed_out,
            1,
            "round {}: exactly one side may win the extraction",
            round
        );
        match waiter.status() {
            WaitStatus::Successful => assert_eq!(surrendered, 1),
            WaitStatus::Timeout => assert_eq!(timed_out, 1),
            other => panic!("round {}: unexpected status {:?}", round, other),
        }
        assert_eq!(
            barrier.lock().unwrap().number_of_waiting_threads(),
            0,
            "no dangling entries whichever side won"
        );
    }
}

#[test]
fn test_barrier_concurrent_arrivals_hit_threshold_once() {
    // Many threads seize an automatic barrier concurrently under the
    // object lock; the threshold must fire exactly once per batch and
    // nobody may be lost.
    let threshold = 4usize;
    let arrivals = 12usize;
    let barrier = Arc::new(Mutex::new(
        CoreBarrier::new(BarrierDiscipline::AutomaticRelease(threshold)).unwrap(),
    ));
    let start = Arc::new(Barrier::new(arrivals));

    let mut handles = vec![];
    for t in 0..arrivals {
        let barrier = Arc::clone(&barrier);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            let mut guard = barrier.lock().unwrap();
            match guard.seize(ThreadId(t as u32), true, None, 0) {
                BarrierSeize::AutomaticallyReleased(released) => released.len() + 1,
                BarrierSeize::Blocked(_) => 0,
                BarrierSeize::Unsatisfied => panic!("wait=true can not be unsatisfied"),
            }
        }));
    }

    let total_released: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(
        total_released,
        (arrivals / threshold) * threshold,
        "every full batch must release exactly threshold threads"
    );
    assert_eq!(
        barrier.lock().unwrap().number_of_waiting_threads(),
        arrivals % threshold
    );
}
