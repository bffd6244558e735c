//! Core barrier
//!
//! A synchronization object built on the thread queue: N waiters block
//! until either a manual release or, for automatic barriers, until the
//! thread that brings the waiting count to the configured threshold
//! arrives — that thread never blocks and is reported as automatically
//! released, while all earlier waiters wake with a successful status.
//!
//! Deleting a barrier wakes every waiter with a distinct status so callers
//! can tell a teardown apart from a normal release.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::scheduler::ThreadId;
use crate::threadq::{Discipline, ThreadQueue, WaitStatus, Waiter};

/// Release discipline of a barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierDiscipline {
    /// Waiters block until an explicit release
    ManualRelease,
    /// All waiters release once the n-th thread arrives
    AutomaticRelease(usize),
}

/// Outcome of a seize call
#[derive(Debug)]
pub enum BarrierSeize {
    /// The caller completed the barrier; the listed waiters were released
    /// and must be unblocked by the dispatcher
    AutomaticallyReleased(Vec<Arc<Waiter>>),
    /// The caller is enqueued and must block on the returned entry
    Blocked(Arc<Waiter>),
    /// `wait` was false and the barrier could not be satisfied immediately
    Unsatisfied,
}

/// A barrier synchronization object
#[derive(Debug)]
pub struct CoreBarrier {
    queue: ThreadQueue,
    discipline: BarrierDiscipline,
}

impl CoreBarrier {
    /// Create a barrier; an automatic threshold of zero is a configuration
    /// error
    pub fn new(discipline: BarrierDiscipline) -> Result<Self, &'static str> {
        if discipline == BarrierDiscipline::AutomaticRelease(0) {
            return Err("automatic barrier needs a non-zero threshold");
        }
        Ok(Self {
            queue: ThreadQueue::new(Discipline::Fifo),
            discipline,
        })
    }

    /// Release discipline
    pub fn discipline(&self) -> BarrierDiscipline {
        self.discipline
    }

    /// Count of currently blocked waiters
    ///
    /// Always equals the live entry count of the underlying queue.
    pub fn number_of_waiting_threads(&self) -> usize {
        self.queue.len()
    }

    /// Wait at the barrier
    ///
    /// For an automatic barrier, the thread that brings the count to the
    /// threshold releases everyone and does not block. Otherwise the
    /// caller blocks (with an optional timeout of `timeout` ticks from
    /// `now`) or fails fast when `wait` is false.
    pub fn seize(
        &mut self,
        thread: ThreadId,
        wait: bool,
        timeout: Option<u64>,
        now: u64,
    ) -> BarrierSeize {
        if let BarrierDiscipline::AutomaticRelease(threshold) = self.discipline {
            if self.queue.len() + 1 >= threshold {
                let released = self.queue.flush(WaitStatus::Successful);
                return BarrierSeize::AutomaticallyReleased(released);
            }
        }

        if !wait {
            return BarrierSeize::Unsatisfied;
        }
        BarrierSeize::Blocked(self.queue.enqueue(thread, 0, timeout, now))
    }

    /// Manual release: wake all current waiters regardless of discipline
    pub fn surrender(&mut self) -> Vec<Arc<Waiter>> {
        self.queue.flush(WaitStatus::Successful)
    }

    /// Deletion: wake all waiters with the object-was-deleted status
    pub fn flush(&mut self) -> Vec<Arc<Waiter>> {
        self.queue.flush(WaitStatus::ObjectWasDeleted)
    }

    /// Fire due timeouts; returns the timed-out waiters
    pub fn tick(&mut self, now: u64) -> Vec<Arc<Waiter>> {
        self.queue.tick(now)
    }
}
