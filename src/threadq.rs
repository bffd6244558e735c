//! Thread queue
//!
//! The generic blocking primitive underlying every synchronization object:
//! an ordered collection of blocked threads with FIFO or priority enqueue
//! discipline, watchdog timeouts, and race-free extraction.
//!
//! ## Single-owner extraction
//!
//! A blocked thread can be woken by a releaser, by its timeout firing from
//! timer context, or by the owning object being deleted. Exactly one of
//! them may win: each waiter carries an atomic wait-flags word that moves
//! `IntendToBlock -> Blocked -> ReadyAgain`, and whoever performs the
//! transition to `ReadyAgain` owns the wakeup. The losers observe the
//! claim and do nothing, so a thread is never woken twice and a stale
//! waiter handle is never dereferenced into a freed queue entry.
//!
//! The queue never re-enters the scheduler. Extraction hands the claimed
//! waiters back to the caller (the thread-state dispatcher), which
//! unblocks the threads under its own locking discipline.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::scheduler::ThreadId;

/// Enqueue discipline of a thread queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    /// Wake in arrival order
    Fifo,
    /// Wake in priority order, FIFO among equals
    Priority,
}

/// Final outcome of a wait, as observed by the woken thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// Still enqueued
    Pending,
    /// Released by the synchronization object
    Successful,
    /// The wait expired before a release
    Timeout,
    /// The object was deleted while the thread was blocked
    ObjectWasDeleted,
}

const STATUS_PENDING: u8 = 0;
const STATUS_SUCCESSFUL: u8 = 1;
const STATUS_TIMEOUT: u8 = 2;
const STATUS_DELETED: u8 = 3;

// Wait-flags protocol values
const INTEND_TO_BLOCK: u32 = 1;
const BLOCKED: u32 = 2;
const READY_AGAIN: u32 = 4;

/// One blocked thread's entry, shared between the queue and its waker(s)
#[derive(Debug)]
pub struct Waiter {
    thread: ThreadId,
    insert_priority: u64,
    expire_key: Option<(u64, u64)>,
    flags: AtomicU32,
    status: AtomicU8,
}

impl Waiter {
    fn new(thread: ThreadId, insert_priority: u64, expire_key: Option<(u64, u64)>) -> Self {
        Self {
            thread,
            insert_priority,
            expire_key,
            flags: AtomicU32::new(INTEND_TO_BLOCK),
            status: AtomicU8::new(STATUS_PENDING),
        }
    }

    /// Thread this entry belongs to
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Final wait outcome (valid once woken)
    pub fn status(&self) -> WaitStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_SUCCESSFUL => WaitStatus::Successful,
            STATUS_TIMEOUT => WaitStatus::Timeout,
            STATUS_DELETED => WaitStatus::ObjectWasDeleted,
            _ => WaitStatus::Pending,
        }
    }

    /// Commit the transition from intending to block to actually blocked
    ///
    /// Returns false when a release already won the race in the window
    /// before the context switch; the thread must not block then.
    pub fn commit_block(&self) -> bool {
        self.flags
            .compare_exchange(
                INTEND_TO_BLOCK,
                BLOCKED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether the thread is still (or about to be) blocked
    pub fn is_blocked(&self) -> bool {
        self.flags.load(Ordering::Acquire) != READY_AGAIN
    }

    /// Claim the exclusive right to wake this thread
    fn try_claim(&self) -> bool {
        loop {
            let current = self.flags.load(Ordering::Acquire);
            if current == READY_AGAIN {
                return false;
            }
            if self
                .flags
                .compare_exchange(current, READY_AGAIN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn set_status(&self, status: WaitStatus) {
        let encoded = match status {
            WaitStatus::Pending => STATUS_PENDING,
            WaitStatus::Successful => STATUS_SUCCESSFUL,
            WaitStatus::Timeout => STATUS_TIMEOUT,
            WaitStatus::ObjectWasDeleted => STATUS_DELETED,
        };
        self.status.store(encoded, Ordering::Release);
    }
}

/// An ordered collection of blocked threads
#[derive(Debug)]
pub struct ThreadQueue {
    discipline: Discipline,
    waiters: VecDeque<Arc<Waiter>>,
    watchdogs: BTreeMap<(u64, u64), Arc<Waiter>>,
    sequence: u64,
}

impl ThreadQueue {
    pub fn new(discipline: Discipline) -> Self {
        Self {
            discipline,
            waiters: VecDeque::new(),
            watchdogs: BTreeMap::new(),
            sequence: 0,
        }
    }

    /// Number of enqueued threads
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Enqueue a thread, optionally arming a timeout of `timeout` ticks
    /// from `now`
    ///
    /// The returned handle is what the dispatcher blocks the thread on;
    /// call [`Waiter::commit_block`] at the point of no return.
    pub fn enqueue(
        &mut self,
        thread: ThreadId,
        insert_priority: u64,
        timeout: Option<u64>,
        now: u64,
    ) -> Arc<Waiter> {
        let expire_key = timeout.map(|ticks| {
            self.sequence += 1;
            (now.wrapping_add(ticks), self.sequence)
        });
        let waiter = Arc::new(Waiter::new(thread, insert_priority, expire_key));

        match self.discipline {
            Discipline::Fifo => self.waiters.push_back(waiter.clone()),
            Discipline::Priority => {
                // FIFO among equals: behind every peer of the same priority.
                let position = self
                    .waiters
                    .iter()
                    .position(|other| insert_priority < other.insert_priority)
                    .unwrap_or(self.waiters.len());
                self.waiters.insert(position, waiter.clone());
            }
        }

        if let Some(key) = expire_key {
            self.watchdogs.insert(key, waiter.clone());
        }
        waiter
    }

    fn disarm(&mut self, waiter: &Waiter) {
        if let Some(key) = waiter.expire_key {
            self.watchdogs.remove(&key);
        }
    }

    /// Wake the first waiter that can still be claimed
    pub fn surrender_one(&mut self, status: WaitStatus) -> Option<Arc<Waiter>> {
        while let Some(waiter) = self.waiters.pop_front() {
            self.disarm(&waiter);
            if waiter.try_claim() {
                waiter.set_status(status);
                return Some(waiter);
            }
        }
        None
    }

    /// Wake every waiter; used for broadcast release and object deletion
    pub fn flush(&mut self, status: WaitStatus) -> Vec<Arc<Waiter>> {
        let mut woken = Vec::with_capacity(self.waiters.len());
        while let Some(waiter) = self.surrender_one(status) {
            woken.push(waiter);
        }
        woken
    }

    /// Wake one specific thread (targeted deletion or signal)
    pub fn extract(&mut self, thread: ThreadId, status: WaitStatus) -> Option<Arc<Waiter>> {
        let position = self
            .waiters
            .iter()
            .position(|waiter| waiter.thread == thread)?;
        let waiter = self.waiters.remove(position)?;
        self.disarm(&waiter);
        if waiter.try_claim() {
            waiter.set_status(status);
            Some(waiter)
        } else {
            None
        }
    }

    /// Fire every watchdog due at `now`; returns the timed-out waiters
    ///
    /// A waiter already claimed by a concurrent release is skipped
    /// silently: the release won the race.
    pub fn tick(&mut self, now: u64) -> Vec<Arc<Waiter>> {
        let mut fired = Vec::new();
        loop {
            let key = match self.watchdogs.keys().next() {
                Some(&(expiry, sequence)) if expiry <= now => (expiry, sequence),
                _ => break,
            };
            let waiter = match self.watchdogs.remove(&key) {
                Some(waiter) => waiter,
                None => continue,
            };
            if waiter.try_claim() {
                waiter.set_status(WaitStatus::Timeout);
                self.waiters.retain(|other| !Arc::ptr_eq(other, &waiter));
                fired.push(waiter);
            }
        }
        fired
    }
}
