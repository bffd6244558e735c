//! kairos-sched: SMP real-time scheduler core
//!
//! The scheduling and thread-synchronization engine of an RTOS kernel,
//! packaged as a `no_std` library. It decides which thread runs on which
//! processor, implements blocking and unblocking on synchronization
//! objects, and provides pluggable scheduling policies (fixed-priority,
//! fixed-priority SMP, earliest-deadline-first, strong arbitrary processor
//! affinity) behind one operations table.
//!
//! Everything architecture-specific — context-switch assembly, interrupt
//! delivery, memory management — stays outside; the crate's boundary is
//! the operations table consumed by the thread-state dispatcher and the
//! blocking primitives consumed by synchronization objects.
//!
//! ## Locking contract
//!
//! Scheduler instances and thread queues carry no internal locks: the
//! caller wraps each in its spinlock (`spin::Mutex` in the kernel) and
//! every operation is a bounded-time critical section under that lock.
//! The one cross-lock protocol — a wakeup racing a timeout — is resolved
//! inside the waiter entries with atomic wait flags, so the loser of the
//! race backs off without ever touching a freed queue entry.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod barrier;
pub mod scheduler;
pub mod thread;
pub mod threadq;

pub use barrier::{BarrierDiscipline, BarrierSeize, CoreBarrier};
pub use scheduler::{
    CpuMask, EdfScheduler, JobReleaseStatus, NodeIndex, PriorityScheduler, SchedulerInstance,
    SchedulerNodeState, SchedulerOps, SchedulerStats, SmpPriorityScheduler, StrongApaScheduler,
    ThreadId,
};
pub use thread::ThreadControl;
pub use threadq::{Discipline, ThreadQueue, WaitStatus, Waiter};
