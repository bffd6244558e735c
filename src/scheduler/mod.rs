//! Scheduler subsystem
//!
//! This module provides the scheduling engine: the decision-making core
//! that selects, at every relevant kernel event, which thread runs on
//! which processor, behind a uniform operations table with one
//! implementation per policy.
//!
//! ## Policies
//!
//! - **Fixed-priority** (`PriorityScheduler`): per-priority FIFO chains
//!   with a bit-map accelerator, one processor, O(1) decisions
//! - **Fixed-priority SMP** (`SmpPriorityScheduler`): the same ready
//!   structure feeding a processor set, with preemption of the lowest
//!   scheduled node and the ask-for-help protocol
//! - **EDF** (`EdfScheduler`): deadline-ordered ready tree with
//!   wraparound-safe comparison and job release/cancel for periodic tasks
//! - **Strong-APA** (`StrongApaScheduler`): arbitrary per-thread affinity
//!   masks with BFS placement over affinity-reachable processors
//!
//! ## Module Organization
//!
//! - `types`: thread identity, processor masks, node states, statistics
//! - `priority`: the shifted priority-key encoding and deadline ordering
//! - `node`: scheduler nodes and the per-instance slot arena
//! - `percpu`: per-processor heir records and the owned-processor set
//! - `ops`: the `SchedulerOps` operations table
//! - `instance`: the per-instance spinlock wrapper
//! - `ready_queue`: bit-mapped per-priority FIFO chains
//! - `smp`: machinery shared by the SMP policies
//! - `priority_sched`, `priority_smp`, `edf`, `strong_apa`: the policies

extern crate alloc;

mod edf;
mod instance;
mod node;
mod ops;
mod percpu;
pub mod priority;
mod priority_sched;
mod priority_smp;
mod ready_queue;
pub mod smp;
mod strong_apa;
mod types;

// Re-export types for external use
pub use types::{CpuMask, SchedulerNodeState, SchedulerStats, ThreadId};
pub use types::{MAX_CPUS, PRIORITY_MAXIMUM};

// Re-export the node arena surface
pub use node::{NodeArena, NodeIndex, SchedulerNode};

// Re-export per-processor state
pub use percpu::{PerCpu, ProcessorSet};

// Re-export the operations table
pub use ops::{JobReleaseStatus, SchedulerOps};

// Re-export the scheduling policies
pub use edf::EdfScheduler;
pub use priority_sched::PriorityScheduler;
pub use priority_smp::SmpPriorityScheduler;
pub use strong_apa::StrongApaScheduler;

// Re-export the SMP machinery for policy extensions
pub use smp::{SmpContext, SmpPolicy};

// Re-export the instance lock wrapper
pub use instance::SchedulerInstance;
