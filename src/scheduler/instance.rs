//! Scheduler instance locking
//!
//! Every scheduler instance is mutated under one spinlock, held only for
//! the duration of a single operation. In the kernel that lock also masks
//! interrupts on the owning processor; here it is the `spin` mutex the
//! dispatch layer acquires before invoking any scheduler operation.
//!
//! The critical sections are bounded-time by the operations contract:
//! never hold the guard across a context switch or any call that can
//! block.

use spin::{Mutex, MutexGuard};

use super::ops::SchedulerOps;

/// A scheduler policy behind its instance lock
#[derive(Debug)]
pub struct SchedulerInstance<P> {
    policy: Mutex<P>,
}

impl<P: SchedulerOps> SchedulerInstance<P> {
    pub const fn new(policy: P) -> Self {
        Self {
            policy: Mutex::new(policy),
        }
    }

    /// Run one operation under the instance lock
    pub fn with<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut guard = self.policy.lock();
        f(&mut guard)
    }

    /// Acquire the instance lock for a multi-operation critical section
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.policy.lock()
    }
}
