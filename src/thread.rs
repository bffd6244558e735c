//! Thread-control glue
//!
//! The scheduler core references threads by handle; the kernel's thread
//! manager owns them. This module carries the little state the core needs
//! per thread: which scheduler instances hold a node for it, so the
//! cross-instance help protocol can iterate them in order.
//!
//! A thread normally has one node on its home instance. A thread allowed
//! to migrate between instances holds one node per eligible instance, and
//! when its home instance cannot schedule it the dispatcher walks the
//! other bindings asking each instance for help until one accepts.

extern crate alloc;

use alloc::vec::Vec;

use crate::scheduler::{NodeIndex, SchedulerOps, ThreadId};

/// Per-thread record of scheduler-instance bindings
#[derive(Clone, Debug)]
pub struct ThreadControl {
    id: ThreadId,
    /// (instance index, node handle) pairs, home instance first
    bindings: Vec<(usize, NodeIndex)>,
}

impl ThreadControl {
    pub fn new(id: ThreadId) -> Self {
        Self {
            id,
            bindings: Vec::new(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Record that `instance` holds `node` for this thread
    pub fn bind(&mut self, instance: usize, node: NodeIndex) {
        debug_assert!(self.bindings.iter().all(|&(i, _)| i != instance));
        self.bindings.push((instance, node));
    }

    /// Drop the binding to `instance`; returns the node handle for cleanup
    pub fn unbind(&mut self, instance: usize) -> Option<NodeIndex> {
        let position = self.bindings.iter().position(|&(i, _)| i == instance)?;
        Some(self.bindings.remove(position).1)
    }

    /// Node handle on `instance`, if bound
    pub fn node_on(&self, instance: usize) -> Option<NodeIndex> {
        self.bindings
            .iter()
            .find(|&&(i, _)| i == instance)
            .map(|&(_, node)| node)
    }

    /// All bindings, home instance first
    pub fn bindings(&self) -> &[(usize, NodeIndex)] {
        &self.bindings
    }
}

/// Walk a thread's instance bindings asking each for help in turn
///
/// This is the cross-instance half of the ask-for-help protocol: the
/// per-instance decision lives in the scheduler operation, the iteration
/// order here. Stops at the first instance that accepts; instances that
/// declined keep the node registered as ready and are told to reconsider
/// once one accepts.
pub fn ask_for_help<P: SchedulerOps>(instances: &mut [P], thread: &ThreadControl) -> bool {
    let mut accepted_at = None;

    for &(instance, node) in thread.bindings() {
        if instances[instance].ask_for_help(node) {
            accepted_at = Some(instance);
            break;
        }
    }

    let Some(accepted_at) = accepted_at else {
        return false;
    };

    for &(instance, node) in thread.bindings() {
        if instance != accepted_at {
            instances[instance].reconsider_help_request(node);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerNodeState, SmpPriorityScheduler};

    #[test]
    fn test_thread_control_bind_unbind() {
        let mut thread = ThreadControl::new(ThreadId(7));
        thread.bind(0, 4);
        thread.bind(1, 9);

        assert_eq!(thread.node_on(0), Some(4));
        assert_eq!(thread.node_on(1), Some(9));
        assert_eq!(thread.unbind(0), Some(4));
        assert_eq!(thread.node_on(0), None);
        assert_eq!(thread.unbind(0), None);
    }

    #[test]
    fn test_ask_for_help_walks_instances_in_order() {
        // Two single-processor instances; the home instance is busy with a
        // higher-priority thread, the second one is idle.
        let mut instances = [SmpPriorityScheduler::new(256), SmpPriorityScheduler::new(256)];
        instances[0].start_idle(0);
        instances[1].start_idle(1);

        let busy = instances[0].node_initialize(ThreadId(0), 5).unwrap();
        instances[0].unblock(busy);

        let mut migrant = ThreadControl::new(ThreadId(1));
        let home_node = instances[0].node_initialize(ThreadId(1), 10).unwrap();
        let away_node = instances[1].node_initialize(ThreadId(1), 10).unwrap();
        migrant.bind(0, home_node);
        migrant.bind(1, away_node);

        assert!(ask_for_help(&mut instances, &migrant));
        assert_eq!(
            instances[1].node_state(away_node),
            SchedulerNodeState::Scheduled,
            "the idle instance must take the thread"
        );
        assert_eq!(
            instances[0].node_state(home_node),
            SchedulerNodeState::Blocked,
            "the declined home registration is reconsidered away"
        );
    }

    #[test]
    fn test_ask_for_help_all_decline() {
        let mut instances = [SmpPriorityScheduler::new(256)];
        instances[0].start_idle(0);

        let busy = instances[0].node_initialize(ThreadId(0), 1).unwrap();
        instances[0].unblock(busy);

        let mut thread = ThreadControl::new(ThreadId(1));
        let node = instances[0].node_initialize(ThreadId(1), 9).unwrap();
        thread.bind(0, node);

        assert!(!ask_for_help(&mut instances, &thread));
        assert_eq!(
            instances[0].node_state(node),
            SchedulerNodeState::Ready,
            "a declined node stays ready for a later pickup"
        );
    }
}
