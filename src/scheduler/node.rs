//! Scheduler nodes and the per-instance node arena
//!
//! A scheduler node is the per-thread, per-instance scheduling state. Nodes
//! live in a slot arena owned by the scheduler instance; every ready and
//! scheduled structure stores `NodeIndex` handles into this arena instead of
//! pointers, so destroying a node can never leave a dangling reference
//! behind — a stale index is caught by the liveness flag.

extern crate alloc;

use alloc::vec::Vec;

use super::priority::PriorityControl;
use super::types::{CpuMask, SchedulerNodeState, ThreadId};

/// Handle to a scheduler node within one instance's arena
pub type NodeIndex = usize;

/// Per-thread, per-instance scheduling state
#[derive(Clone, Debug)]
pub struct SchedulerNode {
    /// Owning thread
    pub thread: ThreadId,
    /// Current state with respect to this instance
    pub state: SchedulerNodeState,
    /// Current priority key (shifted encoding, insert-order bit stripped)
    pub priority: PriorityControl,
    /// Insert generation for stable FIFO tie-breaks in ordered structures
    pub generation: i64,
    /// Processors this node may run on
    pub affinity: CpuMask,
    /// Processor the node is pinned to, if any
    pub pin_cpu: Option<usize>,
    /// Affinity to restore when the pin is released
    pub unpin_affinity: CpuMask,
    /// Owned-processor position the node is scheduled on, if any
    pub cpu: Option<usize>,
    /// Scratch: processor this node would preempt (affinity BFS)
    pub cpu_to_preempt: usize,
    /// Absolute deadline of the active job, if any (EDF)
    pub active_deadline: Option<u64>,
    /// Real priority to revert to when no job is active (EDF)
    pub background_priority: u64,
    /// Slot liveness flag, false once destroyed
    live: bool,
}

impl SchedulerNode {
    fn new(thread: ThreadId, priority: PriorityControl, affinity: CpuMask) -> Self {
        Self {
            thread,
            state: SchedulerNodeState::Blocked,
            priority,
            generation: 0,
            affinity,
            pin_cpu: None,
            unpin_affinity: affinity,
            cpu: None,
            cpu_to_preempt: 0,
            active_deadline: None,
            background_priority: 0,
            live: true,
        }
    }
}

/// Slot arena holding all scheduler nodes of one instance
///
/// Freed slots are recycled; allocation happens only at node initialization,
/// never inside a scheduling operation.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<SchedulerNode>,
    free: Vec<NodeIndex>,
}

impl NodeArena {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocate a node in the blocked state
    pub fn allocate(
        &mut self,
        thread: ThreadId,
        priority: PriorityControl,
        affinity: CpuMask,
    ) -> NodeIndex {
        let node = SchedulerNode::new(thread, priority, affinity);

        match self.free.pop() {
            Some(index) => {
                self.slots[index] = node;
                index
            }
            None => {
                self.slots.push(node);
                self.slots.len() - 1
            }
        }
    }

    /// Release a node's slot for reuse
    ///
    /// The node must be unlinked (blocked or other); the caller withdraws
    /// it first if necessary.
    pub fn release(&mut self, index: NodeIndex) {
        debug_assert!(matches!(
            self.slots[index].state,
            SchedulerNodeState::Blocked | SchedulerNodeState::Other
        ));
        self.slots[index].live = false;
        self.free.push(index);
    }

    /// Check whether a handle refers to a live node
    #[inline]
    pub fn is_live(&self, index: NodeIndex) -> bool {
        index < self.slots.len() && self.slots[index].live
    }

    /// Number of live nodes
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Iterate over (index, node) pairs of live nodes
    pub fn iter_live(&self) -> impl Iterator<Item = (NodeIndex, &SchedulerNode)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, node)| node.live)
    }
}

impl core::ops::Index<NodeIndex> for NodeArena {
    type Output = SchedulerNode;

    #[inline]
    fn index(&self, index: NodeIndex) -> &SchedulerNode {
        debug_assert!(self.slots[index].live, "stale node handle");
        &self.slots[index]
    }
}

impl core::ops::IndexMut<NodeIndex> for NodeArena {
    #[inline]
    fn index_mut(&mut self, index: NodeIndex) -> &mut SchedulerNode {
        debug_assert!(self.slots[index].live, "stale node handle");
        &mut self.slots[index]
    }
}
