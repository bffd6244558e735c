//! Fixed-priority SMP scheduler
//!
//! The SMP generalization of the fixed-priority policy: the same bit-mapped
//! per-priority FIFO chains feed a set of owned processors instead of one.
//! The scheduled set always holds the highest-priority ready-or-scheduled
//! nodes, one per processor, ties broken by arrival order; the ask-for-help
//! protocol lets other instances hand a thread over when its home instance
//! has no processor for it.

use super::node::{NodeArena, NodeIndex};
use super::ops::SchedulerOps;
use super::priority::{self, PriorityControl};
use super::ready_queue::ReadyQueue;
use super::smp::{self, SmpContext, SmpPolicy};
use super::types::{CpuMask, SchedulerNodeState, SchedulerStats, ThreadId};

/// Fixed-priority scheduler instance for a set of processors
#[derive(Debug)]
pub struct SmpPriorityScheduler {
    smp: SmpContext,
    ready: ReadyQueue,
    priority_count: usize,
}

impl SmpPriorityScheduler {
    /// Create an instance with priorities `0..priority_count`
    pub fn new(priority_count: usize) -> Self {
        Self {
            smp: SmpContext::new(),
            ready: ReadyQueue::new(priority_count),
            priority_count,
        }
    }

    /// Per-instance statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.smp.stats
    }

    /// Number of owned processors
    pub fn processor_count(&self) -> usize {
        self.smp.cpus.count()
    }

    fn nodes(&self) -> &NodeArena {
        &self.smp.nodes
    }

    #[inline]
    fn chain_of(&self, node: NodeIndex) -> usize {
        priority::unmap(self.smp.nodes[node].priority) as usize
    }
}

impl SmpPolicy for SmpPriorityScheduler {
    fn smp(&self) -> &SmpContext {
        &self.smp
    }

    fn smp_mut(&mut self) -> &mut SmpContext {
        &mut self.smp
    }

    fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    fn get_highest_ready(&mut self, _for_cpu: usize) -> Option<NodeIndex> {
        self.ready.peek_highest()
    }

    fn insert_ready(&mut self, node: NodeIndex, insert_priority: PriorityControl) {
        let chain = priority::unmap(priority::purify(insert_priority)) as usize;
        if priority::is_append(insert_priority) {
            self.ready.insert_append(chain, node);
        } else {
            self.ready.insert_prepend(chain, node);
        }
    }

    fn extract_from_ready(&mut self, node: NodeIndex) {
        let chain = self.chain_of(node);
        self.ready.extract(chain, node);
    }
}

impl SchedulerOps for SmpPriorityScheduler {
    fn node_initialize(
        &mut self,
        thread: ThreadId,
        priority: u64,
    ) -> Result<NodeIndex, &'static str> {
        if priority >= self.priority_count as u64 {
            return Err("priority out of range");
        }
        Ok(self
            .smp
            .nodes
            .allocate(thread, priority::map(priority), CpuMask::all()))
    }

    fn node_destroy(&mut self, node: NodeIndex) {
        if self.smp.nodes[node].state != SchedulerNodeState::Blocked {
            smp::withdraw_node(self, node, SchedulerNodeState::Blocked);
        }
        self.smp.nodes.release(node);
    }

    fn schedule(&mut self) {
        smp::schedule(self);
    }

    fn block(&mut self, node: NodeIndex) {
        smp::block(self, node);
    }

    fn unblock(&mut self, node: NodeIndex) {
        smp::unblock(self, node);
    }

    fn update_priority(&mut self, node: NodeIndex, new_priority: u64) {
        let clamped = new_priority.min(self.priority_count as u64 - 1);
        smp::update_priority(self, node, priority::map(clamped));
    }

    fn yield_now(&mut self, node: NodeIndex) {
        smp::yield_now(self, node);
    }

    fn ask_for_help(&mut self, node: NodeIndex) -> bool {
        smp::ask_for_help(self, node)
    }

    fn reconsider_help_request(&mut self, node: NodeIndex) {
        smp::reconsider_help_request(self, node);
    }

    fn withdraw_node(&mut self, node: NodeIndex, next_state: SchedulerNodeState) {
        smp::withdraw_node(self, node, next_state);
    }

    fn add_processor(&mut self, cpu: usize) {
        smp::add_processor(self, cpu);
    }

    fn remove_processor(&mut self, cpu: usize) -> Result<(), &'static str> {
        smp::remove_processor(self, cpu)
    }

    fn start_idle(&mut self, cpu: usize) {
        self.smp.cpus.add(cpu);
        log::info!("fixed-priority smp scheduler idle on cpu {}", cpu);
    }

    fn get_affinity(&self, node: NodeIndex) -> CpuMask {
        self.nodes()[node].affinity
    }

    fn set_affinity(&mut self, node: NodeIndex, affinity: CpuMask) -> bool {
        // This policy schedules on any owned processor; only a mask that
        // still covers the whole owned set is acceptable.
        if self.smp.cpus.iter().any(|cpu| !affinity.is_set(cpu.index())) {
            return false;
        }
        self.smp.nodes[node].affinity = affinity;
        true
    }

    fn heir_of(&self, cpu: usize) -> Option<ThreadId> {
        let position = self.smp.cpus.position_of(cpu)?;
        let heir = self.smp.cpus.get(position).heir()?;
        Some(self.smp.nodes[heir].thread)
    }

    fn node_state(&self, node: NodeIndex) -> SchedulerNodeState {
        self.smp.nodes[node].state
    }

    fn node_priority(&self, node: NodeIndex) -> u64 {
        priority::unmap(self.smp.nodes[node].priority)
    }
}
