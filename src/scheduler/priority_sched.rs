//! Uniprocessor fixed-priority scheduler
//!
//! The classic deterministic priority policy: one FIFO chain per priority,
//! a bit map to find the highest occupied priority in O(1), and a single
//! owned processor whose heir is always the head of the highest occupied
//! chain. Equal-priority threads round-robin by arrival order.

use super::node::{NodeArena, NodeIndex};
use super::ops::SchedulerOps;
use super::percpu::ProcessorSet;
use super::priority;
use super::ready_queue::ReadyQueue;
use super::types::{CpuMask, SchedulerNodeState, SchedulerStats, ThreadId};

/// Fixed-priority scheduler instance for one processor
#[derive(Debug)]
pub struct PriorityScheduler {
    nodes: NodeArena,
    ready: ReadyQueue,
    cpus: ProcessorSet,
    stats: SchedulerStats,
    priority_count: usize,
}

impl PriorityScheduler {
    /// Create an instance with priorities `0..priority_count`
    ///
    /// No processor is owned yet; call [`SchedulerOps::start_idle`] or
    /// [`SchedulerOps::add_processor`] to attach one.
    pub fn new(priority_count: usize) -> Self {
        Self {
            nodes: NodeArena::new(),
            ready: ReadyQueue::new(priority_count),
            cpus: ProcessorSet::new(),
            stats: SchedulerStats::new(),
            priority_count,
        }
    }

    /// Per-instance statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Check and clear the owned processor's reschedule flag
    pub fn take_need_resched(&self) -> bool {
        self.cpus.iter().next().is_some_and(|cpu| cpu.take_need_resched())
    }

    #[inline]
    fn chain_of(&self, node: NodeIndex) -> usize {
        priority::unmap(self.nodes[node].priority) as usize
    }

    /// Install `heir` on the single owned processor
    fn set_heir(&mut self, heir: Option<NodeIndex>) {
        let cpu_index = self.cpus.get(0).index();
        if let Some(node) = heir {
            self.nodes[node].state = SchedulerNodeState::Scheduled;
            self.nodes[node].cpu = Some(cpu_index);
        }
        self.cpus.get_mut(0).set_heir(heir);
        self.stats.heir_changes += 1;
    }

    /// Replace the heir with the highest ready node (or idle)
    fn schedule_next(&mut self) {
        let next = self.ready.pop_highest().map(|(_, node)| node);
        self.set_heir(next);
    }
}

impl SchedulerOps for PriorityScheduler {
    fn node_initialize(
        &mut self,
        thread: ThreadId,
        priority: u64,
    ) -> Result<NodeIndex, &'static str> {
        if priority >= self.priority_count as u64 {
            return Err("priority out of range");
        }
        Ok(self
            .nodes
            .allocate(thread, priority::map(priority), CpuMask::all()))
    }

    fn node_destroy(&mut self, node: NodeIndex) {
        if self.nodes[node].state != SchedulerNodeState::Blocked {
            self.withdraw_node(node, SchedulerNodeState::Blocked);
        }
        self.nodes.release(node);
    }

    fn schedule(&mut self) {
        if self.cpus.count() != 0 && self.cpus.get(0).heir().is_none() {
            if let Some((_, node)) = self.ready.pop_highest() {
                self.set_heir(Some(node));
            }
        }
    }

    fn block(&mut self, node: NodeIndex) {
        match self.nodes[node].state {
            SchedulerNodeState::Scheduled => {
                self.nodes[node].state = SchedulerNodeState::Blocked;
                self.nodes[node].cpu = None;
                self.schedule_next();
            }
            SchedulerNodeState::Ready => {
                let chain = self.chain_of(node);
                self.ready.extract(chain, node);
                self.nodes[node].state = SchedulerNodeState::Blocked;
            }
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
        }
    }

    fn unblock(&mut self, node: NodeIndex) {
        if self.nodes[node].state != SchedulerNodeState::Blocked {
            return;
        }

        if self.cpus.count() == 0 {
            self.nodes[node].state = SchedulerNodeState::Ready;
            let chain = self.chain_of(node);
            self.ready.insert_append(chain, node);
            return;
        }

        match self.cpus.get(0).heir() {
            None => self.set_heir(Some(node)),
            Some(heir) => {
                // Append semantics: a freshly readied node preempts only a
                // strictly lower priority heir.
                let insert = priority::append(self.nodes[node].priority);
                if insert < self.nodes[heir].priority {
                    self.nodes[heir].state = SchedulerNodeState::Ready;
                    self.nodes[heir].cpu = None;
                    let chain = self.chain_of(heir);
                    // The preempted heir keeps its turn: front of its chain.
                    self.ready.insert_prepend(chain, heir);
                    self.set_heir(Some(node));
                    self.stats.preemptions += 1;
                } else {
                    self.nodes[node].state = SchedulerNodeState::Ready;
                    let chain = self.chain_of(node);
                    self.ready.insert_append(chain, node);
                }
            }
        }
    }

    fn update_priority(&mut self, node: NodeIndex, new_priority: u64) {
        let new_key = priority::map(new_priority.min(self.priority_count as u64 - 1));
        if self.nodes[node].priority == new_key {
            return;
        }

        match self.nodes[node].state {
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
                self.nodes[node].priority = new_key;
            }
            SchedulerNodeState::Ready => {
                let old_chain = self.chain_of(node);
                self.ready.extract(old_chain, node);
                self.nodes[node].priority = new_key;
                let new_chain = self.chain_of(node);
                self.ready.insert_append(new_chain, node);

                // The re-keyed node may now beat the heir.
                if self.cpus.count() != 0 {
                    if let (Some(heir), Some(first)) =
                        (self.cpus.get(0).heir(), self.ready.peek_highest())
                    {
                        let insert = priority::append(self.nodes[first].priority);
                        if insert < self.nodes[heir].priority {
                            self.nodes[heir].state = SchedulerNodeState::Ready;
                            self.nodes[heir].cpu = None;
                            let chain = self.chain_of(heir);
                            self.ready.insert_prepend(chain, heir);
                            self.schedule_next();
                            self.stats.preemptions += 1;
                        }
                    }
                }
            }
            SchedulerNodeState::Scheduled => {
                self.nodes[node].priority = new_key;

                // The heir may have dropped below the best ready node.
                if let Some(first) = self.ready.peek_highest() {
                    let insert = priority::append(self.nodes[first].priority);
                    if insert < new_key {
                        self.nodes[node].state = SchedulerNodeState::Ready;
                        self.nodes[node].cpu = None;
                        let chain = self.chain_of(node);
                        self.ready.insert_append(chain, node);
                        self.schedule_next();
                        self.stats.preemptions += 1;
                    }
                }
            }
        }
    }

    fn yield_now(&mut self, node: NodeIndex) {
        match self.nodes[node].state {
            SchedulerNodeState::Scheduled => {
                self.nodes[node].state = SchedulerNodeState::Ready;
                self.nodes[node].cpu = None;
                let chain = self.chain_of(node);
                self.ready.insert_append(chain, node);
                self.schedule_next();
            }
            SchedulerNodeState::Ready => {
                let chain = self.chain_of(node);
                self.ready.extract(chain, node);
                self.ready.insert_append(chain, node);
            }
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
        }
    }

    fn withdraw_node(&mut self, node: NodeIndex, next_state: SchedulerNodeState) {
        match self.nodes[node].state {
            SchedulerNodeState::Scheduled => {
                self.nodes[node].state = next_state;
                self.nodes[node].cpu = None;
                self.schedule_next();
            }
            SchedulerNodeState::Ready => {
                let chain = self.chain_of(node);
                self.ready.extract(chain, node);
                self.nodes[node].state = next_state;
            }
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
        }
    }

    fn add_processor(&mut self, cpu: usize) {
        if self.cpus.count() != 0 {
            log::warn!("uniprocessor scheduler already owns a processor");
            return;
        }
        self.cpus.add(cpu);
        log::info!("fixed-priority scheduler attached to cpu {}", cpu);
        self.schedule();
    }

    fn remove_processor(&mut self, _cpu: usize) -> Result<(), &'static str> {
        Err("uniprocessor scheduler keeps its processor")
    }

    fn start_idle(&mut self, cpu: usize) {
        if self.cpus.count() != 0 {
            log::warn!("uniprocessor scheduler already owns a processor");
            return;
        }
        self.cpus.add(cpu);
        log::info!("fixed-priority scheduler idle on cpu {}", cpu);
    }

    fn get_affinity(&self, node: NodeIndex) -> CpuMask {
        self.nodes[node].affinity
    }

    fn set_affinity(&mut self, node: NodeIndex, affinity: CpuMask) -> bool {
        if self.cpus.count() == 0 || !affinity.is_set(self.cpus.get(0).index()) {
            return false;
        }
        self.nodes[node].affinity = affinity;
        true
    }

    fn heir_of(&self, cpu: usize) -> Option<ThreadId> {
        let position = self.cpus.position_of(cpu)?;
        let heir = self.cpus.get(position).heir()?;
        Some(self.nodes[heir].thread)
    }

    fn node_state(&self, node: NodeIndex) -> SchedulerNodeState {
        self.nodes[node].state
    }

    fn node_priority(&self, node: NodeIndex) -> u64 {
        priority::unmap(self.nodes[node].priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with(priorities: &[u64]) -> (PriorityScheduler, alloc::vec::Vec<NodeIndex>) {
        let mut sched = PriorityScheduler::new(256);
        sched.start_idle(0);
        let nodes = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| sched.node_initialize(ThreadId(i as u32), p).unwrap())
            .collect();
        (sched, nodes)
    }

    #[test]
    fn test_priority_sched_classic_scenario() {
        // Three threads at priorities {5, 10, 10}; lower number wins.
        let (mut sched, nodes) = scheduler_with(&[5, 10, 10]);

        sched.unblock(nodes[0]);
        sched.unblock(nodes[1]);
        sched.unblock(nodes[2]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));

        // Heir blocks: first of the equal-priority pair takes over.
        sched.block(nodes[0]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(1)));

        // Yield: the second equal-priority thread gets its turn.
        sched.yield_now(nodes[1]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(2)));
    }

    #[test]
    fn test_priority_sched_unblock_preempts_lower() {
        let (mut sched, nodes) = scheduler_with(&[20, 3]);

        sched.unblock(nodes[0]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));

        sched.unblock(nodes[1]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(1)));
        assert_eq!(sched.node_state(nodes[0]), SchedulerNodeState::Ready);

        // The preempted thread resumes once the high-priority one blocks.
        sched.block(nodes[1]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));
    }

    #[test]
    fn test_priority_sched_equal_priority_does_not_preempt() {
        let (mut sched, nodes) = scheduler_with(&[10, 10]);

        sched.unblock(nodes[0]);
        sched.unblock(nodes[1]);
        assert_eq!(
            sched.heir_of(0),
            Some(ThreadId(0)),
            "equal priority must not displace the running thread"
        );
    }

    #[test]
    fn test_priority_sched_yield_cycles_in_insertion_order() {
        let (mut sched, nodes) = scheduler_with(&[10, 10, 10]);
        for &node in &nodes {
            sched.unblock(node);
        }

        // Two full rotations visit every thread twice, in order.
        let mut seen = alloc::vec::Vec::new();
        for _ in 0..6 {
            let heir = sched.heir_of(0).unwrap();
            seen.push(heir.0);
            let heir_node = nodes[heir.0 as usize];
            sched.yield_now(heir_node);
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_priority_sched_update_priority_repositions() {
        let (mut sched, nodes) = scheduler_with(&[10, 20]);
        sched.unblock(nodes[0]);
        sched.unblock(nodes[1]);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));

        // Raising the ready node above the heir preempts it.
        sched.update_priority(nodes[1], 5);
        assert_eq!(sched.heir_of(0), Some(ThreadId(1)));
        assert_eq!(sched.node_priority(nodes[1]), 5);

        // Dropping the heir below a ready node demotes it.
        sched.update_priority(nodes[1], 30);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));
    }

    #[test]
    fn test_priority_sched_node_round_trip_leaves_ready_unchanged() {
        let (mut sched, nodes) = scheduler_with(&[5]);
        sched.unblock(nodes[0]);

        let extra = sched.node_initialize(ThreadId(99), 7).unwrap();
        sched.node_destroy(extra);

        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));
        sched.block(nodes[0]);
        assert_eq!(sched.heir_of(0), None, "ready structure must be unchanged");
    }

    #[test]
    fn test_priority_sched_out_of_range_priority_is_config_error() {
        let mut sched = PriorityScheduler::new(256);
        assert!(sched.node_initialize(ThreadId(0), 256).is_err());
        assert!(sched.node_initialize(ThreadId(0), 255).is_ok());
    }

    #[test]
    fn test_priority_sched_withdraw_twice_is_noop() {
        let (mut sched, nodes) = scheduler_with(&[5, 9]);
        sched.unblock(nodes[0]);
        sched.unblock(nodes[1]);

        sched.withdraw_node(nodes[1], SchedulerNodeState::Blocked);
        sched.withdraw_node(nodes[1], SchedulerNodeState::Blocked);

        assert_eq!(sched.node_state(nodes[1]), SchedulerNodeState::Blocked);
        assert_eq!(sched.heir_of(0), Some(ThreadId(0)));
    }
}
