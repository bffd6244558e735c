//! Strong arbitrary-processor-affinity SMP scheduler
//!
//! Supports per-thread arbitrary (non-contiguous) processor affinity masks
//! while keeping every processor's heir a highest-priority node compatible
//! with it. Compatibility is "intersects this node's affinity mask", not
//! "same instance", so the ready structure is one flat chain of all
//! non-blocked nodes (ready and scheduled): priority-bucketed chains cannot
//! answer "highest priority compatible with mask M" without degrading to
//! the same scan this policy does openly.
//!
//! Placement decisions run a breadth-first search over the processors
//! reachable through affinity intersections:
//!
//! - on arrival, the search finds the lowest-priority reachable scheduled
//!   node (or an idle processor) and shifts the displaced nodes one step
//!   each along the discovered path;
//! - on departure, the dual search finds the highest-priority ready node
//!   that can reach the vacated processor, again shifting scheduled nodes
//!   along the path.
//!
//! Both scans are O(nodes × processors). That cost is the documented trade
//! for exact priority-optimal placement under arbitrary masks.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use super::node::NodeIndex;
use super::ops::SchedulerOps;
use super::priority::{self, PriorityControl};
use super::smp::{self, SmpContext, SmpPolicy};
use super::types::{CpuMask, SchedulerNodeState, SchedulerStats, ThreadId};

/// Strong-APA scheduler instance
#[derive(Debug)]
pub struct StrongApaScheduler {
    smp: SmpContext,
    /// All non-blocked nodes, in arrival order
    chain: Vec<NodeIndex>,
    priority_count: usize,
}

impl StrongApaScheduler {
    /// Create an instance with priorities `0..priority_count`
    pub fn new(priority_count: usize) -> Self {
        Self {
            smp: SmpContext::new(),
            chain: Vec::new(),
            priority_count,
        }
    }

    /// Per-instance statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.smp.stats
    }

    /// Processor (global index) a node is currently scheduled on
    pub fn assigned_cpu(&self, node: NodeIndex) -> Option<usize> {
        self.smp.nodes[node].cpu
    }

    fn on_chain(&self, node: NodeIndex) -> bool {
        self.chain.contains(&node)
    }

    /// Arrival search: lowest-priority scheduled node (or idle processor)
    /// reachable from `node`'s affinity set
    ///
    /// Fills `preempting[position]` with the node that would take that
    /// processor over, so the caller can backtrack the displacement path.
    /// Returns `(lowest_key, lowest_position, displaced)` where `displaced`
    /// is the scheduled node losing its processor (`None` for idle).
    fn lowest_reachable(
        &mut self,
        node: NodeIndex,
        preempting: &mut [Option<NodeIndex>],
    ) -> Option<(u64, usize, Option<NodeIndex>)> {
        let count = self.smp.cpus.count();
        let mut visited = vec![false; count];
        let mut queue: Vec<usize> = Vec::with_capacity(count);

        for position in 0..count {
            let cpu_index = self.smp.cpus.get(position).index();
            if self.smp.nodes[node].affinity.is_set(cpu_index) {
                visited[position] = true;
                preempting[position] = Some(node);
                queue.push(position);
            }
        }
        if queue.is_empty() {
            return None;
        }

        let mut lowest: Option<(u64, usize, Option<NodeIndex>)> = None;
        let mut front = 0;
        while front < queue.len() {
            let position = queue[front];
            front += 1;

            match self.smp.cpus.get(position).heir() {
                None => {
                    // An idle processor is the lowest priority there is.
                    if lowest.map_or(true, |(best, _, _)| best < u64::MAX) {
                        lowest = Some((u64::MAX, position, None));
                    }
                }
                Some(occupant) => {
                    let key = self.smp.nodes[occupant].priority;
                    if lowest.map_or(true, |(best, _, _)| key > best) {
                        lowest = Some((key, position, Some(occupant)));
                    }

                    // Expand through the occupant's other eligible
                    // processors.
                    let affinity = self.smp.nodes[occupant].affinity;
                    for other in 0..count {
                        let cpu_index = self.smp.cpus.get(other).index();
                        if !visited[other] && affinity.is_set(cpu_index) {
                            visited[other] = true;
                            preempting[other] = Some(occupant);
                            queue.push(other);
                        }
                    }
                }
            }
        }
        lowest
    }

    /// Apply the displacement path: every mover takes the processor its
    /// discovery recorded, ending at the processor of the displaced node
    fn shift_and_place(
        &mut self,
        node: NodeIndex,
        insert_priority: PriorityControl,
        lowest_position: usize,
        displaced: Option<NodeIndex>,
        preempting: &[Option<NodeIndex>],
    ) {
        // Backtrack from the vacating processor to the arriving node.
        let mut moves: Vec<(NodeIndex, usize)> = Vec::new();
        let mut position = lowest_position;
        loop {
            let mover = match preempting[position] {
                Some(mover) => mover,
                None => break,
            };
            moves.push((mover, self.smp.cpus.get(position).index()));
            if mover == node {
                break;
            }
            position = match self.smp.nodes[mover].cpu.and_then(|cpu| self.smp.cpus.position_of(cpu))
            {
                Some(position) => position,
                None => break,
            };
        }

        // The displaced node leaves the scheduled set before the arriving
        // one enters, keeping the set no larger than the processor count.
        if let Some(displaced) = displaced {
            self.move_from_scheduled_to_ready(displaced);
            self.smp.stats.preemptions += 1;
        }

        for &(mover, target) in moves.iter().rev() {
            if mover == node {
                self.smp.insert_scheduled(node, insert_priority);
            }
            self.smp.allocate_processor(mover, target);
        }
    }
}

impl SmpPolicy for StrongApaScheduler {
    fn smp(&self) -> &SmpContext {
        &self.smp
    }

    fn smp_mut(&mut self) -> &mut SmpContext {
        &mut self.smp
    }

    fn has_ready(&self) -> bool {
        self.chain
            .iter()
            .any(|&node| self.smp.nodes[node].state == SchedulerNodeState::Ready)
    }

    /// Departure search: best ready node able to reach `for_cpu`, shifting
    /// scheduled nodes along the affinity path when it is not directly
    /// compatible
    fn get_highest_ready(&mut self, for_cpu: usize) -> Option<NodeIndex> {
        let count = self.smp.cpus.count();
        let root = self.smp.cpus.position_of(for_cpu)?;

        let mut visited = vec![false; count];
        let mut queue: Vec<usize> = Vec::with_capacity(count);
        visited[root] = true;
        queue.push(root);

        let mut best: Option<NodeIndex> = None;
        let mut best_key = u64::MAX;
        let mut front = 0;

        while front < queue.len() {
            let position = queue[front];
            front += 1;
            let cpu_index = self.smp.cpus.get(position).index();

            for i in 0..self.chain.len() {
                let candidate = self.chain[i];
                if !self.smp.nodes[candidate].affinity.is_set(cpu_index) {
                    continue;
                }
                match self.smp.nodes[candidate].state {
                    SchedulerNodeState::Scheduled => {
                        let assigned = self.smp.nodes[candidate]
                            .cpu
                            .and_then(|cpu| self.smp.cpus.position_of(cpu));
                        if let Some(assigned) = assigned {
                            if !visited[assigned] {
                                visited[assigned] = true;
                                queue.push(assigned);
                                // The node may fall back to the processor
                                // that discovered it.
                                self.smp.nodes[candidate].cpu_to_preempt = cpu_index;
                            }
                        }
                    }
                    SchedulerNodeState::Ready => {
                        let key = self.smp.nodes[candidate].priority;
                        if key < best_key {
                            best_key = key;
                            best = Some(candidate);
                            self.smp.nodes[candidate].cpu_to_preempt = cpu_index;
                        }
                    }
                    SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
                }
            }
        }

        let best = best?;

        // Shift scheduled nodes along the path until the slot directly
        // reachable from `for_cpu` is free for the returned node.
        let mut node = best;
        loop {
            let target = self.smp.nodes[node].cpu_to_preempt;
            if target == for_cpu {
                break;
            }
            let victim = self
                .smp
                .cpus
                .position_of(target)
                .and_then(|position| self.smp.cpus.get(position).heir());
            if node == best {
                self.move_from_ready_to_scheduled(node);
            }
            self.smp.allocate_processor(node, target);
            match victim {
                Some(victim) => node = victim,
                None => break,
            }
        }

        if node != best {
            // The final shifted node hands its processor to the caller.
            self.move_from_scheduled_to_ready(node);
        }
        Some(node)
    }

    fn get_lowest_scheduled(&self, node: NodeIndex) -> Option<NodeIndex> {
        let affinity = self.smp.nodes[node].affinity;
        let mut lowest: Option<NodeIndex> = None;
        for cpu in self.smp.cpus.iter() {
            if !affinity.is_set(cpu.index()) {
                continue;
            }
            if let Some(occupant) = cpu.heir() {
                if lowest.map_or(true, |best| {
                    self.smp.nodes[occupant].priority > self.smp.nodes[best].priority
                }) {
                    lowest = Some(occupant);
                }
            }
        }
        lowest
    }

    fn find_idle_cpu(&self, node: NodeIndex) -> Option<usize> {
        let affinity = self.smp.nodes[node].affinity;
        self.smp
            .cpus
            .iter()
            .find(|cpu| cpu.heir().is_none() && affinity.is_set(cpu.index()))
            .map(|cpu| cpu.index())
    }

    fn insert_ready(&mut self, node: NodeIndex, _insert_priority: PriorityControl) {
        if !self.on_chain(node) {
            self.chain.push(node);
        }
    }

    fn extract_from_ready(&mut self, node: NodeIndex) {
        self.chain.retain(|&other| other != node);
    }

    fn move_from_ready_to_scheduled(&mut self, node: NodeIndex) {
        // Scheduled nodes stay on the flat chain; only the scheduled set
        // changes.
        let insert_priority = priority::append(self.smp.nodes[node].priority);
        self.smp.insert_scheduled(node, insert_priority);
    }

    /// Arrival: BFS for an idle or preemptable processor reachable through
    /// affinity intersections
    fn enqueue(&mut self, node: NodeIndex, insert_priority: PriorityControl) -> bool {
        let count = self.smp.cpus.count();
        let mut preempting: Vec<Option<NodeIndex>> = vec![None; count];

        let lowest = self.lowest_reachable(node, &mut preempting);
        let node_key = priority::purify(insert_priority);

        let scheduled = match lowest {
            Some((lowest_key, lowest_position, displaced)) if node_key < lowest_key => {
                self.smp.nodes[node].state = SchedulerNodeState::Scheduled;
                self.shift_and_place(node, insert_priority, lowest_position, displaced, &preempting);
                true
            }
            _ => {
                self.smp.nodes[node].state = SchedulerNodeState::Ready;
                false
            }
        };

        // The node joins the flat chain whether scheduled or merely ready.
        if !self.on_chain(node) {
            self.chain.push(node);
        }
        scheduled
    }
}

impl SchedulerOps for StrongApaScheduler {
    fn node_initialize(
        &mut self,
        thread: ThreadId,
        priority_value: u64,
    ) -> Result<NodeIndex, &'static str> {
        if priority_value >= self.priority_count as u64 {
            return Err("priority out of range");
        }
        Ok(self
            .smp
            .nodes
            .allocate(thread, priority::map(priority_value), CpuMask::all()))
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

    fn pin(&mut self, node: NodeIndex, cpu: usize) {
        if self.smp.nodes[node].pin_cpu.is_some() {
            return;
        }
        self.smp.nodes[node].unpin_affinity = self.smp.nodes[node].affinity;
        self.smp.nodes[node].pin_cpu = Some(cpu);
        self.apply_affinity(node, CpuMask::single(cpu));
    }

    fn unpin(&mut self, node: NodeIndex, _cpu: usize) {
        // Unpinning without a prior pin is a no-op.
        if self.smp.nodes[node].pin_cpu.take().is_none() {
            return;
        }
        let restored = self.smp.nodes[node].unpin_affinity;
        self.apply_affinity(node, restored);
    }

    fn add_processor(&mut self, cpu: usize) {
        smp::add_processor(self, cpu);
    }

    fn remove_processor(&mut self, cpu: usize) -> Result<(), &'static str> {
        smp::remove_processor(self, cpu)
    }

    fn start_idle(&mut self, cpu: usize) {
        self.smp.cpus.add(cpu);
        log::info!("strong-apa scheduler idle on cpu {}", cpu);
    }

    fn get_affinity(&self, node: NodeIndex) -> CpuMask {
        match self.smp.nodes[node].pin_cpu {
            Some(_) => self.smp.nodes[node].unpin_affinity,
            None => self.smp.nodes[node].affinity,
        }
    }

    fn set_affinity(&mut self, node: NodeIndex, affinity: CpuMask) -> bool {
        let reachable = self
            .smp
            .cpus
            .iter()
            .any(|cpu| affinity.is_set(cpu.index()));
        if !reachable {
            return false;
        }

        if self.smp.nodes[node].pin_cpu.is_some() {
            // Pinned: the new mask takes effect at unpin.
            self.smp.nodes[node].unpin_affinity = affinity;
            return true;
        }

        log::debug!(
            "affinity of {} set to {:#x}",
            self.smp.nodes[node].thread,
            affinity.bits()
        );
        self.apply_affinity(node, affinity);
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

impl StrongApaScheduler {
    /// Install a new mask and re-place the node under it
    fn apply_affinity(&mut self, node: NodeIndex, affinity: CpuMask) {
        let state = self.smp.nodes[node].state;
        match state {
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
                self.smp.nodes[node].affinity = affinity;
            }
            SchedulerNodeState::Ready | SchedulerNodeState::Scheduled => {
                // Re-evaluate placement: take the node out, change the
                // mask, and run a fresh arrival decision.
                smp::withdraw_node(self, node, SchedulerNodeState::Blocked);
                self.smp.nodes[node].affinity = affinity;
                smp::unblock(self, node);
            }
        }
    }
}
