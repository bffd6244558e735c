//! Earliest-deadline-first scheduler
//!
//! Ready threads are ordered by absolute deadline in a balanced tree; the
//! heir is always the tree minimum. Threads without an active job carry a
//! background priority that sorts behind every deadline, so deadline-driven
//! and background threads share the one ordered structure (see the key
//! encoding in [`super::priority`]).
//!
//! Deadlines wrap: comparison is serial-number arithmetic, exact while live
//! deadlines span less than half the deadline domain. A job released with a
//! deadline already in the past is accepted and simply sorts most-urgent;
//! detecting the miss is the period manager's business, surfaced here only
//! as the [`JobReleaseStatus::Overrun`] indicator when a new job arrives
//! before the previous one finished.

extern crate alloc;

use alloc::collections::BTreeMap;

use super::node::{NodeArena, NodeIndex};
use super::ops::{JobReleaseStatus, SchedulerOps};
use super::percpu::ProcessorSet;
use super::priority::{self, PriorityControl, DEADLINE_MASK};
use super::types::{CpuMask, SchedulerNodeState, SchedulerStats, ThreadId};

/// Ready-tree key: purified priority key plus insert generation
///
/// The generation breaks deadline ties in FIFO order: append inserts take
/// rising generations, prepend inserts falling ones, so both directions
/// stay stable under one comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct EdfKey {
    key: PriorityControl,
    generation: i64,
}

impl Ord for EdfKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        priority::edf_key_cmp(self.key, other.key)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for EdfKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// EDF scheduler instance for one processor
#[derive(Debug)]
pub struct EdfScheduler {
    nodes: NodeArena,
    ready: BTreeMap<EdfKey, NodeIndex>,
    cpus: ProcessorSet,
    stats: SchedulerStats,
    generations: [i64; 2],
    clock: u64,
}

impl EdfScheduler {
    pub fn new() -> Self {
        Self {
            nodes: NodeArena::new(),
            ready: BTreeMap::new(),
            cpus: ProcessorSet::new(),
            stats: SchedulerStats::new(),
            generations: [0, 0],
            clock: 0,
        }
    }

    /// Per-instance statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Current tick count of this instance
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Stamp the node's generation and insert it into the ready tree
    fn insert_ready(&mut self, node: NodeIndex, insert_priority: PriorityControl) {
        let index = priority::is_append(insert_priority) as usize;
        let increment = ((index as i64) << 1) - 1;
        let generation = self.generations[index];
        self.generations[index] += increment;

        self.nodes[node].generation = generation;
        self.nodes[node].state = SchedulerNodeState::Ready;
        let key = EdfKey {
            key: priority::purify(insert_priority),
            generation,
        };
        self.ready.insert(key, node);
    }

    fn extract_ready(&mut self, node: NodeIndex) {
        let key = EdfKey {
            key: self.nodes[node].priority,
            generation: self.nodes[node].generation,
        };
        self.ready.remove(&key);
    }

    fn peek_first(&self) -> Option<NodeIndex> {
        self.ready.iter().next().map(|(_, &node)| node)
    }

    fn pop_first(&mut self) -> Option<NodeIndex> {
        let key = *self.ready.iter().next().map(|(key, _)| key)?;
        self.ready.remove(&key)
    }

    /// Whether an insert at `insert_priority` displaces `resident_key`
    fn insert_beats(insert_priority: PriorityControl, resident_key: PriorityControl) -> bool {
        use core::cmp::Ordering;
        match priority::edf_key_cmp(priority::purify(insert_priority), resident_key) {
            Ordering::Less => true,
            Ordering::Equal => !priority::is_append(insert_priority),
            Ordering::Greater => false,
        }
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

    fn schedule_next(&mut self) {
        let next = self.pop_first();
        self.set_heir(next);
    }

    /// Re-key a node whose priority key changed
    ///
    /// `displace_equals` selects prepend ordering on a rising key (priority
    /// inheritance displaces equal-key peers); job releases always append so
    /// equal deadlines stay FIFO by release order.
    fn change_key(&mut self, node: NodeIndex, new_key: PriorityControl, displace_equals: bool) {
        let old_key = self.nodes[node].priority;
        if old_key == new_key {
            return;
        }

        let rising = priority::edf_key_cmp(new_key, old_key) == core::cmp::Ordering::Less;
        let insert_priority = if displace_equals && rising {
            priority::prepend(new_key)
        } else {
            priority::append(new_key)
        };

        match self.nodes[node].state {
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
                self.nodes[node].priority = new_key;
            }
            SchedulerNodeState::Ready => {
                self.extract_ready(node);
                self.nodes[node].priority = new_key;
                self.insert_ready(node, insert_priority);
                self.maybe_preempt_heir();
            }
            SchedulerNodeState::Scheduled => {
                self.nodes[node].priority = new_key;
                if let Some(first) = self.peek_first() {
                    let first_key = priority::append(self.nodes[first].priority);
                    if Self::insert_beats(first_key, new_key) {
                        self.nodes[node].state = SchedulerNodeState::Ready;
                        self.nodes[node].cpu = None;
                        self.insert_ready(node, priority::append(new_key));
                        self.schedule_next();
                        self.stats.preemptions += 1;
                    }
                }
            }
        }
    }

    /// Swap the heir for the tree minimum when the minimum became more
    /// urgent
    fn maybe_preempt_heir(&mut self) {
        if self.cpus.count() == 0 {
            return;
        }
        if let (Some(heir), Some(first)) = (self.cpus.get(0).heir(), self.peek_first()) {
            let insert = priority::append(self.nodes[first].priority);
            if Self::insert_beats(insert, self.nodes[heir].priority) {
                self.nodes[heir].state = SchedulerNodeState::Ready;
                self.nodes[heir].cpu = None;
                self.insert_ready(heir, priority::prepend(self.nodes[heir].priority));
                self.schedule_next();
                self.stats.preemptions += 1;
            }
        }
    }
}

impl Default for EdfScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerOps for EdfScheduler {
    fn node_initialize(
        &mut self,
        thread: ThreadId,
        priority_value: u64,
    ) -> Result<NodeIndex, &'static str> {
        if priority_value > DEADLINE_MASK >> 1 {
            return Err("background priority out of range");
        }
        let node = self.nodes.allocate(
            thread,
            priority::background_key(priority_value),
            CpuMask::all(),
        );
        self.nodes[node].background_priority = priority_value;
        Ok(node)
    }

    fn node_destroy(&mut self, node: NodeIndex) {
        if self.nodes[node].state != SchedulerNodeState::Blocked {
            self.withdraw_node(node, SchedulerNodeState::Blocked);
        }
        self.nodes.release(node);
    }

    fn schedule(&mut self) {
        if self.cpus.count() != 0 && self.cpus.get(0).heir().is_none() {
            if let Some(node) = self.pop_first() {
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
                self.extract_ready(node);
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
            self.insert_ready(node, priority::append(self.nodes[node].priority));
            return;
        }

        match self.cpus.get(0).heir() {
            None => self.set_heir(Some(node)),
            Some(heir) => {
                let insert = priority::append(self.nodes[node].priority);
                if Self::insert_beats(insert, self.nodes[heir].priority) {
                    self.nodes[heir].state = SchedulerNodeState::Ready;
                    self.nodes[heir].cpu = None;
                    self.insert_ready(heir, priority::prepend(self.nodes[heir].priority));
                    self.set_heir(Some(node));
                    self.stats.preemptions += 1;
                } else {
                    self.insert_ready(node, insert);
                }
            }
        }
    }

    fn update_priority(&mut self, node: NodeIndex, new_priority: u64) {
        self.nodes[node].background_priority = new_priority;
        if self.nodes[node].active_deadline.is_none() {
            self.change_key(node, priority::background_key(new_priority), true);
        }
    }

    fn yield_now(&mut self, node: NodeIndex) {
        match self.nodes[node].state {
            SchedulerNodeState::Scheduled => {
                self.nodes[node].state = SchedulerNodeState::Ready;
                self.nodes[node].cpu = None;
                self.insert_ready(node, priority::append(self.nodes[node].priority));
                self.schedule_next();
            }
            SchedulerNodeState::Ready => {
                self.extract_ready(node);
                self.insert_ready(node, priority::append(self.nodes[node].priority));
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
                self.extract_ready(node);
                self.nodes[node].state = next_state;
            }
            SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
        }
    }

    fn add_processor(&mut self, cpu: usize) {
        if self.cpus.count() != 0 {
            log::warn!("edf scheduler already owns a processor");
            return;
        }
        self.cpus.add(cpu);
        log::info!("edf scheduler attached to cpu {}", cpu);
        self.schedule();
    }

    fn remove_processor(&mut self, _cpu: usize) -> Result<(), &'static str> {
        Err("uniprocessor scheduler keeps its processor")
    }

    fn release_job(&mut self, node: NodeIndex, deadline: u64) -> JobReleaseStatus {
        let status = if self.nodes[node].active_deadline.is_some() {
            log::debug!(
                "job overrun on {}: previous deadline still pending",
                self.nodes[node].thread
            );
            JobReleaseStatus::Overrun
        } else {
            JobReleaseStatus::Released
        };

        self.nodes[node].active_deadline = Some(deadline & DEADLINE_MASK);
        self.change_key(node, priority::deadline_key(deadline), false);
        status
    }

    fn cancel_job(&mut self, node: NodeIndex) {
        if self.nodes[node].active_deadline.take().is_some() {
            let background = self.nodes[node].background_priority;
            self.change_key(node, priority::background_key(background), false);
        }
    }

    fn tick(&mut self) {
        self.clock = self.clock.wrapping_add(1) & DEADLINE_MASK;
    }

    fn start_idle(&mut self, cpu: usize) {
        if self.cpus.count() != 0 {
            log::warn!("edf scheduler already owns a processor");
            return;
        }
        self.cpus.add(cpu);
        log::info!("edf scheduler idle on cpu {}", cpu);
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
        match self.nodes[node].active_deadline {
            Some(deadline) => deadline,
            None => self.nodes[node].background_priority,
        }
    }
}
