//! Shared SMP scheduling machinery
//!
//! The SMP policies differ only in their ready structure and in how they
//! pick candidates; everything else — maintaining the priority-ordered
//! scheduled set, preemption, the ask-for-help negotiation, processor
//! add/remove — is common. This module holds that common machinery:
//! [`SmpContext`] (the state every SMP policy embeds) and generic
//! algorithms over the [`SmpPolicy`] hook trait.
//!
//! ## Invariants
//!
//! - The scheduled set is kept ordered by priority key; its size never
//!   exceeds the number of owned processors.
//! - Exactly one scheduled node is the heir of each non-idle owned
//!   processor.
//! - All algorithms run under the caller-held instance lock in bounded
//!   time; nothing here blocks or re-enters another instance.

extern crate alloc;

use alloc::vec::Vec;

use super::node::{NodeArena, NodeIndex};
use super::percpu::ProcessorSet;
use super::priority::{self, PriorityControl};
use super::types::{SchedulerNodeState, SchedulerStats};

/// State embedded in every SMP policy
#[derive(Debug, Default)]
pub struct SmpContext {
    /// Node arena of this instance
    pub nodes: NodeArena,
    /// Scheduled nodes, ordered by priority key (highest first)
    pub scheduled: Vec<NodeIndex>,
    /// Processors owned by this instance
    pub cpus: ProcessorSet,
    /// Instance statistics
    pub stats: SchedulerStats,
}

impl SmpContext {
    pub const fn new() -> Self {
        Self {
            nodes: NodeArena::new(),
            scheduled: Vec::new(),
            cpus: ProcessorSet::new(),
            stats: SchedulerStats::new(),
        }
    }

    /// Insert a node into the scheduled set at its insert-key position
    pub fn insert_scheduled(&mut self, node: NodeIndex, insert_priority: PriorityControl) {
        let position = self
            .scheduled
            .iter()
            .position(|&other| insert_priority <= self.nodes[other].priority)
            .unwrap_or(self.scheduled.len());
        self.scheduled.insert(position, node);
        debug_assert!(self.scheduled.len() <= self.cpus.count());
    }

    /// Remove a node from the scheduled set
    pub fn extract_from_scheduled(&mut self, node: NodeIndex) {
        self.scheduled.retain(|&other| other != node);
    }

    /// Make `node` the heir of the owned processor `cpu` (global index)
    ///
    /// Updates the node's state and assignment and raises the processor's
    /// reschedule flag.
    pub fn allocate_processor(&mut self, node: NodeIndex, cpu: usize) {
        let position = match self.cpus.position_of(cpu) {
            Some(position) => position,
            None => return,
        };

        if let Some(previous) = self.nodes[node].cpu {
            if previous != cpu {
                self.stats.migrations += 1;
            }
        }
        self.nodes[node].state = SchedulerNodeState::Scheduled;
        self.nodes[node].cpu = Some(cpu);
        self.cpus.get_mut(position).set_heir(Some(node));
        self.stats.heir_changes += 1;
    }

    /// Mark the owned processor `cpu` idle
    pub fn set_idle(&mut self, cpu: usize) {
        if let Some(position) = self.cpus.position_of(cpu) {
            self.cpus.get_mut(position).set_heir(None);
            self.stats.heir_changes += 1;
        }
    }
}

/// The hooks an SMP policy provides to the generic algorithms
pub trait SmpPolicy {
    fn smp(&self) -> &SmpContext;
    fn smp_mut(&mut self) -> &mut SmpContext;

    /// Whether any node is ready (and not scheduled)
    fn has_ready(&self) -> bool;

    /// Best ready node to install on the owned processor `for_cpu`
    ///
    /// Affinity-aware policies may shift already-scheduled nodes between
    /// processors so that the returned node is valid on `for_cpu`.
    fn get_highest_ready(&mut self, for_cpu: usize) -> Option<NodeIndex>;

    /// Scheduled node with the lowest priority that `node` could replace
    fn get_lowest_scheduled(&self, node: NodeIndex) -> Option<NodeIndex> {
        let _ = node;
        self.smp().scheduled.last().copied()
    }

    /// An idle owned processor usable by `node` (global index)
    fn find_idle_cpu(&self, node: NodeIndex) -> Option<usize> {
        let _ = node;
        let smp = self.smp();
        smp.cpus.first_idle().map(|position| smp.cpus.get(position).index())
    }

    /// Insert a node into the ready structure
    fn insert_ready(&mut self, node: NodeIndex, insert_priority: PriorityControl);

    /// Remove a node from the ready structure (no-op when absent)
    fn extract_from_ready(&mut self, node: NodeIndex);

    /// Promote a ready node into the scheduled set
    fn move_from_ready_to_scheduled(&mut self, node: NodeIndex) {
        self.extract_from_ready(node);
        let insert_priority = priority::append(self.smp().nodes[node].priority);
        self.smp_mut().insert_scheduled(node, insert_priority);
    }

    /// Demote a scheduled node into the ready structure
    ///
    /// The preempted node keeps its turn: it goes ahead of its
    /// equal-priority peers.
    fn move_from_scheduled_to_ready(&mut self, node: NodeIndex) {
        self.smp_mut().extract_from_scheduled(node);
        self.smp_mut().nodes[node].state = SchedulerNodeState::Ready;
        self.smp_mut().nodes[node].cpu = None;
        let insert_priority = priority::prepend(self.smp().nodes[node].priority);
        self.insert_ready(node, insert_priority);
    }

    /// Place a node that just became ready
    ///
    /// Returns true when the node ends up scheduled; false means it stays
    /// merely ready (the everyone-is-busy outcome).
    fn enqueue(&mut self, node: NodeIndex, insert_priority: PriorityControl) -> bool {
        enqueue_default(self, node, insert_priority)
    }
}

/// Default enqueue: idle processor first, then preemption, else ready
fn enqueue_default<P: SmpPolicy + ?Sized>(
    policy: &mut P,
    node: NodeIndex,
    insert_priority: PriorityControl,
) -> bool {
    if let Some(cpu) = policy.find_idle_cpu(node) {
        let smp = policy.smp_mut();
        smp.allocate_processor(node, cpu);
        smp.insert_scheduled(node, insert_priority);
        return true;
    }

    if let Some(lowest) = policy.get_lowest_scheduled(node) {
        if insert_priority <= policy.smp().nodes[lowest].priority {
            let victim_cpu = policy.smp().nodes[lowest].cpu;
            policy.move_from_scheduled_to_ready(lowest);
            if let Some(cpu) = victim_cpu {
                let smp = policy.smp_mut();
                smp.allocate_processor(node, cpu);
                smp.insert_scheduled(node, insert_priority);
                smp.stats.preemptions += 1;
                return true;
            }
        }
    }

    policy.smp_mut().nodes[node].state = SchedulerNodeState::Ready;
    policy.insert_ready(node, insert_priority);
    false
}

/// Re-place a node that is scheduled but whose key changed
///
/// The node must already be extracted from the scheduled set; its processor
/// assignment is still recorded. Either the node keeps its processor or the
/// best ready node takes it over.
pub fn enqueue_scheduled<P: SmpPolicy + ?Sized>(
    policy: &mut P,
    node: NodeIndex,
    insert_priority: PriorityControl,
) {
    let cpu = match policy.smp().nodes[node].cpu {
        Some(cpu) => cpu,
        None => return,
    };

    match policy.get_highest_ready(cpu) {
        Some(ready) if insert_priority > policy.smp().nodes[ready].priority => {
            // The best ready node now outranks this one: hand the
            // processor over.
            policy.smp_mut().nodes[node].state = SchedulerNodeState::Ready;
            policy.smp_mut().nodes[node].cpu = None;
            policy.insert_ready(node, insert_priority);

            policy.move_from_ready_to_scheduled(ready);
            policy.smp_mut().allocate_processor(ready, cpu);
            policy.smp_mut().stats.preemptions += 1;
        }
        _ => {
            policy.smp_mut().insert_scheduled(node, insert_priority);
            policy.smp_mut().nodes[node].state = SchedulerNodeState::Scheduled;
        }
    }
}

/// Remove a node from whatever structure it occupies
pub fn block<P: SmpPolicy + ?Sized>(policy: &mut P, node: NodeIndex) {
    match policy.smp().nodes[node].state {
        SchedulerNodeState::Scheduled => {
            let cpu = policy.smp().nodes[node].cpu;
            policy.smp_mut().extract_from_scheduled(node);
            policy.extract_from_ready(node);
            policy.smp_mut().nodes[node].state = SchedulerNodeState::Blocked;
            policy.smp_mut().nodes[node].cpu = None;
            if let Some(cpu) = cpu {
                schedule_highest_ready(policy, cpu);
            }
        }
        SchedulerNodeState::Ready => {
            policy.extract_from_ready(node);
            policy.smp_mut().nodes[node].state = SchedulerNodeState::Blocked;
        }
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
    }
}

/// Fill the owned processor `cpu` with the best ready node, or idle it
pub fn schedule_highest_ready<P: SmpPolicy + ?Sized>(policy: &mut P, cpu: usize) {
    match policy.get_highest_ready(cpu) {
        Some(ready) => {
            policy.move_from_ready_to_scheduled(ready);
            policy.smp_mut().allocate_processor(ready, cpu);
        }
        None => policy.smp_mut().set_idle(cpu),
    }
}

/// Make a blocked node ready and try to schedule it
///
/// Returns true when the node needs help from another instance (it stayed
/// ready without a processor).
pub fn unblock<P: SmpPolicy + ?Sized>(policy: &mut P, node: NodeIndex) -> bool {
    match policy.smp().nodes[node].state {
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
            let insert_priority = priority::append(policy.smp().nodes[node].priority);
            !policy.enqueue(node, insert_priority)
        }
        SchedulerNodeState::Ready | SchedulerNodeState::Scheduled => false,
    }
}

/// Re-key a node after a priority change
pub fn update_priority<P: SmpPolicy + ?Sized>(
    policy: &mut P,
    node: NodeIndex,
    new_key: PriorityControl,
) {
    let old_key = policy.smp().nodes[node].priority;
    if old_key == new_key {
        return;
    }

    // A rising priority prepends (and may displace equals); a dropping
    // priority appends behind its new peers.
    let insert_priority = if new_key < old_key {
        priority::prepend(new_key)
    } else {
        priority::append(new_key)
    };

    match policy.smp().nodes[node].state {
        SchedulerNodeState::Scheduled => {
            policy.smp_mut().extract_from_scheduled(node);
            policy.smp_mut().nodes[node].priority = new_key;
            enqueue_scheduled(policy, node, insert_priority);
        }
        SchedulerNodeState::Ready => {
            policy.extract_from_ready(node);
            policy.smp_mut().nodes[node].priority = new_key;
            policy.enqueue(node, insert_priority);
        }
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
            policy.smp_mut().nodes[node].priority = new_key;
        }
    }
}

/// Rotate a node behind its equal-priority peers
pub fn yield_now<P: SmpPolicy + ?Sized>(policy: &mut P, node: NodeIndex) {
    let insert_priority = priority::append(policy.smp().nodes[node].priority);

    match policy.smp().nodes[node].state {
        SchedulerNodeState::Scheduled => {
            policy.smp_mut().extract_from_scheduled(node);
            enqueue_scheduled(policy, node, insert_priority);
        }
        SchedulerNodeState::Ready => {
            policy.extract_from_ready(node);
            policy.enqueue(node, insert_priority);
        }
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
    }
}

/// Ask this instance to run a node it does not currently schedule
///
/// Returns true when the node ends up (or already is) scheduled here.
/// Declining leaves the node registered as ready so a later event can pick
/// it up.
pub fn ask_for_help<P: SmpPolicy + ?Sized>(policy: &mut P, node: NodeIndex) -> bool {
    policy.smp_mut().stats.help_requests += 1;

    let granted = match policy.smp().nodes[node].state {
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {
            let insert_priority = priority::append(policy.smp().nodes[node].priority);
            policy.enqueue(node, insert_priority)
        }
        SchedulerNodeState::Scheduled => true,
        SchedulerNodeState::Ready => false,
    };

    if granted {
        policy.smp_mut().stats.help_grants += 1;
    }
    granted
}

/// Cancel a pending help request whose circumstances changed
///
/// A node left ready by a declined [`ask_for_help`] is taken back out of
/// the ready structure once its thread is serviced elsewhere.
pub fn reconsider_help_request<P: SmpPolicy + ?Sized>(policy: &mut P, node: NodeIndex) {
    if policy.smp().nodes[node].state == SchedulerNodeState::Ready {
        policy.extract_from_ready(node);
        policy.smp_mut().nodes[node].state = SchedulerNodeState::Blocked;
    }
}

/// Forcibly remove a node, leaving it in `next_state`
pub fn withdraw_node<P: SmpPolicy + ?Sized>(
    policy: &mut P,
    node: NodeIndex,
    next_state: SchedulerNodeState,
) {
    match policy.smp().nodes[node].state {
        SchedulerNodeState::Scheduled => {
            let cpu = policy.smp().nodes[node].cpu;
            policy.smp_mut().extract_from_scheduled(node);
            policy.extract_from_ready(node);
            policy.smp_mut().nodes[node].state = next_state;
            policy.smp_mut().nodes[node].cpu = None;
            if let Some(cpu) = cpu {
                schedule_highest_ready(policy, cpu);
            }
        }
        SchedulerNodeState::Ready => {
            policy.extract_from_ready(node);
            policy.smp_mut().nodes[node].state = next_state;
        }
        SchedulerNodeState::Blocked | SchedulerNodeState::Other => {}
    }
}

/// Add a processor to the owned set and give it the best ready node
pub fn add_processor<P: SmpPolicy + ?Sized>(policy: &mut P, cpu: usize) {
    policy.smp_mut().cpus.add(cpu);
    log::info!("smp scheduler now owns cpu {}", cpu);
    if policy.has_ready() {
        schedule_highest_ready(policy, cpu);
    }
}

/// Remove a processor; its heir migrates or stays ready
pub fn remove_processor<P: SmpPolicy + ?Sized>(
    policy: &mut P,
    cpu: usize,
) -> Result<(), &'static str> {
    let position = policy
        .smp()
        .cpus
        .position_of(cpu)
        .ok_or("processor not owned by this scheduler")?;

    let victim = policy.smp().cpus.get(position).heir();
    policy.smp_mut().cpus.remove(cpu);
    log::info!("smp scheduler released cpu {}", cpu);

    if let Some(victim) = victim {
        policy.smp_mut().extract_from_scheduled(victim);
        policy.smp_mut().nodes[victim].state = SchedulerNodeState::Blocked;
        policy.smp_mut().nodes[victim].cpu = None;
        let insert_priority = priority::append(policy.smp().nodes[victim].priority);
        policy.enqueue(victim, insert_priority);
    }
    Ok(())
}

/// Re-assert the heir invariant on every owned processor
pub fn schedule<P: SmpPolicy + ?Sized>(policy: &mut P) {
    let indices: Vec<usize> = policy
        .smp()
        .cpus
        .iter()
        .filter(|cpu| cpu.heir().is_none())
        .map(|cpu| cpu.index())
        .collect();

    for cpu in indices {
        if policy.has_ready() {
            schedule_highest_ready(policy, cpu);
        }
    }
}
