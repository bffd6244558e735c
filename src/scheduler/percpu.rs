//! Per-processor scheduling state
//!
//! Each scheduler instance owns a disjoint set of processors. For every
//! owned processor the instance records the heir node (the node the
//! processor will switch to at its next dispatch point) and a reschedule
//! flag the dispatch layer polls. `heir == None` means the processor runs
//! its idle loop.
//!
//! The reschedule flag is an atomic because the dispatch layer reads it
//! from the processor itself while the scheduler instance lock is held by
//! another processor.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use super::node::NodeIndex;

/// State of one processor owned by a scheduler instance
#[derive(Debug)]
pub struct PerCpu {
    /// Global processor index
    index: usize,
    /// Node this processor will switch to at the next dispatch point
    heir: Option<NodeIndex>,
    /// Set when the heir changed and a dispatch is pending
    need_resched: AtomicBool,
    /// Scratch mark for the affinity BFS
    pub visited: bool,
}

impl PerCpu {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            heir: None,
            need_resched: AtomicBool::new(false),
            visited: false,
        }
    }

    /// Global processor index
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current heir node (`None` = idle)
    #[inline]
    pub fn heir(&self) -> Option<NodeIndex> {
        self.heir
    }

    /// Install a new heir and raise the reschedule flag if it changed
    pub fn set_heir(&mut self, heir: Option<NodeIndex>) {
        if self.heir != heir {
            self.heir = heir;
            self.need_resched.store(true, Ordering::Release);
        }
    }

    /// Check and clear the reschedule flag
    pub fn take_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }
}

/// The set of processors owned by one scheduler instance
#[derive(Debug, Default)]
pub struct ProcessorSet {
    cpus: Vec<PerCpu>,
}

impl ProcessorSet {
    pub const fn new() -> Self {
        Self { cpus: Vec::new() }
    }

    /// Number of owned processors
    #[inline]
    pub fn count(&self) -> usize {
        self.cpus.len()
    }

    /// Add a processor to the owned set; returns its position
    pub fn add(&mut self, index: usize) -> usize {
        debug_assert!(self.position_of(index).is_none());
        self.cpus.push(PerCpu::new(index));
        self.cpus.len() - 1
    }

    /// Remove a processor from the owned set; returns its record
    pub fn remove(&mut self, index: usize) -> Option<PerCpu> {
        let position = self.position_of(index)?;
        Some(self.cpus.remove(position))
    }

    /// Position of a global processor index within the owned set
    pub fn position_of(&self, index: usize) -> Option<usize> {
        self.cpus.iter().position(|cpu| cpu.index == index)
    }

    /// Position of the first owned processor without a heir
    pub fn first_idle(&self) -> Option<usize> {
        self.cpus.iter().position(|cpu| cpu.heir.is_none())
    }

    /// Position of the owned processor whose heir is `node`
    pub fn position_of_heir(&self, node: NodeIndex) -> Option<usize> {
        self.cpus.iter().position(|cpu| cpu.heir == Some(node))
    }

    #[inline]
    pub fn get(&self, position: usize) -> &PerCpu {
        &self.cpus[position]
    }

    #[inline]
    pub fn get_mut(&mut self, position: usize) -> &mut PerCpu {
        &mut self.cpus[position]
    }

    /// Iterate over the owned processors
    pub fn iter(&self) -> impl Iterator<Item = &PerCpu> {
        self.cpus.iter()
    }

    /// Clear all BFS scratch marks
    pub fn clear_visited(&mut self) {
        for cpu in self.cpus.iter_mut() {
            cpu.visited = false;
        }
    }
}
