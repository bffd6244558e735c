//! Bit-mapped priority ready queue
//!
//! The ready structure of the fixed-priority policies: one FIFO chain per
//! priority plus a two-level bit map over the occupied priorities. Finding
//! the highest occupied priority is two trailing-zero counts, independent
//! of how many nodes are ready.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use super::node::NodeIndex;

const WORD_BITS: usize = 64;

/// Two-level occupancy bit map over priorities
///
/// The major word has one bit per minor word; a minor word has one bit per
/// priority. Lower bit index = higher priority, so `trailing_zeros` finds
/// the highest occupied priority.
#[derive(Debug)]
struct PriorityBitmap {
    major: u64,
    minor: Vec<u64>,
}

impl PriorityBitmap {
    fn new(priority_count: usize) -> Self {
        let words = priority_count.div_ceil(WORD_BITS);
        debug_assert!(words <= WORD_BITS);
        Self {
            major: 0,
            minor: vec![0; words],
        }
    }

    #[inline]
    fn mark(&mut self, priority: usize) {
        let word = priority / WORD_BITS;
        self.minor[word] |= 1 << (priority % WORD_BITS);
        self.major |= 1 << word;
    }

    #[inline]
    fn unmark(&mut self, priority: usize) {
        let word = priority / WORD_BITS;
        self.minor[word] &= !(1 << (priority % WORD_BITS));
        if self.minor[word] == 0 {
            self.major &= !(1 << word);
        }
    }

    /// Highest occupied priority, or `None` when the map is empty
    #[inline]
    fn highest(&self) -> Option<usize> {
        if self.major == 0 {
            return None;
        }
        let word = self.major.trailing_zeros() as usize;
        let bit = self.minor[word].trailing_zeros() as usize;
        Some(word * WORD_BITS + bit)
    }
}

/// Per-priority FIFO chains with a bit-map accelerator
#[derive(Debug)]
pub struct ReadyQueue {
    bitmap: PriorityBitmap,
    chains: Vec<VecDeque<NodeIndex>>,
    len: usize,
}

impl ReadyQueue {
    /// Create a ready queue for priorities `0..priority_count`
    pub fn new(priority_count: usize) -> Self {
        Self {
            bitmap: PriorityBitmap::new(priority_count),
            chains: (0..priority_count).map(|_| VecDeque::new()).collect(),
            len: 0,
        }
    }

    /// Number of ready nodes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a node behind its equal-priority peers
    pub fn insert_append(&mut self, priority: usize, node: NodeIndex) {
        self.chains[priority].push_back(node);
        self.bitmap.mark(priority);
        self.len += 1;
    }

    /// Insert a node ahead of its equal-priority peers
    pub fn insert_prepend(&mut self, priority: usize, node: NodeIndex) {
        self.chains[priority].push_front(node);
        self.bitmap.mark(priority);
        self.len += 1;
    }

    /// Remove a specific node from its priority chain
    pub fn extract(&mut self, priority: usize, node: NodeIndex) {
        let chain = &mut self.chains[priority];
        if let Some(position) = chain.iter().position(|&n| n == node) {
            chain.remove(position);
            self.len -= 1;
            if chain.is_empty() {
                self.bitmap.unmark(priority);
            }
        }
    }

    /// Highest-priority node without removing it
    pub fn peek_highest(&self) -> Option<NodeIndex> {
        let priority = self.bitmap.highest()?;
        self.chains[priority].front().copied()
    }

    /// Remove and return the highest-priority node
    pub fn pop_highest(&mut self) -> Option<(usize, NodeIndex)> {
        let priority = self.bitmap.highest()?;
        let node = self.chains[priority].pop_front()?;
        self.len -= 1;
        if self.chains[priority].is_empty() {
            self.bitmap.unmark(priority);
        }
        Some((priority, node))
    }
}
