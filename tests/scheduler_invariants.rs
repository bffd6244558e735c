//! Scheduler Invariant Tests
//!
//! Property-style tests driving the policies through long pseudo-random
//! operation sequences and checking the structural invariants at every
//! quiescent point:
//! - the scheduled set is exactly the N highest-priority runnable nodes
//! - equal-priority threads keep FIFO order
//! - withdraw and destroy never corrupt the ready structures

use kairos_sched::{
    PriorityScheduler, SchedulerNodeState, SchedulerOps, SmpPriorityScheduler, ThreadId,
};

/// Deterministic pseudo-random sequence (64-bit LCG)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

/// Every scheduled node must be at least as urgent as every ready node,
/// and processors may only idle when nothing is ready.
fn check_top_n<S: SchedulerOps>(
    sched: &S,
    nodes: &[(kairos_sched::NodeIndex, u64)],
    cpu_count: usize,
) {
    let scheduled: Vec<u64> = nodes
        .iter()
        .filter(|&&(n, _)| sched.node_state(n) == SchedulerNodeState::Scheduled)
        .map(|&(_, p)| p)
        .collect();
    let ready: Vec<u64> = nodes
        .iter()
        .filter(|&&(n, _)| sched.node_state(n) == SchedulerNodeState::Ready)
        .map(|&(_, p)| p)
        .collect();

    assert!(scheduled.len() <= cpu_count);
    if !ready.is_empty() {
        assert_eq!(
            scheduled.len(),
            cpu_count,
            "no processor may idle while nodes are ready"
        );
    }
    for &s in &scheduled {
        for &r in &ready {
            assert!(
                s <= r,
                "scheduled priority {} is worse than ready priority {}",
                s,
                r
            );
        }
    }
}

// ============================================================================
// Random-Walk Invariant Tests
// ============================================================================

#[test]
fn test_invariant_uniprocessor_random_walk() {
    let mut sched = PriorityScheduler::new(256);
    sched.start_idle(0);

    let mut rng = Lcg(0x1234_5678);
    let nodes: Vec<(kairos_sched::NodeIndex, u64)> = (0..12)
        .map(|i| {
            let priority = rng.next() % 32;
            let node = sched.node_initialize(ThreadId(i), priority).unwrap();
            (node, priority)
        })
        .collect();

    for _ in 0..2_000 {
        let (node, _) = nodes[(rng.next() % nodes.len() as u64) as usize];
        match rng.next() % 3 {
            0 => sched.unblock(node),
            1 => sched.block(node),
            _ => sched.yield_now(node),
        }
        check_top_n(&sched, &nodes, 1);
    }
}

#[test]
fn test_invariant_smp_random_walk() {
    let cpu_count = 4;
    let mut sched = SmpPriorityScheduler::new(256);
    for cpu in 0..cpu_count {
        sched.start_idle(cpu);
    }

    let mut rng = Lcg(0x9e37_79b9);
    let mut nodes: Vec<(kairos_sched::NodeIndex, u64)> = (0..16)
        .map(|i| {
            let priority = rng.next() % 64;
            let node = sched.node_initialize(ThreadId(i), priority).unwrap();
            (node, priority)
        })
        .collect();

    for _ in 0..3_000 {
        let pick = (rng.next() % nodes.len() as u64) as usize;
        let (node, _) = nodes[pick];
        match rng.next() % 4 {
            0 | 1 => sched.unblock(node),
            2 => sched.block(node),
            _ => {
                let priority = rng.next() % 64;
                sched.update_priority(node, priority);
                nodes[pick].1 = sched.node_priority(node);
            }
        }
        check_top_n(&sched, &nodes, cpu_count);
    }
}

// ============================================================================
// FIFO Fairness
// ============================================================================

#[test]
fn test_invariant_fifo_no_thread_skipped_twice() {
    // Repeated yields at one priority must visit every peer once per round.
    let mut sched = PriorityScheduler::new(256);
    sched.start_idle(0);

    let count = 5u32;
    let nodes: Vec<_> = (0..count)
        .map(|i| sched.node_initialize(ThreadId(i), 42).unwrap())
        .collect();
    for &node in &nodes {
        sched.unblock(node);
    }

    let mut turns = vec![0u32; count as usize];
    for round in 1..=4u32 {
        for _ in 0..count {
            let heir = sched.heir_of(0).expect("a heir must exist");
            turns[heir.0 as usize] += 1;
            sched.yield_now(nodes[heir.0 as usize]);
        }
        for (thread, &t) in turns.iter().enumerate() {
            assert_eq!(
                t, round,
                "thread {} had {} turns after round {}",
                thread, t, round
            );
        }
    }
}

#[test]
fn test_invariant_blocked_thread_rejoins_at_tail() {
    let mut sched = PriorityScheduler::new(256);
    sched.start_idle(0);

    let nodes: Vec<_> = (0..3)
        .map(|i| sched.node_initialize(ThreadId(i), 10).unwrap())
        .collect();
    for &node in &nodes {
        sched.unblock(node);
    }

    // Thread 0 blocks and unblocks: it must requeue behind its peers, not
    // reclaim the processor.
    sched.block(nodes[0]);
    assert_eq!(sched.heir_of(0), Some(ThreadId(1)));
    sched.unblock(nodes[0]);
    assert_eq!(sched.heir_of(0), Some(ThreadId(1)));

    sched.yield_now(nodes[1]);
    assert_eq!(sched.heir_of(0), Some(ThreadId(2)));
    sched.yield_now(nodes[2]);
    assert_eq!(sched.heir_of(0), Some(ThreadId(0)));
}

// ============================================================================
// Structure Hygiene
// ============================================================================

#[test]
fn test_invariant_node_lifecycle_random_walk() {
    let mut sched = SmpPriorityScheduler::new(256);
    sched.start_idle(0);
    sched.start_idle(1);

    let mut rng = Lcg(0xdead_beef);
    let mut live: Vec<kairos_sched::NodeIndex> = Vec::new();
    let mut next_thread = 0u32;

    for _ in 0..1_000 {
        match rng.next() % 5 {
            0 => {
                let node = sched
                    .node_initialize(ThreadId(next_thread), rng.next() % 100)
                    .unwrap();
                next_thread += 1;
                live.push(node);
            }
            1 if !live.is_empty() => {
                let pick = (rng.next() % live.len() as u64) as usize;
                let node = live.swap_remove(pick);
                sched.node_destroy(node);
            }
            2 if !live.is_empty() => {
                let pick = (rng.next() % live.len() as u64) as usize;
                sched.unblock(live[pick]);
            }
            3 if !live.is_empty() => {
                let pick = (rng.next() % live.len() as u64) as usize;
                sched.block(live[pick]);
            }
            _ if !live.is_empty() => {
                let pick = (rng.next() % live.len() as u64) as usize;
                sched.withdraw_node(live[pick], SchedulerNodeState::Blocked);
            }
            _ => {}
        }
    }

    // Tear everything down; the structures must drain cleanly.
    for node in live {
        sched.node_destroy(node);
    }
    assert_eq!(sched.heir_of(0).is_some() as usize + sched.heir_of(1).is_some() as usize, 0);
}

#[test]
fn test_invariant_withdraw_is_idempotent() {
    let mut sched = SmpPriorityScheduler::new(256);
    sched.start_idle(0);

    let node = sched.node_initialize(ThreadId(0), 5).unwrap();
    sched.unblock(node);

    sched.withdraw_node(node, SchedulerNodeState::Blocked);
    sched.withdraw_node(node, SchedulerNodeState::Blocked);
    sched.withdraw_node(node, SchedulerNodeState::Blocked);

    assert_eq!(sched.node_state(node), SchedulerNodeState::Blocked);
    sched.unblock(node);
    assert_eq!(sched.heir_of(0), Some(ThreadId(0)), "node must still be usable");
}
