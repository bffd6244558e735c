//! SMP Scheduling Integration Tests
//!
//! Tests for the fixed-priority SMP policy in multi-instance and
//! multi-threaded settings:
//! - scheduled-set composition across processor-set changes
//! - cross-instance ask-for-help through the thread bindings
//! - instance isolation under concurrent drivers (one lock per instance,
//!   as the kernel holds them)

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use kairos_sched::thread::ask_for_help;
use kairos_sched::{
    SchedulerNodeState, SchedulerOps, SmpPriorityScheduler, ThreadControl, ThreadId,
};

// ============================================================================
// Scheduled-Set Composition
// ============================================================================

#[test]
fn test_smp_processor_churn_keeps_top_n() {
    let mut sched = SmpPriorityScheduler::new(256);
    sched.start_idle(0);
    sched.start_idle(1);

    let nodes: Vec<_> = (0..5)
        .map(|i| sched.node_initialize(ThreadId(i), 10 + i as u64).unwrap())
        .collect();
    for &node in &nodes {
        sched.unblock(node);
    }

    // Grow: each added processor picks up the next-best ready node.
    sched.add_processor(2);
    sched.add_processor(3);
    let scheduled_count = nodes
        .iter()
        .filter(|&&n| sched.node_state(n) == SchedulerNodeState::Scheduled)
        .count();
    assert_eq!(scheduled_count, 4);
    assert_eq!(sched.node_state(nodes[4]), SchedulerNodeState::Ready);

    // Shrink back: displaced nodes return to ready, the best stay
    // scheduled.
    sched.remove_processor(2).unwrap();
    sched.remove_processor(3).unwrap();
    for (i, &node) in nodes.iter().enumerate() {
        let expected = if i < 2 {
            SchedulerNodeState::Scheduled
        } else {
            SchedulerNodeState::Ready
        };
        assert_eq!(sched.node_state(node), expected, "node {} after shrink", i);
    }
}

#[test]
fn test_smp_heirs_survive_priority_storm() {
    let mut sched = SmpPriorityScheduler::new(256);
    sched.start_idle(0);
    sched.start_idle(1);

    let nodes: Vec<_> = (0..4)
        .map(|i| sched.node_initialize(ThreadId(i), 50).unwrap())
        .collect();
    for &node in &nodes {
        sched.unblock(node);
    }

    // Drive one node's priority up and down repeatedly; the two scheduled
    // nodes must always be the two best.
    for round in 0..100u64 {
        let target = nodes[(round % 4) as usize];
        sched.update_priority(target, if round % 2 == 0 { 1 } else { 99 });

        let mut priorities: Vec<u64> = nodes.iter().map(|&n| sched.node_priority(n)).collect();
        priorities.sort_unstable();
        let worst_scheduled = nodes
            .iter()
            .filter(|&&n| sched.node_state(n) == SchedulerNodeState::Scheduled)
            .map(|&n| sched.node_priority(n))
            .max()
            .unwrap();
        assert!(
            worst_scheduled <= priorities[2],
            "a scheduled node is worse than the third-best priority"
        );
    }
}

// ============================================================================
// Cross-Instance Help
// ============================================================================

#[test]
fn test_smp_help_migrates_between_instances() {
    // Two instances, one processor each. The home instance is saturated by
    // a high-priority thread; the migrant finds room on the second.
    let mut instances = vec![
        SmpPriorityScheduler::new(256),
        SmpPriorityScheduler::new(256),
    ];
    instances[0].start_idle(0);
    instances[1].start_idle(1);

    let hog = instances[0].node_initialize(ThreadId(0), 1).unwrap();
    instances[0].unblock(hog);

    let mut migrant = ThreadControl::new(ThreadId(1));
    let home = instances[0].node_initialize(ThreadId(1), 30).unwrap();
    let away = instances[1].node_initialize(ThreadId(1), 30).unwrap();
    migrant.bind(0, home);
    migrant.bind(1, away);

    assert!(ask_for_help(&mut instances, &migrant));
    assert_eq!(instances[1].heir_of(1), Some(ThreadId(1)));
    assert_eq!(instances[0].node_state(home), SchedulerNodeState::Blocked);

    // Home frees up; the waiting registration would now succeed there too.
    instances[0].block(hog);
    assert!(instances[0].ask_for_help(home));
    assert_eq!(instances[0].heir_of(0), Some(ThreadId(1)));

    // The second instance withdraws its now-stale registration.
    instances[1].withdraw_node(away, SchedulerNodeState::Other);
    assert_eq!(instances[1].heir_of(1), None);
}

#[test]
fn test_smp_help_declined_everywhere() {
    let mut instances = vec![
        SmpPriorityScheduler::new(256),
        SmpPriorityScheduler::new(256),
    ];
    instances[0].start_idle(0);
    instances[1].start_idle(1);

    for (i, instance) in instances.iter_mut().enumerate() {
        let hog = instance.node_initialize(ThreadId(i as u32), 1).unwrap();
        instance.unblock(hog);
    }

    let mut migrant = ThreadControl::new(ThreadId(9));
    let home = instances[0].node_initialize(ThreadId(9), 50).unwrap();
    let away = instances[1].node_initialize(ThreadId(9), 50).unwrap();
    migrant.bind(0, home);
    migrant.bind(1, away);

    assert!(!ask_for_help(&mut instances, &migrant));
    // Declined registrations stay ready so a later block event picks one
    // of them up.
    assert_eq!(instances[0].node_state(home), SchedulerNodeState::Ready);
}

// ============================================================================
// Instance Isolation Under Concurrency
// ============================================================================

#[test]
fn test_smp_concurrent_instances_stay_isolated() {
    // Four instances driven from four threads, the way four processors
    // drive their own scheduler under their own locks.
    let instances: Vec<Arc<Mutex<SmpPriorityScheduler>>> = (0..4)
        .map(|cpu| {
            let mut sched = SmpPriorityScheduler::new(256);
            sched.start_idle(cpu);
            Arc::new(Mutex::new(sched))
        })
        .collect();

    let barrier = Arc::new(Barrier::new(4));
    let mut handles = vec![];

    for (i, instance) in instances.iter().enumerate() {
        let instance = Arc::clone(instance);
        let barrier = Arc::clone(&barrier);

        handles.push(thread::spawn(move || {
            barrier.wait();

            let nodes: Vec<_> = {
                let mut sched = instance.lock().unwrap();
                (0..50)
                    .map(|j| {
                        sched
                            .node_initialize(ThreadId((i * 1000 + j) as u32), (j % 100) as u64)
                            .unwrap()
                    })
                    .collect()
            };

            for round in 0..200usize {
                let mut sched = instance.lock().unwrap();
                let node = nodes[round % nodes.len()];
                match round % 3 {
                    0 => sched.unblock(node),
                    1 => sched.yield_now(node),
                    _ => sched.block(node),
                }
            }

            let sched = instance.lock().unwrap();
            let heir = sched.heir_of(i).expect("instance still has runnable work");
            assert!(
                (heir.0 as usize) / 1000 == i,
                "instance {} schedules a foreign thread {}",
                i,
                heir.0
            );
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
