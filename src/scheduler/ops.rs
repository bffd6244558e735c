//! The scheduler operations table
//!
//! Every scheduling policy implements [`SchedulerOps`]; this trait is the
//! polymorphism boundary between the thread-state-change dispatcher and the
//! policies. Dispatch is static: callers are generic over the policy, so
//! the hot-path operations compile to direct calls.
//!
//! ## Calling contract
//!
//! All operations are invoked with the instance lock held by the caller and
//! are bounded-time critical sections: they never block, sleep, allocate
//! (outside `node_initialize`) or re-enter another scheduler instance.
//! Operations return no error in the common case; the few that can
//! meaningfully fail return a `bool` or `Result` consumed by the immediate
//! caller.
//!
//! Operations a policy does not support have explicit do-nothing defaults:
//! a uniprocessor policy has no help protocol, a fixed-priority policy has
//! no job control. Calling them is well-defined, never a panic.

use super::node::NodeIndex;
use super::types::{CpuMask, SchedulerNodeState, ThreadId};

/// Outcome of releasing a job on a deadline-driven policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobReleaseStatus {
    /// The job was released and the node keyed at its new deadline
    Released,
    /// The previous job's deadline obligation was still pending
    Overrun,
    /// The policy does not implement job control
    Unsupported,
}

/// The operations every scheduling policy provides
pub trait SchedulerOps {
    /// Create a node for `thread` at `priority` (real, unshifted)
    ///
    /// Fails on an out-of-range priority; this is a configuration error
    /// detected at initialization, never on the scheduling hot path.
    fn node_initialize(&mut self, thread: ThreadId, priority: u64)
        -> Result<NodeIndex, &'static str>;

    /// Destroy a node; the node must be blocked (withdraw it first)
    fn node_destroy(&mut self, node: NodeIndex);

    /// Recompute heirs for owned processors from the ready structure
    fn schedule(&mut self);

    /// Remove the node from the ready/scheduled structures
    ///
    /// If the node was some processor's heir a replacement is selected.
    fn block(&mut self, node: NodeIndex);

    /// Make the node ready and schedule it if a processor is available
    ///
    /// If all owned processors run work of equal or higher priority the
    /// node stays ready; that is the expected everyone-is-busy case.
    fn unblock(&mut self, node: NodeIndex);

    /// Re-key the node after a priority change (real, unshifted)
    fn update_priority(&mut self, node: NodeIndex, new_priority: u64);

    /// Move the node behind its equal-priority peers
    fn yield_now(&mut self, node: NodeIndex);

    /// Ask this instance to run a node it currently does not schedule
    ///
    /// Returns true when the node ends up scheduled. Declining is a normal
    /// outcome, not an error.
    fn ask_for_help(&mut self, _node: NodeIndex) -> bool {
        false
    }

    /// Cancel a pending help request whose circumstances changed
    fn reconsider_help_request(&mut self, _node: NodeIndex) {}

    /// Forcibly remove a node mid-negotiation, leaving it in `next_state`
    ///
    /// Withdrawing an already-withdrawn node is a no-op.
    fn withdraw_node(&mut self, node: NodeIndex, next_state: SchedulerNodeState);

    /// Temporarily restrict the node to a single processor
    fn pin(&mut self, _node: NodeIndex, _cpu: usize) {}

    /// Restore the node's pre-pin affinity
    ///
    /// Unpinning a node that was never pinned is a no-op.
    fn unpin(&mut self, _node: NodeIndex, _cpu: usize) {}

    /// Add a processor to the owned set and give it the best ready node
    fn add_processor(&mut self, cpu: usize);

    /// Remove a processor from the owned set
    ///
    /// The processor's heir migrates to another owned processor if one can
    /// take it, otherwise it stays ready.
    fn remove_processor(&mut self, cpu: usize) -> Result<(), &'static str>;

    /// Begin a job with an absolute `deadline` (deadline-driven policies)
    fn release_job(&mut self, _node: NodeIndex, _deadline: u64) -> JobReleaseStatus {
        JobReleaseStatus::Unsupported
    }

    /// Remove the node's deadline obligation, reverting to its background
    /// priority
    fn cancel_job(&mut self, _node: NodeIndex) {}

    /// Advance the policy clock by one tick
    fn tick(&mut self) {}

    /// Register a processor as owned and idle
    fn start_idle(&mut self, cpu: usize);

    /// Current affinity mask of a node
    fn get_affinity(&self, node: NodeIndex) -> CpuMask;

    /// Change a node's affinity mask at runtime
    ///
    /// Returns false when the mask is unusable (no intersection with the
    /// owned processor set); the node's previous mask stays in effect.
    fn set_affinity(&mut self, _node: NodeIndex, _affinity: CpuMask) -> bool {
        false
    }

    /// Thread the given owned processor will switch to (`None` = idle)
    fn heir_of(&self, cpu: usize) -> Option<ThreadId>;

    /// Current state of a node
    fn node_state(&self, node: NodeIndex) -> SchedulerNodeState;

    /// Current real (unshifted) priority of a node
    fn node_priority(&self, node: NodeIndex) -> u64;
}
