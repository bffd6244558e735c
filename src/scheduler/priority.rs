//! Priority key encoding
//!
//! All ready structures order nodes by a single 64-bit key. The real
//! priority (or deadline) occupies the upper bits; bit 0 is the insert-order
//! bit, which makes one integer comparison decide both the priority order
//! and the position among equal-priority peers:
//!
//! - append (bit 0 set): the node goes behind existing peers of equal
//!   priority and does not displace an equal-priority scheduled node
//! - prepend (bit 0 clear): the node goes ahead of its peers and does
//!   displace an equal-priority scheduled node (used when a priority rises)
//!
//! ## Deadline keys
//!
//! The EDF policy shares one ordered structure between deadline-driven and
//! background nodes. Bit 62 of the unshifted key marks a background
//! priority; after shifting it lands above every encodable deadline, so all
//! active jobs order ahead of all background nodes with the same integer
//! comparison. Deadlines themselves are compared with wraparound-safe
//! serial-number arithmetic: the comparison is exact as long as live
//! deadlines span less than half the deadline range, which the tick-driven
//! clock guarantees in practice.

/// Scheduler-internal priority key (shifted encoding, see module docs)
pub type PriorityControl = u64;

/// Insert-order bit: set means append behind equal-priority peers
const PRIORITY_APPEND_BIT: PriorityControl = 1;

/// Background marker in the unshifted key domain (EDF only)
const BACKGROUND_FLAG: u64 = 1 << 62;

/// Width of the usable deadline domain in bits
const DEADLINE_BITS: u32 = 62;

/// Mask selecting a value in the deadline domain
pub const DEADLINE_MASK: u64 = (1 << DEADLINE_BITS) - 1;

/// Half of the deadline domain, the wraparound comparison horizon
const DEADLINE_HALF: u64 = 1 << (DEADLINE_BITS - 1);

/// Map a real priority into the shifted key domain
#[inline]
pub const fn map(priority: u64) -> PriorityControl {
    priority << 1
}

/// Recover the real priority from a shifted key
#[inline]
pub const fn unmap(key: PriorityControl) -> u64 {
    key >> 1
}

/// Mark an insert key as append-ordered
#[inline]
pub const fn append(key: PriorityControl) -> PriorityControl {
    key | PRIORITY_APPEND_BIT
}

/// Mark an insert key as prepend-ordered
#[inline]
pub const fn prepend(key: PriorityControl) -> PriorityControl {
    key & !PRIORITY_APPEND_BIT
}

/// Strip the insert-order bit
#[inline]
pub const fn purify(key: PriorityControl) -> PriorityControl {
    key & !PRIORITY_APPEND_BIT
}

/// Check whether an insert key is append-ordered
#[inline]
pub const fn is_append(key: PriorityControl) -> bool {
    (key & PRIORITY_APPEND_BIT) != 0
}

/// Build the shifted key for an absolute deadline
#[inline]
pub const fn deadline_key(deadline: u64) -> PriorityControl {
    map(deadline & DEADLINE_MASK)
}

/// Build the shifted key for a background (no active deadline) priority
#[inline]
pub const fn background_key(priority: u64) -> PriorityControl {
    map(priority | BACKGROUND_FLAG)
}

/// Check whether a purified key carries the background marker
#[inline]
pub const fn is_background(key: PriorityControl) -> bool {
    (unmap(key) & BACKGROUND_FLAG) != 0
}

/// Recover the absolute deadline from a purified deadline key
#[inline]
pub const fn key_deadline(key: PriorityControl) -> u64 {
    unmap(key) & DEADLINE_MASK
}

/// Wraparound-safe ordering of two absolute deadlines
///
/// Serial-number comparison: `a` is earlier than `b` when the forward
/// distance from `a` to `b` is less than half the domain. Exact while live
/// deadlines span less than `DEADLINE_HALF` ticks.
#[inline]
pub fn deadline_cmp(a: u64, b: u64) -> core::cmp::Ordering {
    use core::cmp::Ordering;

    let a = a & DEADLINE_MASK;
    let b = b & DEADLINE_MASK;
    if a == b {
        return Ordering::Equal;
    }

    let forward = b.wrapping_sub(a) & DEADLINE_MASK;
    if forward < DEADLINE_HALF {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Ordering of two purified EDF keys (deadline or background)
///
/// Every deadline orders ahead of every background priority; deadlines
/// compare by [`deadline_cmp`]; background priorities compare as plain
/// integers.
#[inline]
pub fn edf_key_cmp(left: PriorityControl, right: PriorityControl) -> core::cmp::Ordering {
    use core::cmp::Ordering;

    match (is_background(left), is_background(right)) {
        (false, false) => deadline_cmp(key_deadline(left), key_deadline(right)),
        (true, true) => left.cmp(&right),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
    }
}
