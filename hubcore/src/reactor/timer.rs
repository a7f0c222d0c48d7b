use crate::utils::slab::Key;

use std::cmp::Ordering;
use std::task::Waker;
use std::time::Instant;

/// What a timer does when its deadline passes.
pub(crate) enum TimerAction {
    /// Wake the task suspended on the timer.
    Wake(Waker),
    /// Queue a loop callback.
    Call(Box<dyn FnOnce()>),
}

/// A live timer, owned by the reactor's timer slab.
pub(crate) struct TimerSlot {
    pub(crate) action: TimerAction,

    /// Whether this timer keeps the loop alive.
    pub(crate) keep_alive: bool,
}

/// An entry in the reactor timer queue.
///
/// Entries only point at a [`TimerSlot`]; a cancelled timer leaves a stale
/// entry behind that is skipped when it reaches the top of the heap.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Insertion sequence, so equal deadlines fire in arming order.
    pub(crate) seq: u64,

    /// Key of the slot in the timer slab.
    pub(crate) key: Key,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline, then by arming order.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Slab;

    use std::collections::BinaryHeap;
    use std::time::Duration;

    #[test]
    fn test_heap_pops_earliest_then_fifo() {
        let mut slab = Slab::new();
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        let late = slab.insert("late");
        let first = slab.insert("first");
        let second = slab.insert("second");

        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(20),
            seq: 0,
            key: late,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(5),
            seq: 1,
            key: first,
        });
        heap.push(TimerEntry {
            deadline: now + Duration::from_millis(5),
            seq: 2,
            key: second,
        });

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|e| *slab.get(e.key).unwrap())
            .collect();

        assert_eq!(order, vec!["first", "second", "late"]);
    }
}
