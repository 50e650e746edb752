//! Deadline-ordered timer queue.
//!
//! Keys are `(deadline, sequence)`: equal deadlines fire in insertion
//! order. A timer is popped before its callback runs, so removing it from
//! inside that callback finds nothing and is a no-op.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Handle returned by `add_timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId {
    deadline: Instant,
    seq: u64,
}

impl TimerId {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

pub(crate) struct TimerQueue<F> {
    timers: BTreeMap<TimerId, F>,
    next_seq: u64,
}

impl<F> TimerQueue<F> {
    pub(crate) fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Instant, callback: F) -> TimerId {
        let id = TimerId {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.timers.insert(id, callback);
        id
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> Option<F> {
        self.timers.remove(&id)
    }

    #[inline]
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|id| id.deadline)
    }

    /// Pop the earliest timer if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<(TimerId, F)> {
        let first = *self.timers.keys().next()?;
        if first.deadline > now {
            return None;
        }
        self.timers.remove(&first).map(|f| (first, f))
    }

    /// Time until the earliest deadline, zero if already due.
    pub(crate) fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|d| d.saturating_duration_since(now))
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}
