//! Cancellable delayed-message queue on a virtual clock
//!
//! The queue never reads the wall clock. Callers move time forward explicitly, which lets
//! tests step a run deterministically and lets the run service map real time onto it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Handle returned by [`TimerQueue::schedule`], used to cancel a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct TimerQueue<T> {
    now: Duration,
    next_seq: u64,
    /// Keyed by (deadline, sequence) so equal deadlines fire in scheduling order
    entries: BTreeMap<(Duration, u64), T>,
    deadlines: HashMap<TimerId, Duration>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schedule `payload` to fire `delay` after the current virtual time
    pub fn schedule(&mut self, delay: Duration, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;

        let due = self.now.checked_add(delay).unwrap_or(Duration::MAX);
        let id = TimerId(seq);
        self.entries.insert((due, seq), payload);
        self.deadlines.insert(id, due);
        id
    }

    /// Remove a pending timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let due = self.deadlines.remove(&id)?;
        self.entries.remove(&(due, id.0))
    }

    /// Drop every pending timer; the clock keeps its value
    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.first_key_value().map(|((due, _), _)| *due)
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its deadline
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerId, T)> {
        let (due, seq) = *self.entries.first_key_value()?.0;
        if due > until {
            return None;
        }

        let payload = self.entries.remove(&(due, seq))?;
        let id = TimerId(seq);
        self.deadlines.remove(&id);
        if due > self.now {
            self.now = due;
        }
        Some((id, payload))
    }

    /// Move the clock forward without firing anything. Never moves backwards.
    pub fn set_now(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
