//! Cancellable timer wheel.
//!
//! One scheduling abstraction shared by poll ticks, history write
//! coalescing, and scroll-settle delays, so cancellation semantics are
//! uniform. The wheel is passive: the host advances the clock and the
//! engine fires whatever became due.

use std::collections::BTreeMap;

use passage_types::Tick;

use crate::poll::PollId;

/// What a due timer asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    /// Issue the next reload for a poll instance.
    PollTick(PollId),
    /// Perform a pending coalesced history flush.
    HistoryFlush,
    /// Re-apply restored scroll regions after the document settled.
    ScrollRestore,
}

/// Handle for cancelling an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Deadline-ordered timer set.
#[derive(Debug, Default)]
pub struct TimerWheel {
    queue: BTreeMap<(Tick, u64), TimerTask>,
    next_id: u64,
}

impl TimerWheel {
    /// An empty wheel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `at`.
    pub fn arm(&mut self, at: Tick, task: TimerTask) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.queue.insert((at, id), task);
        TimerId(id)
    }

    /// Cancel an armed timer. Returns `true` if it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let key = self
            .queue
            .keys()
            .find(|(_, queued_id)| *queued_id == id.0)
            .copied();
        match key {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// The earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Tick> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every task due at or before `now`, in deadline
    /// order.
    pub fn fire_due(&mut self, now: Tick) -> Vec<(TimerId, TimerTask)> {
        let mut due = Vec::new();
        while let Some((&(at, id), &task)) = self.queue.iter().next() {
            if at > now {
                break;
            }
            self.queue.remove(&(at, id));
            due.push((TimerId(id), task));
        }
        due
    }
}
