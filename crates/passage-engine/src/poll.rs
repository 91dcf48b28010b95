//! Poll bookkeeping: interval-driven repeated partial reloads.
//!
//! Ticks chain rather than overlap: the next tick is armed only when the
//! previous reload resolves, so a slow server never accumulates in-flight
//! polls. Visibility transitions pause non-keep-alive polls.

use std::collections::HashMap;
use std::fmt;

use passage_types::path::PropPath;
use passage_types::{TickSpan, VisitToken};

use crate::timer::TimerId;

/// Identifier for one poll instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(u64);

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll#{}", self.0)
    }
}

/// Options for the partial reload a poll (or an explicit `reload`) issues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadOptions {
    pub only: Vec<PropPath>,
    pub except: Vec<PropPath>,
    pub reset: Vec<PropPath>,
    pub headers: Vec<(String, String)>,
}

/// Start/stop behavior for a poll instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollControl {
    /// Start ticking immediately.
    pub auto_start: bool,
    /// Keep ticking while the page is hidden.
    pub keep_alive: bool,
}

impl Default for PollControl {
    fn default() -> Self {
        Self {
            auto_start: true,
            keep_alive: false,
        }
    }
}

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    #[default]
    Visible,
    Hidden,
}

/// One poll instance's state.
#[derive(Debug)]
pub(crate) struct PollState {
    pub interval: TickSpan,
    pub options: ReloadOptions,
    pub keep_alive: bool,
    /// Whether the consumer wants this poll running.
    pub active: bool,
    /// Paused by a hidden page (non-keep-alive polls only).
    pub suspended: bool,
    pub timer: Option<TimerId>,
    pub in_flight: Option<VisitToken>,
}

impl PollState {
    /// Whether the next tick may be armed.
    pub fn may_tick(&self) -> bool {
        self.active && !self.suspended && self.in_flight.is_none()
    }
}

/// The set of poll instances.
#[derive(Debug, Default)]
pub(crate) struct PollManager {
    polls: HashMap<PollId, PollState>,
    next_id: u64,
}

impl PollManager {
    pub fn create(
        &mut self,
        interval: TickSpan,
        options: ReloadOptions,
        keep_alive: bool,
    ) -> PollId {
        self.next_id += 1;
        let id = PollId(self.next_id);
        self.polls.insert(
            id,
            PollState {
                interval,
                options,
                keep_alive,
                active: false,
                suspended: false,
                timer: None,
                in_flight: None,
            },
        );
        id
    }

    pub fn get(&self, id: PollId) -> Option<&PollState> {
        self.polls.get(&id)
    }

    pub fn get_mut(&mut self, id: PollId) -> Option<&mut PollState> {
        self.polls.get_mut(&id)
    }

    pub fn remove(&mut self, id: PollId) -> Option<PollState> {
        self.polls.remove(&id)
    }

    /// Ids of every poll instance.
    pub fn ids(&self) -> Vec<PollId> {
        self.polls.keys().copied().collect()
    }

    /// Find the poll that owns an in-flight visit.
    pub fn owner_of(&self, token: VisitToken) -> Option<PollId> {
        self.polls
            .iter()
            .find(|(_, state)| state.in_flight == Some(token))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn may_tick_requires_active_unsuspended_idle() {
        let mut manager = PollManager::default();
        let id = manager.create(TickSpan::from_secs(5), ReloadOptions::default(), false);
        let state = manager.get_mut(id).expect("state");

        assert!(!state.may_tick());
        state.active = true;
        assert!(state.may_tick());
        state.suspended = true;
        assert!(!state.may_tick());
        state.suspended = false;
        state.in_flight = VisitToken::new(3);
        assert!(!state.may_tick());
    }

    #[test]
    fn owner_lookup_by_in_flight_token() {
        let mut manager = PollManager::default();
        let a = manager.create(TickSpan::from_secs(5), ReloadOptions::default(), false);
        let b = manager.create(TickSpan::from_secs(5), ReloadOptions::default(), true);
        manager.get_mut(a).expect("state").in_flight = VisitToken::new(7);

        assert_eq!(manager.owner_of(VisitToken::new(7).expect("token")), Some(a));
        assert_eq!(manager.owner_of(VisitToken::new(8).expect("token")), None);
        assert!(manager.remove(b).is_some());
    }
}
