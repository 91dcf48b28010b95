//! The mirrored history-entry stack.
//!
//! One [`StackEntry`] per browser history position, capacity-bounded by a
//! serialized-size quota. Eviction drops the least-recently-touched entry
//! and never the current one.

use std::sync::Arc;

use passage_types::Tick;
use passage_types::page::{Page, ScrollRegion};
use serde_json::{Map, Value};
use tracing::warn;

/// One mirrored history position.
#[derive(Debug, Clone)]
pub struct StackEntry {
    /// Monotonic identifier; also stored in the persisted state so a
    /// popped browser entry can be matched back to its mirror.
    pub entry_id: u64,
    pub page: Arc<Page>,
    pub scroll_regions: Vec<ScrollRegion>,
    pub remembered: Map<String, Value>,
    /// Serialized (plaintext) size, counted against the quota.
    pub byte_len: usize,
    pub last_touched: Tick,
}

/// Quota-bounded entry stack with a current position.
#[derive(Debug)]
pub struct HistoryStack {
    entries: Vec<StackEntry>,
    current: usize,
    quota_bytes: usize,
}

impl HistoryStack {
    /// A stack holding only `initial`.
    #[must_use]
    pub fn new(initial: StackEntry, quota_bytes: usize) -> Self {
        Self {
            entries: vec![initial],
            current: 0,
            quota_bytes,
        }
    }

    /// Number of mirrored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never true: the current entry always exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total serialized bytes currently mirrored.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.byte_len).sum()
    }

    /// The current entry.
    #[must_use]
    pub fn current(&self) -> &StackEntry {
        &self.entries[self.current]
    }

    /// The current entry, mutable.
    pub fn current_mut(&mut self) -> &mut StackEntry {
        &mut self.entries[self.current]
    }

    /// Push a new entry after the current one, truncating any forward
    /// entries (matching browser semantics), then enforce the quota.
    pub fn push(&mut self, entry: StackEntry) -> Vec<u64> {
        self.entries.truncate(self.current + 1);
        self.entries.push(entry);
        self.current = self.entries.len() - 1;
        self.enforce_quota()
    }

    /// Replace the current entry in place, then enforce the quota.
    pub fn replace(&mut self, entry: StackEntry) -> Vec<u64> {
        self.entries[self.current] = entry;
        self.enforce_quota()
    }

    /// Make the entry with `entry_id` current, if it is still mirrored.
    pub fn activate(&mut self, entry_id: u64, now: Tick) -> bool {
        if let Some(index) = self.entries.iter().position(|e| e.entry_id == entry_id) {
            self.current = index;
            self.entries[index].last_touched = now;
            true
        } else {
            false
        }
    }

    /// Re-adopt an entry that was evicted from the mirror (the browser
    /// still had it). It becomes the current entry.
    pub fn adopt(&mut self, entry: StackEntry) -> Vec<u64> {
        self.entries.insert(self.current, entry);
        self.enforce_quota()
    }

    /// Drop everything except the current entry.
    pub fn clear_except_current(&mut self) {
        let current = self.entries.swap_remove(self.current);
        self.entries.clear();
        self.entries.push(current);
        self.current = 0;
    }

    /// Evict least-recently-touched non-current entries until the quota
    /// holds. Returns the evicted entry ids.
    pub(crate) fn enforce_quota(&mut self) -> Vec<u64> {
        let mut evicted = Vec::new();
        while self.total_bytes() > self.quota_bytes && self.entries.len() > 1 {
            let victim = self
                .entries
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != self.current)
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(index, _)| index);
            let Some(index) = victim else { break };
            let entry = self.entries.remove(index);
            warn!(
                entry_id = entry.entry_id,
                bytes = entry.byte_len,
                "evicting history entry over quota"
            );
            evicted.push(entry.entry_id);
            if index < self.current {
                self.current -= 1;
            }
        }
        if self.total_bytes() > self.quota_bytes {
            warn!(
                bytes = self.total_bytes(),
                quota = self.quota_bytes,
                "current history entry alone exceeds quota"
            );
        }
        evicted
    }
}
