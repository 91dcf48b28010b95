//! History management: the persisted-state stack behind back/forward.
//!
//! [`HistoryManager`] mirrors one entry per browser history position,
//! each carrying `{ page, scrollRegions, rememberedState }`. It owns:
//!
//! - scroll-region capture on forward navigation (the *previous* page's
//!   regions are persisted so returning restores them);
//! - remembered state (arbitrary key/value pairs a page wants persisted
//!   across back/forward);
//! - a serialized-size quota with least-recently-touched eviction;
//! - coalescing of rapid write bursts so history-API call volume stays
//!   bounded;
//! - sealing of sensitive entries (`encryptHistory`) and session-key
//!   rotation on `clearHistory`.
//!
//! The actual history API is behind the [`HistorySink`] seam; the engine
//! supplies a browser-backed sink in production and a recording sink in
//! tests.

pub mod seal;
pub mod stack;

use std::sync::Arc;

use passage_error::{PassageError, Result};
use passage_types::page::{Page, ScrollRegion};
use passage_types::{Tick, TickSpan, limits};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::seal::EntrySealer;
use crate::stack::{HistoryStack, StackEntry};

// ---------------------------------------------------------------------------
// Seams and wire shapes
// ---------------------------------------------------------------------------

/// The history-API seam. `state` is the serialized [`PersistedState`].
pub trait HistorySink {
    /// Push a new history entry.
    fn push(&mut self, url: &str, state: &[u8]);
    /// Replace the current history entry.
    fn replace(&mut self, url: &str, state: &[u8]);
}

/// How a committed page lands in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// New entry; the previous page's scroll regions are captured first.
    Push,
    /// Overwrite the current entry.
    Replace,
}

/// The serialized form stored in the history API.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "format", rename_all = "camelCase")]
enum PersistedState {
    #[serde(rename = "plain")]
    Plain { entry: PersistedEntry },
    #[serde(rename = "sealed")]
    Sealed { nonce: Vec<u8>, ciphertext: Vec<u8> },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    entry_id: u64,
    page: Page,
    scroll_regions: Vec<ScrollRegion>,
    remembered_state: Map<String, Value>,
}

/// A decoded history entry handed back to the engine on popstate.
#[derive(Debug, Clone)]
pub struct RestoredEntry {
    pub entry_id: u64,
    pub page: Arc<Page>,
    pub scroll_regions: Vec<ScrollRegion>,
    pub remembered: Map<String, Value>,
}

/// Tunables for [`HistoryManager`].
#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    pub quota_bytes: usize,
    pub coalesce_window: TickSpan,
    pub burst_threshold: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            quota_bytes: limits::DEFAULT_HISTORY_QUOTA_BYTES,
            coalesce_window: TickSpan::from_millis(limits::HISTORY_COALESCE_WINDOW_MS),
            burst_threshold: limits::HISTORY_BURST_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
// Write coalescing
// ---------------------------------------------------------------------------

/// Burst bookkeeping: replace-writes beyond the threshold inside one
/// window collapse into a single trailing flush of terminal state.
#[derive(Debug)]
struct Coalesce {
    window: TickSpan,
    threshold: u32,
    window_start: Tick,
    writes_in_window: u32,
    flush_at: Option<Tick>,
}

impl Coalesce {
    fn new(window: TickSpan, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            window_start: Tick::ZERO,
            writes_in_window: 0,
            flush_at: None,
        }
    }

    /// Record a write attempt; `true` means "write through now".
    fn admit(&mut self, now: Tick) -> bool {
        if now.since(self.window_start) > self.window {
            self.window_start = now;
            self.writes_in_window = 0;
        }
        self.writes_in_window += 1;
        if self.writes_in_window > self.threshold {
            self.flush_at = Some(self.window_start.after(self.window));
            false
        } else {
            true
        }
    }

    fn due(&self, now: Tick) -> bool {
        self.flush_at.is_some_and(|at| now >= at)
    }
}

// ---------------------------------------------------------------------------
// HistoryManager
// ---------------------------------------------------------------------------

/// Mirrors the browser history stack and owns its persistence policy.
#[derive(Debug)]
pub struct HistoryManager<S: HistorySink> {
    stack: HistoryStack,
    sink: S,
    sealer: EntrySealer,
    coalesce: Coalesce,
    next_entry_id: u64,
}

impl<S: HistorySink> HistoryManager<S> {
    /// A manager seeded with the initially embedded page.
    pub fn new(initial: Arc<Page>, sink: S, sealer: EntrySealer, config: &HistoryConfig) -> Self {
        let entry = StackEntry {
            entry_id: 1,
            page: initial,
            scroll_regions: Vec::new(),
            remembered: Map::new(),
            byte_len: 0,
            last_touched: Tick::ZERO,
        };
        let mut manager = Self {
            stack: HistoryStack::new(entry, config.quota_bytes),
            sink,
            sealer,
            coalesce: Coalesce::new(config.coalesce_window, config.burst_threshold),
            next_entry_id: 2,
        };
        // Seed the browser entry so an immediate popstate can restore.
        let _ = manager.write_current(CommitMode::Replace, Tick::ZERO);
        manager
    }

    /// Number of mirrored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Never true.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// The page of the current entry.
    #[must_use]
    pub fn current_page(&self) -> Arc<Page> {
        Arc::clone(&self.stack.current().page)
    }

    /// Commit a newly applied page.
    ///
    /// On [`CommitMode::Push`], `previous_scroll` (the regions of the page
    /// being left) is saved into the outgoing entry before the new one is
    /// pushed, so navigating back restores it. On `clearHistory` pages the
    /// rest of the stack is dropped and the sealing key rotates.
    pub fn commit(
        &mut self,
        page: Arc<Page>,
        mode: CommitMode,
        previous_scroll: Vec<ScrollRegion>,
        now: Tick,
    ) -> Result<()> {
        let clear_after = page.clear_history;
        match mode {
            CommitMode::Push => {
                self.stack.current_mut().scroll_regions = previous_scroll;
                self.stack.current_mut().last_touched = now;
                self.write_current(CommitMode::Replace, now)?;

                let entry = StackEntry {
                    entry_id: self.next_entry_id,
                    page,
                    scroll_regions: Vec::new(),
                    remembered: Map::new(),
                    byte_len: 0,
                    last_touched: now,
                };
                self.next_entry_id += 1;
                self.stack.push(entry);
                self.write_current(CommitMode::Push, now)?;
            }
            CommitMode::Replace => {
                let remembered = std::mem::take(&mut self.stack.current_mut().remembered);
                let entry_id = self.stack.current().entry_id;
                let entry = StackEntry {
                    entry_id,
                    page,
                    scroll_regions: self.stack.current().scroll_regions.clone(),
                    remembered,
                    byte_len: 0,
                    last_touched: now,
                };
                self.stack.replace(entry);
                self.write_current(CommitMode::Replace, now)?;
            }
        }
        if clear_after {
            self.clear(now)?;
        }
        Ok(())
    }

    /// Store a remembered key/value on the current entry.
    pub fn remember_set(&mut self, key: impl Into<String>, value: Value, now: Tick) -> Result<()> {
        self.stack
            .current_mut()
            .remembered
            .insert(key.into(), value);
        self.stack.current_mut().last_touched = now;
        self.write_current(CommitMode::Replace, now)
    }

    /// Read a remembered value from the current entry.
    #[must_use]
    pub fn remember_get(&self, key: &str) -> Option<&Value> {
        self.stack.current().remembered.get(key)
    }

    /// Decode a popped browser state and make it current.
    ///
    /// Sealed entries are opened with the session key; a rotated key makes
    /// them unreadable, which the caller resolves with a hard navigation.
    pub fn restore(&mut self, raw: &[u8], now: Tick) -> Result<RestoredEntry> {
        let state: PersistedState =
            serde_json::from_slice(raw).map_err(|err| PassageError::HistoryCorrupt {
                detail: err.to_string(),
            })?;
        let entry = match state {
            PersistedState::Plain { entry } => entry,
            PersistedState::Sealed { nonce, ciphertext } => {
                let plaintext = self.sealer.open(&nonce, &ciphertext)?;
                serde_json::from_slice(&plaintext).map_err(|err| PassageError::HistoryCorrupt {
                    detail: err.to_string(),
                })?
            }
        };

        let restored = RestoredEntry {
            entry_id: entry.entry_id,
            page: Arc::new(entry.page.clone()),
            scroll_regions: entry.scroll_regions.clone(),
            remembered: entry.remembered_state.clone(),
        };

        if self.stack.activate(entry.entry_id, now) {
            // The browser state is authoritative for the entry's content.
            let mirrored = self.stack.current_mut();
            mirrored.page = Arc::clone(&restored.page);
            mirrored.scroll_regions = restored.scroll_regions.clone();
            mirrored.remembered = restored.remembered.clone();
        } else {
            debug!(entry_id = entry.entry_id, "re-adopting evicted history entry");
            self.stack.adopt(StackEntry {
                entry_id: entry.entry_id,
                page: Arc::clone(&restored.page),
                scroll_regions: restored.scroll_regions.clone(),
                remembered: restored.remembered.clone(),
                byte_len: raw.len(),
                last_touched: now,
            });
        }
        Ok(restored)
    }

    /// Drop every entry but the current one and rotate the sealing key.
    pub fn clear(&mut self, now: Tick) -> Result<()> {
        info!("clearing history stack and rotating sealing key");
        self.stack.clear_except_current();
        self.sealer.rotate();
        self.write_current(CommitMode::Replace, now)
    }

    /// When the next coalesced flush is due, if one is pending.
    #[must_use]
    pub fn pending_flush_at(&self) -> Option<Tick> {
        self.coalesce.flush_at
    }

    /// Perform a due coalesced flush. Returns `true` when a write went
    /// through to the sink.
    pub fn flush_due(&mut self, now: Tick) -> Result<bool> {
        if !self.coalesce.due(now) {
            return Ok(false);
        }
        self.coalesce.flush_at = None;
        self.coalesce.window_start = now;
        self.coalesce.writes_in_window = 0;
        self.persist_current(CommitMode::Replace, now)?;
        Ok(true)
    }

    fn write_current(&mut self, mode: CommitMode, now: Tick) -> Result<()> {
        // Structural pushes always write through; replace-writes coalesce
        // under burst so only the terminal state is persisted.
        if matches!(mode, CommitMode::Push) || self.coalesce.admit(now) {
            self.persist_current(mode, now)?;
        }
        Ok(())
    }

    fn persist_current(&mut self, mode: CommitMode, _now: Tick) -> Result<()> {
        let current = self.stack.current();
        let sealed = current.page.encrypt_history;
        let url = current.page.url.clone();
        let entry = PersistedEntry {
            entry_id: current.entry_id,
            page: (*current.page).clone(),
            scroll_regions: current.scroll_regions.clone(),
            remembered_state: current.remembered.clone(),
        };
        let inner = serde_json::to_vec(&entry)?;
        let byte_len = inner.len();

        let bytes = if sealed {
            let (nonce, ciphertext) = self.sealer.seal(&inner)?;
            serde_json::to_vec(&PersistedState::Sealed { nonce, ciphertext })?
        } else {
            serde_json::to_vec(&PersistedState::Plain { entry })?
        };

        self.stack.current_mut().byte_len = byte_len;
        let _ = self.stack.enforce_quota();
        match mode {
            CommitMode::Push => self.sink.push(&url, &bytes),
            CommitMode::Replace => self.sink.replace(&url, &bytes),
        }
        Ok(())
    }
}
