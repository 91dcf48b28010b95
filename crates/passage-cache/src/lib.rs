//! Prefetch cache: TTL + stale-while-revalidate over prior visit results.
//!
//! The cache is a deterministic state machine driven by an explicit clock:
//! every operation takes `now`, so TTL boundaries are exact under test.
//!
//! - Entries are immutable once stored; a revalidation stores a brand-new
//!   entry rather than mutating in place, so concurrent readers never see
//!   a torn value.
//! - At most one revalidation per key is in flight; simultaneous stale
//!   hits share it.
//! - A zero-duration entry is servable exactly once, then discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use passage_types::intent::{CacheFor, Method};
use passage_types::page::Page;
use passage_types::{Tick, VisitToken};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// SHA-256 digest over method, URL, and serialized request data.
///
/// Distinct query parameters or bodies therefore never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Compute the key for one request shape.
    #[must_use]
    pub fn compute(method: Method, url: &str, data: Option<&Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(url.as_bytes());
        hasher.update([0]);
        if let Some(value) = data {
            // Canonical form: serde_json preserves map insertion order, so
            // the caller-normalized value serializes stably.
            hasher.update(value.to_string().as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// The raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entries and lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    page: Arc<Page>,
    request_url: String,
    stale_at: Tick,
    expires_at: Tick,
    serve_once: bool,
}

impl Entry {
    fn state(&self, now: Tick) -> EntryState {
        if self.serve_once {
            // Serve-once entries are stale from birth and reaped on use.
            EntryState::Stale
        } else if now >= self.expires_at {
            EntryState::Expired
        } else if now >= self.stale_at {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Fresh,
    Stale,
    Expired,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// No usable entry; go to the network.
    Miss,
    /// Servable without revalidation.
    Fresh(Arc<Page>),
    /// Servable immediately, but the caller must ensure one background
    /// revalidation is running (see [`PrefetchCache::begin_revalidate`]).
    Stale(Arc<Page>),
}

// ---------------------------------------------------------------------------
// PrefetchCache
// ---------------------------------------------------------------------------

/// Keyed TTL/stale-while-revalidate cache of prior visit results.
#[derive(Debug, Default)]
pub struct PrefetchCache {
    entries: HashMap<CacheKey, Entry>,
    inflight: HashMap<CacheKey, VisitToken>,
}

impl PrefetchCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `key` at `now`.
    ///
    /// Expired entries are discarded before use; a serve-once entry is
    /// returned as a stale hit and removed so it can never be served twice.
    pub fn lookup(&mut self, key: CacheKey, now: Tick) -> Lookup {
        let Some(entry) = self.entries.get(&key) else {
            return Lookup::Miss;
        };
        match entry.state(now) {
            EntryState::Fresh => Lookup::Fresh(Arc::clone(&entry.page)),
            EntryState::Stale => {
                let page = Arc::clone(&entry.page);
                if entry.serve_once {
                    debug!(%key, "serving one-shot cache entry");
                    self.entries.remove(&key);
                }
                Lookup::Stale(page)
            }
            EntryState::Expired => {
                debug!(%key, "discarding expired cache entry");
                self.entries.remove(&key);
                Lookup::Miss
            }
        }
    }

    /// Store a page under `key`, replacing any prior entry.
    pub fn store(
        &mut self,
        key: CacheKey,
        request_url: impl Into<String>,
        page: Arc<Page>,
        bounds: CacheFor,
        now: Tick,
    ) {
        let entry = Entry {
            page,
            request_url: request_url.into(),
            stale_at: now.after(bounds.stale()),
            expires_at: now.after(bounds.expire()),
            serve_once: bounds.is_serve_once(),
        };
        self.entries.insert(key, entry);
    }

    /// Claim the revalidation slot for `key`.
    ///
    /// Returns `true` if the caller now owns the single in-flight
    /// revalidation; `false` if one is already running (the caller should
    /// piggyback on it rather than issue a duplicate request).
    pub fn begin_revalidate(&mut self, key: CacheKey, token: VisitToken) -> bool {
        if self.inflight.contains_key(&key) {
            return false;
        }
        self.inflight.insert(key, token);
        true
    }

    /// Release the revalidation slot if `token` still owns it.
    ///
    /// Returns `true` when the slot was released.
    pub fn finish_revalidate(&mut self, key: CacheKey, token: VisitToken) -> bool {
        match self.inflight.get(&key) {
            Some(owner) if *owner == token => {
                self.inflight.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// The token currently revalidating `key`, if any.
    #[must_use]
    pub fn inflight(&self, key: CacheKey) -> Option<VisitToken> {
        self.inflight.get(&key).copied()
    }

    /// Remove every entry matching the predicate; returns how many were
    /// dropped. The predicate sees the key, the original request URL, and
    /// the cached page.
    pub fn invalidate_matching(
        &mut self,
        mut predicate: impl FnMut(&CacheKey, &str, &Page) -> bool,
    ) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !predicate(key, &entry.request_url, &entry.page));
        before - self.entries.len()
    }

    /// Drop every entry.
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }
}
