//! Visit bookkeeping: the token ledger, the primary slot, and the
//! per-prop-name applied watermarks.
//!
//! The ledger is the engine's race arbiter. Tokens are allocated in
//! strictly increasing order; a response is applied only if its token is
//! the newest among all visits targeting the same slot:
//!
//! - the primary slot holds at most one in-flight full navigation, and a
//!   newly accepted one cancels its predecessor;
//! - partial reloads serialize per prop name through the watermark map:
//!   an arriving result drops every prop whose watermark is already newer.

use std::collections::HashMap;

use passage_cache::CacheKey;
use passage_protocol::ProtocolRequest;
use passage_types::cx::Cx;
use passage_types::intent::VisitIntent;
use passage_types::{PageGeneration, VisitToken};
use serde_json::Map;

use crate::poll::PollId;

/// What slot a visit occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VisitKind {
    /// Full navigation: occupies the primary slot.
    Primary,
    /// Prop-subset reload of the current component.
    Partial,
    /// Populates the prefetch cache; never touches the page store.
    Prefetch { key: CacheKey },
    /// Background refresh of a consumed cache entry; re-applies to the
    /// store if the page generation is unchanged on arrival.
    Revalidate { key: CacheKey },
}

/// Who issued a visit; drives per-origin bookkeeping on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum VisitOrigin {
    Api,
    Poll(PollId),
    Deferred(String),
}

/// One tracked in-flight visit.
#[derive(Debug)]
pub(crate) struct ActiveVisit {
    pub token: VisitToken,
    pub intent: VisitIntent,
    pub kind: VisitKind,
    pub origin: VisitOrigin,
    pub cx: Cx,
    pub generation: PageGeneration,
    pub request: ProtocolRequest,
    pub redirect_hops: usize,
}

/// The ledger of active visits.
#[derive(Debug, Default)]
pub(crate) struct VisitLedger {
    next_token: u64,
    active: HashMap<VisitToken, ActiveVisit>,
    primary: Option<VisitToken>,
    watermarks: HashMap<String, VisitToken>,
    generation: PageGeneration,
}

impl VisitLedger {
    /// Allocate the next (strictly larger) token.
    pub fn allocate(&mut self) -> VisitToken {
        self.next_token += 1;
        VisitToken::new(self.next_token).expect("token counter starts at 1")
    }

    pub fn insert(&mut self, visit: ActiveVisit) {
        if matches!(visit.kind, VisitKind::Primary) {
            self.primary = Some(visit.token);
        }
        self.active.insert(visit.token, visit);
    }

    pub fn get(&self, token: VisitToken) -> Option<&ActiveVisit> {
        self.active.get(&token)
    }

    pub fn get_mut(&mut self, token: VisitToken) -> Option<&mut ActiveVisit> {
        self.active.get_mut(&token)
    }

    /// Remove a visit from the ledger, clearing the primary slot if it
    /// owned it.
    pub fn remove(&mut self, token: VisitToken) -> Option<ActiveVisit> {
        if self.primary == Some(token) {
            self.primary = None;
        }
        self.active.remove(&token)
    }

    /// The in-flight primary visit's token, if any.
    pub fn primary(&self) -> Option<VisitToken> {
        self.primary
    }

    /// Tokens of active partial visits whose `only` roots intersect
    /// `names`.
    pub fn partials_touching(&self, names: &[String]) -> Vec<VisitToken> {
        self.active
            .values()
            .filter(|visit| matches!(visit.kind, VisitKind::Partial))
            .filter(|visit| {
                visit
                    .intent
                    .only
                    .iter()
                    .any(|path| names.iter().any(|name| name == path.root()))
            })
            .map(|visit| visit.token)
            .collect()
    }

    /// The current page generation.
    pub fn generation(&self) -> PageGeneration {
        self.generation
    }

    /// A primary page committed: advance the generation and forget the
    /// superseded page's watermarks.
    pub fn advance_generation(&mut self) {
        self.generation = self.generation.next();
        self.watermarks.clear();
    }

    /// Drop from `props` every name already applied by a newer token, and
    /// record the surviving names as applied by `token`.
    pub fn filter_by_watermark(
        &mut self,
        token: VisitToken,
        props: &mut Map<String, serde_json::Value>,
    ) -> usize {
        let before = props.len();
        props.retain(|name, _| {
            !self
                .watermarks
                .get(name)
                .is_some_and(|applied| *applied > token)
        });
        for name in props.keys() {
            let newest = self
                .watermarks
                .get(name)
                .copied()
                .map_or(token, |applied| applied.max(token));
            self.watermarks.insert(name.clone(), newest);
        }
        before - props.len()
    }
}
