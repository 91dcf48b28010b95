//! Typed lifecycle event bus.
//!
//! One publish/subscribe channel per event kind with explicit unsubscribe
//! handles. Handlers return a [`Flow`] verdict (`before` and `invalid`
//! subscribers can veto the default behavior) or an error, which the
//! engine converts into an `exception` event without touching its visit
//! bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use passage_types::VisitToken;
use passage_types::intent::VisitIntent;
use passage_types::page::Page;
use serde_json::{Map, Value};

/// The lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Before,
    Start,
    Progress,
    Success,
    Error,
    Invalid,
    Exception,
    Finish,
    Navigate,
    Cancel,
    Deferred,
}

impl EventKind {
    /// The event's wire-ish name, used in logs and exception payloads.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Start => "start",
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Error => "error",
            Self::Invalid => "invalid",
            Self::Exception => "exception",
            Self::Finish => "finish",
            Self::Navigate => "navigate",
            Self::Cancel => "cancel",
            Self::Deferred => "deferred",
        }
    }
}

/// A lifecycle event with its payload.
#[derive(Debug, Clone)]
pub enum Event {
    /// A visit intent is about to be accepted; `Stop` vetoes it.
    Before { intent: VisitIntent },
    /// A visit was accepted and its request dispatched (or served from
    /// cache).
    Start { token: VisitToken, url: String },
    /// Transfer progress for an in-flight visit.
    Progress {
        token: VisitToken,
        loaded: u64,
        total: Option<u64>,
    },
    /// A page was applied without validation errors.
    Success { token: VisitToken, page: Arc<Page> },
    /// The visit failed, or a page carrying validation errors was applied;
    /// `errors` is the prop-path → message map (empty for transport
    /// failures, which carry `detail` instead).
    Error {
        token: VisitToken,
        errors: Map<String, Value>,
        detail: Option<String>,
    },
    /// A non-protocol response arrived; `Stop` suppresses the full-
    /// navigation fallback.
    Invalid {
        token: VisitToken,
        status: u16,
        url: String,
    },
    /// A consumer callback failed while handling `event`.
    Exception { event: String, detail: String },
    /// The visit reached a terminal state (applied, failed, or cancelled).
    Finish { token: VisitToken },
    /// The current page changed through history traversal.
    Navigate { page: Arc<Page> },
    /// The visit was superseded or aborted.
    Cancel { token: VisitToken },
    /// A deferred prop group resolved.
    Deferred { token: VisitToken, group: String },
}

impl Event {
    /// The kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Before { .. } => EventKind::Before,
            Self::Start { .. } => EventKind::Start,
            Self::Progress { .. } => EventKind::Progress,
            Self::Success { .. } => EventKind::Success,
            Self::Error { .. } => EventKind::Error,
            Self::Invalid { .. } => EventKind::Invalid,
            Self::Exception { .. } => EventKind::Exception,
            Self::Finish { .. } => EventKind::Finish,
            Self::Navigate { .. } => EventKind::Navigate,
            Self::Cancel { .. } => EventKind::Cancel,
            Self::Deferred { .. } => EventKind::Deferred,
        }
    }
}

/// Handler verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Veto the default behavior (meaningful for `before` and `invalid`).
    Stop,
}

/// A failure raised by a consumer callback.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub detail: String,
}

impl HandlerError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(detail: String) -> Self {
        Self { detail }
    }
}

impl From<&str> for HandlerError {
    fn from(detail: &str) -> Self {
        Self::new(detail)
    }
}

type Handler = Box<dyn FnMut(&Event) -> Result<Flow, HandlerError> + Send>;

/// Unsubscribe handle returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

/// What one emit produced: whether any handler vetoed, and which handlers
/// failed (their details become `exception` events).
#[derive(Debug, Default)]
pub struct EmitOutcome {
    pub vetoed: bool,
    pub failures: Vec<String>,
}

/// Typed pub/sub for lifecycle events.
#[derive(Default)]
pub struct EventBus {
    channels: HashMap<EventKind, Vec<(u64, Handler)>>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// An empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind.
    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&Event) -> Result<Flow, HandlerError> + Send + 'static,
    ) -> Subscription {
        self.next_id += 1;
        let id = self.next_id;
        self.channels
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        Subscription { kind, id }
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn off(&mut self, subscription: Subscription) -> bool {
        let Some(handlers) = self.channels.get_mut(&subscription.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        handlers.len() != before
    }

    /// Deliver `event` to its channel.
    ///
    /// Every handler runs even if an earlier one vetoes or fails; failures
    /// are collected, never propagated.
    pub fn emit(&mut self, event: &Event) -> EmitOutcome {
        let mut outcome = EmitOutcome::default();
        let Some(handlers) = self.channels.get_mut(&event.kind()) else {
            return outcome;
        };
        for (_, handler) in handlers.iter_mut() {
            match handler(event) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => outcome.vetoed = true,
                Err(err) => outcome.failures.push(err.detail),
            }
        }
        outcome
    }
}
