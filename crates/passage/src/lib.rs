//! Public API facade for Passage.
//!
//! Re-exports the engine surface adapters consume, plus [`Router`]: thin
//! method sugar over [`Engine`] with no decision logic of its own.
//! Construct one router per embedded application; anything process-wide
//! belongs to the integration layer.

pub use passage_cache;
pub use passage_history;
pub use passage_merge;

pub use passage_engine::{
    Engine, EngineConfig, Event, EventKind, Flow, GroupState, HandlerError, HistorySink,
    PollControl, PollId, ReloadOptions, Subscription, Transport, ViewportProbe, VisibilityState,
};
pub use passage_error::{FailureKind, PassageError, Result};
pub use passage_protocol::{ProtocolRequest, RawResponse, headers};
pub use passage_types::cx::Cx;
pub use passage_types::intent::{CacheFor, Method, PrefetchMode, PreserveOption, VisitIntent};
pub use passage_types::page::{Page, ScrollRegion};
pub use passage_types::path::PropPath;
pub use passage_types::{Tick, TickSpan, VisitToken};

use std::sync::Arc;

use serde_json::Value;

/// Ergonomic wrapper over [`Engine`].
pub struct Router<T: Transport, S: HistorySink, V: ViewportProbe> {
    engine: Engine<T, S, V>,
}

impl<T: Transport, S: HistorySink, V: ViewportProbe> Router<T, S, V> {
    /// Build a router around the initially embedded page.
    pub fn new(initial: Page, transport: T, sink: S, viewport: V, config: EngineConfig) -> Self {
        Self {
            engine: Engine::new(initial, transport, sink, viewport, config),
        }
    }

    /// Direct access to the engine for host edges
    /// (`deliver_response`, `advance_clock`, `on_pop_state`, ...).
    pub fn engine(&mut self) -> &mut Engine<T, S, V> {
        &mut self.engine
    }

    /// The current page.
    #[must_use]
    pub fn page(&self) -> Arc<Page> {
        self.engine.page()
    }

    /// Start a visit.
    pub fn visit(&mut self, intent: VisitIntent) -> Result<Option<VisitToken>> {
        self.engine.submit(intent)
    }

    /// GET visit to `url`.
    pub fn get(&mut self, url: impl Into<String>) -> Result<Option<VisitToken>> {
        self.engine.submit(VisitIntent::get(url))
    }

    /// POST visit to `url` carrying `data`.
    pub fn post(&mut self, url: impl Into<String>, data: Value) -> Result<Option<VisitToken>> {
        self.mutate(url, Method::Post, data)
    }

    /// PUT visit to `url` carrying `data`.
    pub fn put(&mut self, url: impl Into<String>, data: Value) -> Result<Option<VisitToken>> {
        self.mutate(url, Method::Put, data)
    }

    /// PATCH visit to `url` carrying `data`.
    pub fn patch(&mut self, url: impl Into<String>, data: Value) -> Result<Option<VisitToken>> {
        self.mutate(url, Method::Patch, data)
    }

    /// DELETE visit to `url`.
    pub fn delete(&mut self, url: impl Into<String>) -> Result<Option<VisitToken>> {
        self.engine
            .submit(VisitIntent::with_method(url, Method::Delete))
    }

    fn mutate(
        &mut self,
        url: impl Into<String>,
        method: Method,
        data: Value,
    ) -> Result<Option<VisitToken>> {
        let mut intent = VisitIntent::with_method(url, method);
        intent.data = Some(data);
        self.engine.submit(intent)
    }

    /// Refresh the current URL in place.
    pub fn reload(&mut self, options: ReloadOptions) -> Result<Option<VisitToken>> {
        self.engine.reload(options)
    }

    /// Fetch `url` into the prefetch cache.
    pub fn prefetch(
        &mut self,
        url: impl Into<String>,
        mode: PrefetchMode,
        cache_for: CacheFor,
    ) -> Result<Option<VisitToken>> {
        let mut intent = VisitIntent::get(url);
        intent.prefetch = Some(mode);
        intent.cache_for = Some(cache_for);
        self.engine.prefetch(intent)
    }

    /// Drop cached prefetch entries for `url`.
    pub fn flush(&mut self, url: &str) -> usize {
        self.engine.flush_prefetch(url)
    }

    /// Drop every cached prefetch entry.
    pub fn flush_all(&mut self) {
        self.engine.flush_all_prefetch();
    }

    /// Create a poll instance.
    pub fn poll(
        &mut self,
        interval: TickSpan,
        options: ReloadOptions,
        control: PollControl,
    ) -> PollId {
        self.engine.poll(interval, options, control)
    }

    /// Persist a value on the current history entry.
    pub fn remember(&mut self, value: Value, key: impl Into<String>) -> Result<()> {
        self.engine.remember(key, value)
    }

    /// Read back a remembered value.
    #[must_use]
    pub fn restore(&self, key: &str) -> Option<Value> {
        self.engine.restore_remembered(key)
    }

    /// Subscribe to a lifecycle event.
    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&Event) -> std::result::Result<Flow, HandlerError> + Send + 'static,
    ) -> Subscription {
        self.engine.on(kind, handler)
    }

    /// Remove a lifecycle subscription.
    pub fn off(&mut self, subscription: Subscription) -> bool {
        self.engine.off(subscription)
    }

    /// Cancel one visit.
    pub fn cancel(&mut self, token: VisitToken) {
        self.engine.cancel(token);
    }
}
