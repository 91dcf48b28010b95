//! The visit engine: accepts navigation intents, drives the wire protocol
//! through the transport seam, reconciles responses into the page store,
//! and keeps history, polls, prefetches, and deferred groups consistent.
//!
//! Concurrency model: single-logical-threaded and cooperative. The engine
//! never blocks: the host dispatches requests, later delivers responses
//! or failures by token, and advances the millisecond clock to fire
//! timers. Ordering is decided by token comparison, not arrival order:
//!
//! - at most one primary (full-navigation) visit is in flight; accepting
//!   a new one cancels its predecessor, whose late response is discarded;
//! - partial reloads run concurrently, serialized per prop name by the
//!   applied-watermark map;
//! - results stamped with a superseded page generation are discarded.

pub mod bus;
pub mod deferred;
pub mod poll;
pub mod seams;
pub mod store;
pub mod timer;
pub mod visit;

use std::sync::Arc;

use passage_cache::{CacheKey, Lookup, PrefetchCache};
use passage_error::{PassageError, Result};
use passage_history::seal::EntrySealer;
use passage_history::{CommitMode, HistoryConfig, HistoryManager};
use passage_protocol::{Classified, ProtocolRequest, RawResponse};
use passage_types::cx::Cx;
use passage_types::intent::{CacheFor, Method, PreserveOption, VisitIntent};
use passage_types::page::Page;
use passage_types::path::PropPath;
use passage_types::{PageGeneration, Tick, TickSpan, VisitToken, limits};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub use crate::bus::{Event, EventBus, EventKind, Flow, HandlerError, Subscription};
pub use crate::deferred::GroupState;
pub use crate::poll::{PollControl, PollId, ReloadOptions, VisibilityState};
pub use crate::seams::{HistorySink, Transport, ViewportProbe};
pub use crate::store::PageStore;

use crate::deferred::DeferredLoader;
use crate::poll::PollManager;
use crate::timer::{TimerId, TimerTask, TimerWheel};
use crate::visit::{ActiveVisit, VisitKind, VisitLedger, VisitOrigin};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine tunables; defaults come from `passage_types::limits`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub history: HistoryConfig,
    pub min_poll_interval: TickSpan,
    pub scroll_settle_delay: TickSpan,
    /// Cache bounds for prefetch visits that set none.
    pub default_cache_for: CacheFor,
    /// Deterministic sealing key stream for tests; `None` draws entropy.
    pub seal_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            min_poll_interval: TickSpan::from_millis(limits::MIN_POLL_INTERVAL_MS),
            scroll_settle_delay: TickSpan::from_millis(limits::SCROLL_SETTLE_DELAY_MS),
            default_cache_for: CacheFor::default(),
            seal_seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The navigation engine. Construct one per embedded application instance;
/// process-wide convenience accessors belong to integration layers, not
/// here.
pub struct Engine<T: Transport, S: HistorySink, V: ViewportProbe> {
    config: EngineConfig,
    now: Tick,
    transport: T,
    viewport: V,
    store: PageStore,
    history: HistoryManager<S>,
    cache: PrefetchCache,
    bus: EventBus,
    timers: TimerWheel,
    visits: VisitLedger,
    deferred: DeferredLoader,
    polls: PollManager,
    visibility: VisibilityState,
    pending_scroll: Option<Vec<passage_types::page::ScrollRegion>>,
    history_flush_timer: Option<TimerId>,
}

impl<T: Transport, S: HistorySink, V: ViewportProbe> Engine<T, S, V> {
    /// Build an engine around the initially embedded page.
    ///
    /// Deferred groups declared by the initial page are scheduled
    /// immediately, exactly as they would be after a visit.
    pub fn new(initial: Page, transport: T, sink: S, viewport: V, config: EngineConfig) -> Self {
        let initial = Arc::new(initial);
        let sealer = match config.seal_seed {
            Some(seed) => EntrySealer::from_seed(seed),
            None => EntrySealer::new(),
        };
        let history = HistoryManager::new(Arc::clone(&initial), sink, sealer, &config.history);
        let mut engine = Self {
            config,
            now: Tick::ZERO,
            transport,
            viewport,
            store: PageStore::new(Arc::clone(&initial)),
            history,
            cache: PrefetchCache::new(),
            bus: EventBus::new(),
            timers: TimerWheel::new(),
            visits: VisitLedger::default(),
            deferred: DeferredLoader::default(),
            polls: PollManager::default(),
            visibility: VisibilityState::Visible,
            pending_scroll: None,
            history_flush_timer: None,
        };
        if let Err(err) = engine.schedule_deferred(&initial) {
            warn!(%err, "failed to schedule initial deferred groups");
        }
        engine
    }

    // -- read surface -------------------------------------------------------

    /// The engine's current clock.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.now
    }

    /// The current page.
    #[must_use]
    pub fn page(&self) -> Arc<Page> {
        self.store.current()
    }

    /// The current page generation.
    #[must_use]
    pub fn generation(&self) -> PageGeneration {
        self.visits.generation()
    }

    /// Loading state of a deferred group on the current page.
    #[must_use]
    pub fn deferred_state(&self, group: &str) -> Option<GroupState> {
        self.deferred.state(group)
    }

    /// Subscribe to page-store changes.
    pub fn subscribe(&self, subscriber: impl FnMut(&Arc<Page>) + Send + 'static) -> u64 {
        self.store.subscribe(subscriber)
    }

    /// Remove a page-store subscriber.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.store.unsubscribe(id)
    }

    /// Subscribe to a lifecycle event kind.
    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl FnMut(&Event) -> std::result::Result<Flow, HandlerError> + Send + 'static,
    ) -> Subscription {
        self.bus.on(kind, handler)
    }

    /// Remove a lifecycle subscription.
    pub fn off(&mut self, subscription: Subscription) -> bool {
        self.bus.off(subscription)
    }

    // -- visit intake -------------------------------------------------------

    /// Accept a visit intent.
    ///
    /// Returns `Ok(None)` when a `before` subscriber vetoed the visit or
    /// nothing needed to be fetched; otherwise the accepted token.
    pub fn submit(&mut self, intent: VisitIntent) -> Result<Option<VisitToken>> {
        if self.emit(Event::Before {
            intent: intent.clone(),
        }) {
            debug!(url = %intent.url, "visit vetoed by before subscriber");
            return Ok(None);
        }

        let mut intent = intent;
        if !intent.only.is_empty() {
            let current = self.store.current();
            intent.only.retain(|path| {
                !(current.is_once_prop(path.root()) && current.props.contains_key(path.root()))
            });
            if intent.only.is_empty() && intent.except.is_empty() {
                debug!("every requested prop is an already-populated once-prop");
                return Ok(None);
            }
        }

        let partial = intent.is_partial();
        if !partial && intent.is_prefetchable() && intent.method == Method::Get {
            let key = CacheKey::compute(intent.method, &intent.url, intent.data.as_ref());
            match self.cache.lookup(key, self.now) {
                Lookup::Fresh(page) => {
                    debug!(%key, url = %intent.url, "serving fresh prefetched page");
                    let token = self.apply_cached(intent, &page)?;
                    return Ok(Some(token));
                }
                Lookup::Stale(page) => {
                    debug!(%key, url = %intent.url, "serving stale prefetched page");
                    let revalidate = intent.clone();
                    let token = self.apply_cached(intent, &page)?;
                    if self.cache.inflight(key).is_none() {
                        let revalidation = self.issue_visit(
                            revalidate,
                            VisitKind::Revalidate { key },
                            VisitOrigin::Api,
                        )?;
                        if self.visits.get(revalidation).is_some() {
                            self.cache.begin_revalidate(key, revalidation);
                        }
                    }
                    return Ok(Some(token));
                }
                Lookup::Miss => {}
            }
        }

        let kind = if partial {
            VisitKind::Partial
        } else {
            VisitKind::Primary
        };
        let token = self.issue_visit(intent, kind, VisitOrigin::Api)?;
        Ok(Some(token))
    }

    /// Partial-visit sugar: refresh the current URL in place.
    pub fn reload(&mut self, options: ReloadOptions) -> Result<Option<VisitToken>> {
        let current = self.store.current();
        let mut intent = VisitIntent::get(current.url.clone());
        intent.only = options.only;
        intent.except = options.except;
        intent.reset = options.reset;
        intent.headers = options.headers;
        intent.preserve_state = PreserveOption::Yes;
        intent.preserve_scroll = PreserveOption::Yes;
        intent.replace = true;
        self.submit(intent)
    }

    /// Fetch a page into the prefetch cache without applying it.
    ///
    /// No-op (returns `Ok(None)`) when a fresh entry or an in-flight fetch
    /// for the same key already exists.
    pub fn prefetch(&mut self, intent: VisitIntent) -> Result<Option<VisitToken>> {
        let key = CacheKey::compute(intent.method, &intent.url, intent.data.as_ref());
        if self.cache.inflight(key).is_some() {
            return Ok(None);
        }
        if let Lookup::Fresh(_) = self.cache.lookup(key, self.now) {
            return Ok(None);
        }
        let token = self.issue_visit(intent, VisitKind::Prefetch { key }, VisitOrigin::Api)?;
        if self.visits.get(token).is_some() {
            self.cache.begin_revalidate(key, token);
        }
        Ok(Some(token))
    }

    /// Drop cached prefetch entries whose request URL matches `url`.
    pub fn flush_prefetch(&mut self, url: &str) -> usize {
        self.cache
            .invalidate_matching(|_, request_url, _| request_url == url)
    }

    /// Drop every cached prefetch entry.
    pub fn flush_all_prefetch(&mut self) {
        self.cache.invalidate_all();
    }

    // -- cancellation -------------------------------------------------------

    /// Cancel one visit by token.
    pub fn cancel(&mut self, token: VisitToken) {
        let Some(visit) = self.visits.remove(token) else {
            return;
        };
        visit.cx.cancel();
        self.transport.abort(token);
        self.release_slots(&visit);
        self.emit(Event::Cancel { token });
        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
    }

    /// Cancel the in-flight primary visit, if any.
    pub fn cancel_primary(&mut self) {
        if let Some(token) = self.visits.primary() {
            self.cancel(token);
        }
    }

    /// Cancel every in-flight partial reload touching any of `names`.
    pub fn cancel_reloads_of(&mut self, names: &[PropPath]) {
        let roots: Vec<String> = names.iter().map(|path| path.root().to_owned()).collect();
        for token in self.visits.partials_touching(&roots) {
            self.cancel(token);
        }
    }

    // -- host edges ---------------------------------------------------------

    /// Deliver a transport response for `token`.
    ///
    /// Responses for unknown (cancelled, superseded) tokens are discarded
    /// silently; arrival order never overrides token order.
    pub fn deliver_response(&mut self, token: VisitToken, response: &RawResponse) -> Result<()> {
        let Some(active) = self.visits.get(token) else {
            debug!(%token, "dropping response for unknown or superseded visit");
            return Ok(());
        };
        if active.cx.is_cancelled() {
            return self.deliver_failure(token, PassageError::Cancelled);
        }
        let request = active.request.clone();
        let known_version = self.store.current().version.clone();

        match passage_protocol::classify(&request, response, known_version.as_deref()) {
            Err(err) => self.deliver_failure(token, err),
            Ok(Classified::Follow(next)) => self.follow_redirect(token, next),
            Ok(Classified::Page(page)) => {
                self.conclude_with_page(token, *page, response.status == 422)
            }
            Ok(Classified::ValidationMap(map)) => self.conclude_with_validation(token, map),
            Ok(Classified::VersionConflict { url }) => {
                info!(%url, "asset version conflict; forcing full document reload");
                self.conclude_hard_navigate(token, &url)
            }
            Ok(Classified::ExternalLocation { url }) => self.conclude_hard_navigate(token, &url),
            Ok(Classified::Invalid { status, url }) => self.conclude_invalid(token, status, &url),
        }
    }

    /// Deliver a transport failure for `token`.
    pub fn deliver_failure(&mut self, token: VisitToken, error: PassageError) -> Result<()> {
        let Some(visit) = self.visits.remove(token) else {
            debug!(%token, "dropping failure for unknown or superseded visit");
            return Ok(());
        };
        self.release_slots(&visit);
        if error.is_cancelled() || visit.cx.is_cancelled() {
            debug!(%token, "visit cancelled");
            self.emit(Event::Cancel { token });
        } else {
            warn!(%token, %error, "visit failed");
            self.emit(Event::Error {
                token,
                errors: Map::new(),
                detail: Some(error.to_string()),
            });
        }
        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
        Ok(())
    }

    /// Relay transfer progress for an in-flight visit.
    pub fn deliver_progress(&mut self, token: VisitToken, loaded: u64, total: Option<u64>) {
        if self.visits.get(token).is_some() {
            self.emit(Event::Progress {
                token,
                loaded,
                total,
            });
        }
    }

    /// Advance the clock and fire everything that became due.
    pub fn advance_clock(&mut self, now: Tick) -> Result<()> {
        if now > self.now {
            self.now = now;
        }
        for (timer, task) in self.timers.fire_due(self.now) {
            match task {
                TimerTask::PollTick(poll_id) => {
                    if let Some(state) = self.polls.get_mut(poll_id) {
                        if state.timer == Some(timer) {
                            state.timer = None;
                        }
                    }
                    self.poll_tick(poll_id)?;
                }
                TimerTask::HistoryFlush => {
                    self.history_flush_timer = None;
                    self.history.flush_due(self.now)?;
                    self.arm_history_flush();
                }
                TimerTask::ScrollRestore => {
                    if let Some(regions) = self.pending_scroll.take() {
                        self.viewport.restore(&regions);
                    }
                }
            }
        }
        Ok(())
    }

    /// The host observed a popstate: restore the popped entry.
    pub fn on_pop_state(&mut self, raw: &[u8]) -> Result<()> {
        match self.history.restore(raw, self.now) {
            Ok(entry) => {
                self.cancel_primary();
                self.visits.advance_generation();
                self.store.swap(Arc::clone(&entry.page));
                self.emit(Event::Navigate {
                    page: Arc::clone(&entry.page),
                });
                self.pending_scroll = Some(entry.scroll_regions);
                self.timers.arm(
                    self.now.after(self.config.scroll_settle_delay),
                    TimerTask::ScrollRestore,
                );
                Ok(())
            }
            Err(err @ PassageError::HistorySealed { .. }) => {
                warn!(%err, "sealed history entry unreadable; forcing full reload");
                let url = self.store.current().url.clone();
                self.transport.hard_navigate(&url);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// The host observed a page-visibility change.
    pub fn set_visibility(&mut self, visibility: VisibilityState) {
        if self.visibility == visibility {
            return;
        }
        self.visibility = visibility;
        for id in self.polls.ids() {
            match visibility {
                VisibilityState::Hidden => {
                    let timer = {
                        let Some(state) = self.polls.get_mut(id) else {
                            continue;
                        };
                        if state.keep_alive {
                            None
                        } else {
                            state.suspended = true;
                            state.timer.take()
                        }
                    };
                    if let Some(timer) = timer {
                        self.timers.cancel(timer);
                    }
                }
                VisibilityState::Visible => {
                    let rearm = {
                        let Some(state) = self.polls.get_mut(id) else {
                            continue;
                        };
                        state.suspended = false;
                        state.may_tick() && state.timer.is_none()
                    };
                    if rearm {
                        self.arm_poll_timer(id);
                    }
                }
            }
        }
    }

    // -- polling ------------------------------------------------------------

    /// Create a poll instance issuing a partial reload every `interval`.
    pub fn poll(
        &mut self,
        interval: TickSpan,
        options: ReloadOptions,
        control: PollControl,
    ) -> PollId {
        let interval = if interval < self.config.min_poll_interval {
            warn!(%interval, minimum = %self.config.min_poll_interval, "clamping poll interval");
            self.config.min_poll_interval
        } else {
            interval
        };
        let id = self.polls.create(interval, options, control.keep_alive);
        if control.auto_start {
            self.poll_start(id);
        }
        id
    }

    /// Start (or resume) a poll instance.
    pub fn poll_start(&mut self, id: PollId) {
        let rearm = {
            let Some(state) = self.polls.get_mut(id) else {
                return;
            };
            state.active = true;
            state.suspended =
                self.visibility == VisibilityState::Hidden && !state.keep_alive;
            state.may_tick() && state.timer.is_none()
        };
        if rearm {
            self.arm_poll_timer(id);
        }
    }

    /// Stop a poll instance, cancelling its in-flight reload (and nothing
    /// else).
    pub fn poll_stop(&mut self, id: PollId) {
        let (timer, in_flight) = {
            let Some(state) = self.polls.get_mut(id) else {
                return;
            };
            state.active = false;
            (state.timer.take(), state.in_flight)
        };
        if let Some(timer) = timer {
            self.timers.cancel(timer);
        }
        if let Some(token) = in_flight {
            self.cancel(token);
        }
    }

    /// Toggle a poll instance.
    pub fn poll_toggle(&mut self, id: PollId) {
        if self.poll_is_polling(id) {
            self.poll_stop(id);
        } else {
            self.poll_start(id);
        }
    }

    /// Whether a poll instance is active.
    #[must_use]
    pub fn poll_is_polling(&self, id: PollId) -> bool {
        self.polls.get(id).is_some_and(|state| state.active)
    }

    // -- remembered state ---------------------------------------------------

    /// Persist a key/value pair on the current history entry.
    pub fn remember(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        self.history.remember_set(key, value, self.now)?;
        self.arm_history_flush();
        Ok(())
    }

    /// Read back a remembered value from the current history entry.
    #[must_use]
    pub fn restore_remembered(&self, key: &str) -> Option<Value> {
        self.history.remember_get(key).cloned()
    }

    // -- internals ----------------------------------------------------------

    /// Emit an event, converting handler failures into `exception`
    /// events. Returns whether any handler vetoed.
    fn emit(&mut self, event: Event) -> bool {
        let kind = event.kind();
        let outcome = self.bus.emit(&event);
        for detail in outcome.failures {
            warn!(event = kind.name(), %detail, "consumer callback failed");
            let exception = Event::Exception {
                event: kind.name().to_owned(),
                detail,
            };
            for nested in self.bus.emit(&exception).failures {
                warn!(%nested, "exception subscriber failed");
            }
        }
        outcome.vetoed
    }

    fn issue_visit(
        &mut self,
        intent: VisitIntent,
        kind: VisitKind,
        origin: VisitOrigin,
    ) -> Result<VisitToken> {
        let is_primary = matches!(kind, VisitKind::Primary);
        let announces = matches!(kind, VisitKind::Primary | VisitKind::Partial);
        if is_primary {
            if let Some(previous) = self.visits.primary() {
                debug!(%previous, "cancelling superseded primary visit");
                self.cancel(previous);
            }
        }

        let token = self.visits.allocate();
        let generation = self.visits.generation();
        let cx = Cx::new();
        let request = passage_protocol::build_request(&intent, &self.store.current());
        let url = request.url.clone();
        self.visits.insert(ActiveVisit {
            token,
            intent,
            kind,
            origin,
            cx: cx.clone(),
            generation,
            request: request.clone(),
            redirect_hops: 0,
        });

        if announces {
            self.emit(Event::Start { token, url });
        }
        debug!(%token, method = %request.method, url = %request.url, "dispatching visit");
        if let Err(err) = self.transport.dispatch(&cx, token, &request) {
            self.deliver_failure(token, err)?;
        }
        Ok(token)
    }

    /// Apply a cache-served page as a complete primary visit.
    fn apply_cached(&mut self, intent: VisitIntent, page: &Arc<Page>) -> Result<VisitToken> {
        if let Some(previous) = self.visits.primary() {
            self.cancel(previous);
        }
        let token = self.visits.allocate();
        let generation = self.visits.generation();
        let request = passage_protocol::build_request(&intent, &self.store.current());
        let url = request.url.clone();
        self.visits.insert(ActiveVisit {
            token,
            intent,
            kind: VisitKind::Primary,
            origin: VisitOrigin::Api,
            cx: Cx::new(),
            generation,
            request,
            redirect_hops: 0,
        });
        self.emit(Event::Start { token, url });
        self.conclude_with_page(token, (**page).clone(), false)?;
        Ok(token)
    }

    fn follow_redirect(&mut self, token: VisitToken, next: ProtocolRequest) -> Result<()> {
        let followed = {
            let Some(active) = self.visits.get_mut(token) else {
                return Ok(());
            };
            active.redirect_hops += 1;
            if active.redirect_hops > limits::MAX_REDIRECT_HOPS {
                None
            } else {
                active.request = next.clone();
                Some(active.cx.clone())
            }
        };
        match followed {
            None => self.deliver_failure(
                token,
                PassageError::TooManyRedirects {
                    hops: limits::MAX_REDIRECT_HOPS,
                },
            ),
            Some(cx) => {
                debug!(%token, url = %next.url, "following redirect");
                if let Err(err) = self.transport.dispatch(&cx, token, &next) {
                    return self.deliver_failure(token, err);
                }
                Ok(())
            }
        }
    }

    fn conclude_with_page(
        &mut self,
        token: VisitToken,
        incoming: Page,
        validation: bool,
    ) -> Result<()> {
        let Some(visit) = self.visits.remove(token) else {
            return Ok(());
        };
        self.release_slots(&visit);

        match &visit.kind {
            VisitKind::Prefetch { key } => {
                let bounds = visit.intent.cache_for.unwrap_or(self.config.default_cache_for);
                debug!(%key, url = %visit.intent.url, "storing prefetched page");
                self.cache.store(
                    *key,
                    visit.intent.url.clone(),
                    Arc::new(incoming),
                    bounds,
                    self.now,
                );
                self.settle_origin(&visit);
                self.emit(Event::Finish { token });
                return Ok(());
            }
            VisitKind::Revalidate { key } => {
                let bounds = visit.intent.cache_for.unwrap_or(self.config.default_cache_for);
                self.cache.store(
                    *key,
                    visit.intent.url.clone(),
                    Arc::new(incoming.clone()),
                    bounds,
                    self.now,
                );
                if visit.generation != self.visits.generation() {
                    debug!(%token, "revalidated page belongs to a superseded generation");
                    self.settle_origin(&visit);
                    self.emit(Event::Finish { token });
                    return Ok(());
                }
            }
            VisitKind::Partial => {
                if visit.generation != self.visits.generation() {
                    debug!(%token, "partial result belongs to a superseded page");
                    self.emit(Event::Cancel { token });
                    self.settle_origin(&visit);
                    self.emit(Event::Finish { token });
                    return Ok(());
                }
            }
            VisitKind::Primary => {}
        }

        self.apply_page(visit, incoming, validation)
    }

    fn apply_page(&mut self, visit: ActiveVisit, mut incoming: Page, validation: bool) -> Result<()> {
        let token = visit.token;
        if matches!(visit.kind, VisitKind::Partial) {
            let dropped = self.visits.filter_by_watermark(token, &mut incoming.props);
            if dropped > 0 {
                debug!(%token, dropped, "dropped props already applied by newer reloads");
            }
        }

        let current = self.store.current();
        let same_component = current.component == incoming.component;
        let previous = if same_component {
            current.props.clone()
        } else {
            Map::new()
        };
        let merged = passage_merge::reconcile(&previous, &incoming, &visit.intent.reset);
        let next_page = Arc::new(Page {
            props: merged,
            ..incoming
        });
        let has_errors = next_page.has_errors();
        let is_primary = matches!(visit.kind, VisitKind::Primary);

        let previous_scroll = self.viewport.capture();
        self.store.swap(Arc::clone(&next_page));

        let mode = if !is_primary
            || visit.intent.replace
            || visit.intent.preserve_state.resolve(has_errors)
        {
            CommitMode::Replace
        } else {
            CommitMode::Push
        };
        self.history
            .commit(Arc::clone(&next_page), mode, previous_scroll, self.now)?;

        if is_primary && !visit.intent.preserve_scroll.resolve(has_errors) {
            self.viewport.reset();
        }

        if validation {
            let errors = match next_page.props.get("errors") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            self.emit(Event::Error {
                token,
                errors,
                detail: None,
            });
        } else {
            self.emit(Event::Success {
                token,
                page: Arc::clone(&next_page),
            });
        }

        if is_primary {
            info!(component = %next_page.component, url = %next_page.url, "page committed");
            self.visits.advance_generation();
            self.schedule_deferred(&next_page)?;
        }

        if let VisitOrigin::Deferred(group) = &visit.origin {
            let group = group.clone();
            if self.deferred.resolve(&group) {
                self.emit(Event::Deferred { token, group });
            }
        }

        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
        self.arm_history_flush();
        Ok(())
    }

    fn conclude_with_validation(
        &mut self,
        token: VisitToken,
        errors: Map<String, Value>,
    ) -> Result<()> {
        let Some(visit) = self.visits.remove(token) else {
            return Ok(());
        };
        self.release_slots(&visit);
        if matches!(visit.kind, VisitKind::Partial) && visit.generation != self.visits.generation()
        {
            debug!(%token, "validation result belongs to a superseded page");
            self.emit(Event::Cancel { token });
            self.settle_origin(&visit);
            self.emit(Event::Finish { token });
            return Ok(());
        }

        let scoped = match &visit.intent.error_bag {
            Some(bag) => {
                let mut wrapped = Map::new();
                wrapped.insert(bag.clone(), Value::Object(errors.clone()));
                wrapped
            }
            None => errors.clone(),
        };
        let current = self.store.current();
        let mut next = (*current).clone();
        next.props.insert("errors".to_owned(), Value::Object(scoped));
        let next = Arc::new(next);
        self.store.swap(Arc::clone(&next));
        self.history
            .commit(Arc::clone(&next), CommitMode::Replace, Vec::new(), self.now)?;

        self.emit(Event::Error {
            token,
            errors,
            detail: None,
        });
        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
        self.arm_history_flush();
        Ok(())
    }

    fn conclude_invalid(&mut self, token: VisitToken, status: u16, url: &str) -> Result<()> {
        let Some(visit) = self.visits.remove(token) else {
            return Ok(());
        };
        self.release_slots(&visit);
        let vetoed = self.emit(Event::Invalid {
            token,
            status,
            url: url.to_owned(),
        });
        if vetoed {
            debug!(%url, "invalid-response fallback suppressed by subscriber");
        } else {
            self.transport.hard_navigate(url);
        }
        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
        Ok(())
    }

    fn conclude_hard_navigate(&mut self, token: VisitToken, url: &str) -> Result<()> {
        let Some(visit) = self.visits.remove(token) else {
            return Ok(());
        };
        self.release_slots(&visit);
        self.transport.hard_navigate(url);
        self.settle_origin(&visit);
        self.emit(Event::Finish { token });
        Ok(())
    }

    /// Schedule one independent partial reload per deferred group declared
    /// by `page`. Already-populated once-props are not re-requested.
    fn schedule_deferred(&mut self, page: &Page) -> Result<()> {
        let requested = self.deferred.on_commit(page);
        for (group, names) in requested {
            let only: Vec<PropPath> = names
                .iter()
                .filter_map(|name| PropPath::parse(name).ok())
                .filter(|path| {
                    !(page.is_once_prop(path.root()) && page.props.contains_key(path.root()))
                })
                .collect();
            if only.is_empty() {
                self.deferred.resolve(&group);
                continue;
            }
            let mut intent = VisitIntent::get(page.url.clone());
            intent.only = only;
            intent.preserve_state = PreserveOption::Yes;
            intent.preserve_scroll = PreserveOption::Yes;
            intent.replace = true;
            let token =
                self.issue_visit(intent, VisitKind::Partial, VisitOrigin::Deferred(group.clone()))?;
            self.deferred.mark_issued(&group, token);
        }
        Ok(())
    }

    fn poll_tick(&mut self, id: PollId) -> Result<()> {
        let Some((options, may_tick)) = self
            .polls
            .get(id)
            .map(|state| (state.options.clone(), state.may_tick()))
        else {
            return Ok(());
        };
        if !may_tick {
            return Ok(());
        }

        let current = self.store.current();
        let mut intent = VisitIntent::get(current.url.clone());
        intent.only = options.only;
        intent.except = options.except;
        intent.reset = options.reset;
        intent.headers = options.headers;
        intent.preserve_state = PreserveOption::Yes;
        intent.preserve_scroll = PreserveOption::Yes;
        intent.replace = true;

        let token = self.issue_visit(intent, VisitKind::Partial, VisitOrigin::Poll(id))?;
        if self.visits.get(token).is_some() {
            if let Some(state) = self.polls.get_mut(id) {
                state.in_flight = Some(token);
            }
        }
        Ok(())
    }

    /// Per-origin bookkeeping once a visit reaches a terminal state.
    fn settle_origin(&mut self, visit: &ActiveVisit) {
        if let VisitOrigin::Poll(id) = visit.origin {
            let rearm = {
                let Some(state) = self.polls.get_mut(id) else {
                    return;
                };
                if state.in_flight == Some(visit.token) {
                    state.in_flight = None;
                }
                state.may_tick() && state.timer.is_none()
            };
            if rearm {
                self.arm_poll_timer(id);
            }
        }
    }

    /// Release cache revalidation slots held by a finished visit.
    fn release_slots(&mut self, visit: &ActiveVisit) {
        match &visit.kind {
            VisitKind::Prefetch { key } | VisitKind::Revalidate { key } => {
                self.cache.finish_revalidate(*key, visit.token);
            }
            VisitKind::Primary | VisitKind::Partial => {}
        }
    }

    fn arm_poll_timer(&mut self, id: PollId) {
        let Some(interval) = self.polls.get(id).map(|state| state.interval) else {
            return;
        };
        let timer = self
            .timers
            .arm(self.now.after(interval), TimerTask::PollTick(id));
        if let Some(state) = self.polls.get_mut(id) {
            state.timer = Some(timer);
        }
    }

    fn arm_history_flush(&mut self) {
        if self.history_flush_timer.is_none() {
            if let Some(at) = self.history.pending_flush_at() {
                self.history_flush_timer = Some(self.timers.arm(at, TimerTask::HistoryFlush));
            }
        }
    }
}
