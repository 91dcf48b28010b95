//! Scripted seams and the test driver.
//!
//! Every seam records what the engine asked of it behind a shared handle,
//! so a test keeps a clone and inspects calls after moving the seam into
//! the engine. Responses are delivered manually, in whatever order the
//! scenario needs; out-of-order arrival is the point.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use passage::{
    Cx, Engine, EngineConfig, Event, EventKind, Flow, HistorySink, Page, ProtocolRequest,
    RawResponse, Result, ScrollRegion, Tick, Transport, ViewportProbe, VisitToken, headers,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TransportLog {
    pending: VecDeque<(VisitToken, ProtocolRequest)>,
    dispatched: usize,
    aborted: Vec<VisitToken>,
    hard_navigations: Vec<String>,
}

/// Transport fake: records dispatches; the test answers them explicitly.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total dispatch calls observed.
    #[must_use]
    pub fn dispatched_count(&self) -> usize {
        self.log.lock().dispatched
    }

    /// Number of requests not yet answered or drained.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.log.lock().pending.len()
    }

    /// Remove and return the oldest unanswered request.
    pub fn pop_pending(&self) -> Option<(VisitToken, ProtocolRequest)> {
        self.log.lock().pending.pop_front()
    }

    /// Remove and return every unanswered request.
    pub fn drain_pending(&self) -> Vec<(VisitToken, ProtocolRequest)> {
        self.log.lock().pending.drain(..).collect()
    }

    /// Remove every unanswered request for `token`.
    pub fn take_pending_for(&self, token: VisitToken) -> Vec<ProtocolRequest> {
        let mut log = self.log.lock();
        let mut taken = Vec::new();
        log.pending.retain(|(pending_token, request)| {
            if *pending_token == token {
                taken.push(request.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Tokens the engine asked to abort.
    #[must_use]
    pub fn aborted(&self) -> Vec<VisitToken> {
        self.log.lock().aborted.clone()
    }

    /// Full-document navigations the engine requested.
    #[must_use]
    pub fn hard_navigations(&self) -> Vec<String> {
        self.log.lock().hard_navigations.clone()
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&mut self, _cx: &Cx, token: VisitToken, request: &ProtocolRequest) -> Result<()> {
        let mut log = self.log.lock();
        log.dispatched += 1;
        log.pending.push_back((token, request.clone()));
        Ok(())
    }

    fn abort(&mut self, token: VisitToken) {
        self.log.lock().aborted.push(token);
    }

    fn hard_navigate(&mut self, url: &str) {
        self.log.lock().hard_navigations.push(url.to_owned());
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SinkLog {
    pushes: Vec<(String, Vec<u8>)>,
    replaces: Vec<(String, Vec<u8>)>,
}

/// History-sink fake mirroring what a browser would persist.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push_count(&self) -> usize {
        self.log.lock().pushes.len()
    }

    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.log.lock().replaces.len()
    }

    /// Serialized state of the most recent push.
    #[must_use]
    pub fn last_pushed(&self) -> Option<Vec<u8>> {
        self.log.lock().pushes.last().map(|(_, state)| state.clone())
    }

    /// Serialized state of the most recent replace.
    #[must_use]
    pub fn last_replaced(&self) -> Option<Vec<u8>> {
        self.log
            .lock()
            .replaces
            .last()
            .map(|(_, state)| state.clone())
    }

    /// Every push write, oldest first.
    #[must_use]
    pub fn pushes(&self) -> Vec<(String, Vec<u8>)> {
        self.log.lock().pushes.clone()
    }

    /// Every replace write, oldest first.
    #[must_use]
    pub fn replaces(&self) -> Vec<(String, Vec<u8>)> {
        self.log.lock().replaces.clone()
    }

    /// URL of the most recent push.
    #[must_use]
    pub fn last_pushed_url(&self) -> Option<String> {
        self.log.lock().pushes.last().map(|(url, _)| url.clone())
    }
}

impl HistorySink for RecordingSink {
    fn push(&mut self, url: &str, state: &[u8]) {
        self.log.lock().pushes.push((url.to_owned(), state.to_vec()));
    }

    fn replace(&mut self, url: &str, state: &[u8]) {
        self.log
            .lock()
            .replaces
            .push((url.to_owned(), state.to_vec()));
    }
}

// ---------------------------------------------------------------------------
// FakeViewport
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ViewportLog {
    current: Vec<ScrollRegion>,
    restored: Vec<Vec<ScrollRegion>>,
    resets: usize,
}

impl Default for ViewportLog {
    fn default() -> Self {
        Self {
            current: vec![ScrollRegion::ORIGIN],
            restored: Vec::new(),
            resets: 0,
        }
    }
}

/// Viewport fake with a settable scroll position.
#[derive(Debug, Clone, Default)]
pub struct FakeViewport {
    log: Arc<Mutex<ViewportLog>>,
}

impl FakeViewport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the user scrolled.
    pub fn scroll_to(&self, x: f64, y: f64) {
        self.log.lock().current = vec![ScrollRegion { x, y }];
    }

    /// Regions passed to `restore`, oldest first.
    #[must_use]
    pub fn restored(&self) -> Vec<Vec<ScrollRegion>> {
        self.log.lock().restored.clone()
    }

    /// How many times the engine reset scroll to the origin.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.log.lock().resets
    }
}

impl ViewportProbe for FakeViewport {
    fn capture(&self) -> Vec<ScrollRegion> {
        self.log.lock().current.clone()
    }

    fn restore(&mut self, regions: &[ScrollRegion]) {
        let mut log = self.log.lock();
        log.restored.push(regions.to_vec());
        log.current = regions.to_vec();
    }

    fn reset(&mut self) {
        let mut log = self.log.lock();
        log.resets += 1;
        log.current = vec![ScrollRegion::ORIGIN];
    }
}

// ---------------------------------------------------------------------------
// Event recording
// ---------------------------------------------------------------------------

/// Every lifecycle event kind, for blanket subscriptions.
pub const ALL_EVENT_KINDS: [EventKind; 11] = [
    EventKind::Before,
    EventKind::Start,
    EventKind::Progress,
    EventKind::Success,
    EventKind::Error,
    EventKind::Invalid,
    EventKind::Exception,
    EventKind::Finish,
    EventKind::Navigate,
    EventKind::Cancel,
    EventKind::Deferred,
];

/// Collects every emitted event for later assertions.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    seen: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    /// Subscribe to every event kind on `engine`.
    pub fn attach(engine: &mut Engine<ScriptedTransport, RecordingSink, FakeViewport>) -> Self {
        let recorder = Self::default();
        for kind in ALL_EVENT_KINDS {
            let seen = Arc::clone(&recorder.seen);
            engine.on(kind, move |event| {
                seen.lock().push(event.clone());
                Ok(Flow::Continue)
            });
        }
        recorder
    }

    /// Event names in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.seen.lock().iter().map(|e| e.kind().name()).collect()
    }

    /// How many events of `kind` fired.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.seen.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Clone of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.seen.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// An engine wired to scripted seams behind a manual clock.
pub struct Driver {
    pub engine: Engine<ScriptedTransport, RecordingSink, FakeViewport>,
    pub transport: ScriptedTransport,
    pub sink: RecordingSink,
    pub viewport: FakeViewport,
}

impl Driver {
    /// A driver with default configuration and a deterministic sealer.
    #[must_use]
    pub fn new(initial: Page) -> Self {
        let mut config = EngineConfig::default();
        config.seal_seed = Some(0x5eed);
        Self::with_config(initial, config)
    }

    /// A driver with explicit configuration.
    #[must_use]
    pub fn with_config(initial: Page, config: EngineConfig) -> Self {
        crate::logging::init();
        tracing::debug!(component = %initial.component, url = %initial.url, "driver starting");
        let transport = ScriptedTransport::new();
        let sink = RecordingSink::new();
        let viewport = FakeViewport::new();
        let engine = Engine::new(
            initial,
            transport.clone(),
            sink.clone(),
            viewport.clone(),
            config,
        );
        Self {
            engine,
            transport,
            sink,
            viewport,
        }
    }

    /// Advance the engine clock to `ms` milliseconds.
    pub fn advance_to(&mut self, ms: u64) -> Result<()> {
        self.engine.advance_clock(Tick::from_millis(ms))
    }

    /// Answer `token` with a 200 protocol page.
    pub fn respond(&mut self, token: VisitToken, page: &Page) -> Result<()> {
        self.respond_status(token, page, 200)
    }

    /// Answer `token` with a protocol page at an explicit status.
    ///
    /// The answered exchange leaves the transport's pending queue, as it
    /// would on a real network.
    pub fn respond_status(&mut self, token: VisitToken, page: &Page, status: u16) -> Result<()> {
        let _ = self.transport.take_pending_for(token);
        let response = page_response(page, status);
        self.engine.deliver_response(token, &response)
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

/// A page with the given component, URL, and props object.
#[must_use]
pub fn page(component: &str, url: &str, props: Value) -> Page {
    let mut page = Page::new(component, url);
    if let Value::Object(map) = props {
        page.props = map;
    }
    page
}

/// A marked protocol response carrying `page`.
#[must_use]
pub fn page_response(page: &Page, status: u16) -> RawResponse {
    RawResponse {
        status,
        headers: vec![(headers::MARKER.to_owned(), "true".to_owned())],
        url: page.url.clone(),
        body: serde_json::to_string(page).unwrap_or_default(),
    }
}

/// A bare 422 validation map response.
#[must_use]
pub fn validation_response(url: &str, errors: Value) -> RawResponse {
    RawResponse {
        status: 422,
        headers: Vec::new(),
        url: url.to_owned(),
        body: errors.to_string(),
    }
}

/// A redirect response.
#[must_use]
pub fn redirect_response(status: u16, from_url: &str, location: &str) -> RawResponse {
    RawResponse {
        status,
        headers: vec![("location".to_owned(), location.to_owned())],
        url: from_url.to_owned(),
        body: String::new(),
    }
}

/// A 409 version-conflict response.
#[must_use]
pub fn conflict_response(url: &str, server_version: &str) -> RawResponse {
    RawResponse {
        status: 409,
        headers: vec![(headers::VERSION.to_owned(), server_version.to_owned())],
        url: url.to_owned(),
        body: String::new(),
    }
}

/// A 409 response steering the client to an external location.
#[must_use]
pub fn external_location_response(url: &str, location: &str) -> RawResponse {
    RawResponse {
        status: 409,
        headers: vec![(headers::LOCATION.to_owned(), location.to_owned())],
        url: url.to_owned(),
        body: String::new(),
    }
}

/// An unmarked (non-protocol) HTML response.
#[must_use]
pub fn html_response(url: &str) -> RawResponse {
    RawResponse {
        status: 200,
        headers: vec![("content-type".to_owned(), "text/html".to_owned())],
        url: url.to_owned(),
        body: "<!doctype html><title>plain</title>".to_owned(),
    }
}
