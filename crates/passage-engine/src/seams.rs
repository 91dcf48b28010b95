//! Host seams: the engine's only edges to the outside world.
//!
//! The engine owns no socket, no timer thread, and no document. Production
//! adapters implement these traits over fetch/XHR, the history API, and the
//! DOM; tests implement them with scripted fakes.

use passage_protocol::ProtocolRequest;
use passage_types::VisitToken;
use passage_types::cx::Cx;
use passage_types::page::ScrollRegion;

pub use passage_history::HistorySink;

/// The network seam.
///
/// `dispatch` starts one exchange and returns immediately; the host later
/// feeds the outcome back through `Engine::deliver_response` or
/// `Engine::deliver_failure` under the same token. `cx` is the visit's
/// cancellation context: once cancelled, the transport should abandon the
/// exchange (a late delivery is discarded by the engine regardless).
pub trait Transport {
    /// Start one HTTP exchange for `token`.
    fn dispatch(
        &mut self,
        cx: &Cx,
        token: VisitToken,
        request: &ProtocolRequest,
    ) -> passage_error::Result<()>;

    /// Abort the in-flight exchange for `token`, if any.
    fn abort(&mut self, token: VisitToken);

    /// Leave the SPA: perform a full document navigation to `url`.
    ///
    /// Used when client state cannot be trusted (version conflict,
    /// non-protocol response, server-driven external redirect).
    fn hard_navigate(&mut self, url: &str);
}

/// The document-viewport seam: scroll capture and restore.
pub trait ViewportProbe {
    /// Current positions of every scroll region on the page.
    fn capture(&self) -> Vec<ScrollRegion>;

    /// Re-apply previously captured positions.
    fn restore(&mut self, regions: &[ScrollRegion]);

    /// Scroll every region back to the origin.
    fn reset(&mut self);
}
