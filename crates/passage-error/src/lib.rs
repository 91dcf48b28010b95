//! Primary error type for Passage operations.
//!
//! Structured variants for the failure modes a visit can hit, plus a
//! [`FailureKind`] classification that maps every error onto the engine's
//! outcome taxonomy (what event fires, whether state was touched).

use passage_types::cx::Cancelled;
use thiserror::Error;

/// Primary error type for Passage operations.
#[derive(Error, Debug)]
pub enum PassageError {
    /// The visit was superseded or aborted; not a failure.
    #[error("visit cancelled")]
    Cancelled,

    /// Low-level transport failure (connection refused, DNS, TLS).
    #[error("transport failure: {detail}")]
    Transport { detail: String },

    /// The transport gave up waiting.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The response carried no protocol marker and cannot be applied.
    #[error("non-protocol response (status {status}) from '{url}'")]
    InvalidResponse { status: u16, url: String },

    /// The server's asset version differs from ours; client state cannot
    /// be trusted and a full document reload is required.
    #[error("asset version conflict at '{url}'")]
    VersionConflict { url: String },

    /// A marked protocol response violated the protocol shape.
    #[error("protocol violation: {detail}")]
    ProtocolViolation { detail: String },

    /// A response body failed to decode as JSON.
    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),

    /// The redirect chain exceeded the hop limit.
    #[error("redirect chain exceeded {hops} hops")]
    TooManyRedirects { hops: usize },

    /// A sealed history entry failed to open (wrong or rotated key).
    #[error("sealed history entry cannot be opened: {detail}")]
    HistorySealed { detail: String },

    /// A persisted history entry failed structural validation.
    #[error("history entry is malformed: {detail}")]
    HistoryCorrupt { detail: String },

    /// A single history entry exceeds the whole persistence quota.
    #[error("history entry of {bytes} bytes exceeds quota of {quota} bytes")]
    QuotaExceeded { bytes: usize, quota: usize },

    /// A consumer callback failed while handling an event.
    #[error("handler for '{event}' failed: {detail}")]
    Consumer { event: String, detail: String },

    /// Internal invariant violation (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// The engine's outcome taxonomy.
///
/// Every failure resolves locally to one of these kinds before any event
/// reaches the bus; nothing escapes the visit boundary unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Superseded by a newer visit. No failure event.
    Cancelled,
    /// 422-shaped page carrying field errors. Delivered as a success-shaped
    /// update; never surfaces as a [`PassageError`].
    Validation,
    /// Asset version conflict; resolved by a forced full reload.
    ProtocolMismatch,
    /// Unrecognized response; resolved by full navigation fallback.
    Invalid,
    /// Network-level failure; the page store is untouched.
    Transport,
    /// A consumer callback failed; visit bookkeeping is unaffected.
    Consumer,
    /// Engine bug.
    Internal,
}

impl PassageError {
    /// Map this error onto the outcome taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Cancelled => FailureKind::Cancelled,
            Self::VersionConflict { .. } => FailureKind::ProtocolMismatch,
            Self::InvalidResponse { .. } => FailureKind::Invalid,
            Self::Transport { .. } | Self::Timeout { .. } | Self::TooManyRedirects { .. } => {
                FailureKind::Transport
            }
            Self::Consumer { .. } => FailureKind::Consumer,
            Self::ProtocolViolation { .. }
            | Self::Body(_)
            | Self::HistorySealed { .. }
            | Self::HistoryCorrupt { .. }
            | Self::QuotaExceeded { .. }
            | Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Whether this is the cancellation outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a retry of the same visit may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Create a transport error.
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    /// Create a protocol-violation error.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            detail: detail.into(),
        }
    }

    /// Create a consumer-callback error.
    pub fn consumer(event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Consumer {
            event: event.into(),
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<Cancelled> for PassageError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result type alias using [`PassageError`].
pub type Result<T> = std::result::Result<T, PassageError>;
