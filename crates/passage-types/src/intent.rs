//! Normalized navigation intents.
//!
//! A [`VisitIntent`] is the engine-facing description of "what navigation is
//! wanted", constructed by link/form/programmatic call sites. The engine
//! consumes this shape only; it never inspects DOM events or forms.

use std::fmt;

use serde_json::Value;

use crate::path::PropPath;
use crate::{TickSpan, limits};

/// HTTP method for a visit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Canonical upper-case wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether this method mutates server state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state preservation option for component state and scroll position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreserveOption {
    /// Do not preserve.
    #[default]
    No,
    /// Always preserve.
    Yes,
    /// Preserve only when the applied page carries validation errors.
    OnErrors,
}

impl PreserveOption {
    /// Resolve against the applied page's error state.
    #[must_use]
    pub const fn resolve(self, has_errors: bool) -> bool {
        match self {
            Self::No => false,
            Self::Yes => true,
            Self::OnErrors => has_errors,
        }
    }
}

/// How a prefetch was triggered; part of the cache-consult decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchMode {
    Hover,
    Mount,
    Click,
}

/// Stale/expire bounds for a prefetch cache entry.
///
/// Constructed from a single duration (stale = expire) or a
/// `[stale, expire]` pair; `stale <= expire` is enforced at construction.
/// A pair of zeros means "serve once, then discard".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheFor {
    stale: TickSpan,
    expire: TickSpan,
}

impl CacheFor {
    /// One duration used as both the stale and the expire bound.
    #[must_use]
    pub const fn single(span: TickSpan) -> Self {
        Self {
            stale: span,
            expire: span,
        }
    }

    /// Distinct stale and expire bounds. Returns `None` when
    /// `stale > expire`.
    #[must_use]
    pub const fn pair(stale: TickSpan, expire: TickSpan) -> Option<Self> {
        if stale.as_millis() > expire.as_millis() {
            None
        } else {
            Some(Self { stale, expire })
        }
    }

    /// The stale bound.
    #[must_use]
    pub const fn stale(self) -> TickSpan {
        self.stale
    }

    /// The expire bound.
    #[must_use]
    pub const fn expire(self) -> TickSpan {
        self.expire
    }

    /// Whether the entry may be served exactly once and then discarded.
    #[must_use]
    pub const fn is_serve_once(self) -> bool {
        self.stale.is_zero() && self.expire.is_zero()
    }
}

impl Default for CacheFor {
    fn default() -> Self {
        Self {
            stale: TickSpan::from_millis(limits::DEFAULT_PREFETCH_STALE_MS),
            expire: TickSpan::from_millis(limits::DEFAULT_PREFETCH_EXPIRE_MS),
        }
    }
}

/// The normalized description of one wanted navigation.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitIntent {
    /// Target URL (path + query, or absolute).
    pub url: String,
    /// HTTP method.
    #[serde(default)]
    pub method: Method,
    /// Request data: folded into the query string for GET, sent as a JSON
    /// body otherwise.
    #[serde(default)]
    pub data: Option<Value>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Partial reload: request only these props.
    #[serde(default)]
    pub only: Vec<PropPath>,
    /// Partial reload: request everything except these props.
    #[serde(default)]
    pub except: Vec<PropPath>,
    /// Props to clear to a fresh state before the response applies.
    #[serde(default)]
    pub reset: Vec<PropPath>,
    /// Preserve component state across the update.
    #[serde(default)]
    pub preserve_state: PreserveOption,
    /// Preserve scroll position across the update.
    #[serde(default)]
    pub preserve_scroll: PreserveOption,
    /// Replace the current history entry instead of pushing a new one.
    #[serde(default)]
    pub replace: bool,
    /// Scope validation errors under this named bag.
    #[serde(default)]
    pub error_bag: Option<String>,
    /// When set, the visit is prefetch-aware: eligible to consume and
    /// populate the prefetch cache.
    #[serde(default)]
    pub prefetch: Option<PrefetchMode>,
    /// Cache bounds for prefetch-aware visits.
    #[serde(default)]
    pub cache_for: Option<CacheFor>,
}

impl VisitIntent {
    /// A GET visit to `url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// A visit to `url` with an explicit method.
    #[must_use]
    pub fn with_method(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            ..Self::default()
        }
    }

    /// Whether this intent is a partial reload (a prop-subset request that
    /// re-renders the current component).
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.only.is_empty() || !self.except.is_empty()
    }

    /// Whether this intent may consult or populate the prefetch cache.
    #[must_use]
    pub fn is_prefetchable(&self) -> bool {
        self.prefetch.is_some()
    }
}
