//! Core vocabulary for the Passage navigation engine.
//!
//! Defines the identifier and time newtypes shared by every crate in the
//! workspace, plus the data-model modules:
//!
//! - [`VisitToken`]: monotonically increasing visit identifier.
//! - [`PageGeneration`]: counter of committed primary navigations.
//! - [`Tick`] / [`TickSpan`]: millisecond clock instants and durations.
//! - [`page`]: the protocol [`page::Page`] shape and scroll regions.
//! - [`intent`]: normalized navigation intents.
//! - [`path`]: dot-path prop names (`auth.user.permissions`).
//! - [`cx`]: cooperative cancellation context.
//! - [`limits`]: engine-wide tunables and quotas.

pub mod cx;
pub mod intent;
pub mod limits;
pub mod page;
pub mod path;

use std::fmt;
use std::num::NonZeroU64;

/// Opaque identifier for one accepted visit.
///
/// Tokens are allocated by a monotonically increasing ledger; comparing two
/// tokens orders the visits by acceptance time. A response is applied only if
/// its token is the newest among all visits targeting the same slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct VisitToken(NonZeroU64);

impl VisitToken {
    /// Construct a `VisitToken` from a raw value. Returns `None` for 0.
    #[inline]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for VisitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "visit#{}", self.0)
    }
}

/// Counter of committed primary navigations.
///
/// Every partial visit is stamped with the generation it was issued under.
/// A partial result whose stamp no longer matches the current generation
/// belongs to a superseded page and is discarded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct PageGeneration(u64);

impl PageGeneration {
    /// The generation of the initially embedded page.
    pub const ZERO: Self = Self(0);

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The generation following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for PageGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// A clock instant in milliseconds.
///
/// The engine owns no clock; the embedding host advances time explicitly,
/// which keeps every timer-driven behavior deterministic under test.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Tick(u64);

impl Tick {
    /// The zero instant.
    pub const ZERO: Self = Self(0);

    /// Construct from raw milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Raw milliseconds since the host's epoch.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// This instant advanced by `span`, saturating at the numeric limit.
    #[inline]
    #[must_use]
    pub const fn after(self, span: TickSpan) -> Self {
        Self(self.0.saturating_add(span.as_millis()))
    }

    /// Elapsed span since `earlier`, or zero if `earlier` is in the future.
    #[inline]
    #[must_use]
    pub const fn since(self, earlier: Self) -> TickSpan {
        TickSpan::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ms", self.0)
    }
}

/// A duration in milliseconds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct TickSpan(u64);

impl TickSpan {
    /// The zero-length span.
    pub const ZERO: Self = Self(0);

    /// Construct from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Construct from whole seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// The span in milliseconds.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Whether this span is zero.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TickSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
