//! Protocol header names (lower-case, as the transport normalizes them).

/// Marks a request/response as a protocol exchange.
pub const MARKER: &str = "x-passage";

/// The client's last-known asset version (request) or the server's current
/// version (409 response).
pub const VERSION: &str = "x-passage-version";

/// Partial reload: the component the props belong to.
pub const PARTIAL_COMPONENT: &str = "x-passage-partial-component";

/// Partial reload: comma-separated dot paths to fetch.
pub const PARTIAL_ONLY: &str = "x-passage-partial-only";

/// Partial reload: comma-separated dot paths to omit.
pub const PARTIAL_EXCEPT: &str = "x-passage-partial-except";

/// Comma-separated dot paths to clear before the response applies.
pub const RESET: &str = "x-passage-reset";

/// Named scope for validation errors.
pub const ERROR_BAG: &str = "x-passage-error-bag";

/// Server-driven external redirect target; the client hard-navigates.
pub const LOCATION: &str = "x-passage-location";
