//! End-to-end test harness for the Passage engine.
//!
//! Provides scripted implementations of every host seam (transport,
//! history sink, viewport), a [`harness::Driver`] bundling them with an
//! engine behind a manually advanced clock, and structured logging setup.
//! Scenario tests live under `tests/`.

pub mod harness;
pub mod logging;
