//! dsk-testkit
//!
//! [`FakeEngine`] is a small in-memory stand-in for the desired-state engine,
//! served by axum on an ephemeral localhost port. It exists so integration
//! tests can drive real clients and real provider callback servers end to
//! end without an engine deployment.
//!
//! Covered: entity collections with `spec_version` checks, filter with
//! `limit`/`offset`, constructor and destructor calls, procedure forwarding,
//! intent watchers with scriptable statuses, `update_status`,
//! `check_permission`, and provider registration capture.
//!
//! Diffs are computed by [`naive_diff`] over top-level fields only and are
//! delivered when a test calls [`FakeEngine::reconcile`]. Nothing runs in
//! the background.

mod engine;
mod routes;
mod store;

pub use engine::{FakeEngine, ReconcileReport};
pub use store::{naive_diff, Registration};
