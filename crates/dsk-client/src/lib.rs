//! dsk-client
//!
//! Caller-side access to the engine: per-kind [`EntityClient`],
//! provider-level [`ProviderClient`], and [`IntentWatcherClient`] for
//! waiting on asynchronous convergence.
//!
//! Every failure is reported as a [`dsk_schemas::DskError`]; no
//! `reqwest` error crosses this crate's API.

mod entity;
mod http;
mod provider;
mod watcher;

pub use entity::{ClientOptions, EntityClient, ImmutableEntity, DEFAULT_BATCH_SIZE};
pub use http::EngineHttp;
pub use provider::ProviderClient;
pub use watcher::{IntentWatcherClient, WaitOutcome, WaitPolicy};

pub use reqwest::Method;
