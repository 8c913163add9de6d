//! dsk-daemon library target.
//!
//! A bucket/object storage provider built on `dsk-provider`. Buckets list
//! objects by name; objects keep back-references to every bucket that lists
//! them and are deleted when the last one lets go.
//!
//! The binary `main.rs` depends on this library target; tests register the
//! same provider against the fake engine.

pub mod bucket;
pub mod model;
pub mod object;
mod provider;

pub use provider::{storage_provider, DEFAULT_PREFIX, DEFAULT_VERSION};
