//! dsk-schemas
//!
//! Shared vocabulary for entity providers and their clients: entity
//! references, metadata, spec/status documents, diffs, intent watchers,
//! procedure signatures and the error taxonomy every component reports in.
//!
//! Pure data. No IO.

mod entity;
pub mod error;
mod path;
mod signature;
mod watcher;

pub use entity::{
    Entity, EntityCreateOrUpdateResult, EntityReference, FilterResult, Metadata, Spec, Status,
};
pub use error::{DskError, DskResult, ErrorBody, ErrorDetail};
pub use path::{Diff, DiffField, FieldPath, PathSegment};
pub use signature::{
    Action, IntentfulBehaviour, IntentfulSignature, Kind, ProceduralExecutionStrategy,
    ProceduralSignature, S2sKey, UserInfo, PROVIDER_ENTITY_MARKER,
};
pub use watcher::{IntentWatcher, IntentfulStatus};
