use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::watcher::IntentWatcher;

/// Desired state of an entity. Owned by the caller.
pub type Spec = Value;

/// Observed state of an entity. Written only by reconciliation handlers.
pub type Status = Value;

// ---------------------------------------------------------------------------
// EntityReference
// ---------------------------------------------------------------------------

/// Immutable identity of one entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub uuid: Uuid,
    pub kind: String,
    /// Echoed by the engine in watcher payloads; never required on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_version: Option<String>,
}

impl EntityReference {
    pub fn new(uuid: Uuid, kind: impl Into<String>) -> Self {
        Self {
            uuid,
            kind: kind.into(),
            provider_prefix: None,
            provider_version: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Engine-owned bookkeeping for one entity.
///
/// `spec_version` is the optimistic-concurrency token: every update must echo
/// the value it read, and the engine rejects stale versions with a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub uuid: Uuid,
    pub kind: String,
    #[serde(default)]
    pub spec_version: u64,
    /// Provider-defined, opaque to this crate.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extension: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(uuid: Uuid, kind: impl Into<String>) -> Self {
        Self {
            uuid,
            kind: kind.into(),
            spec_version: 0,
            extension: Value::Null,
            created_at: None,
            deleted_at: None,
        }
    }

    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.uuid, self.kind.clone())
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The unit of convergence: metadata plus desired and observed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub metadata: Metadata,
    pub spec: Spec,
    #[serde(default)]
    pub status: Status,
}

impl Entity {
    pub fn reference(&self) -> EntityReference {
        self.metadata.reference()
    }
}

/// Engine answer to a create or update call.
///
/// `intent_watcher` is present when convergence is asynchronous; pass it to
/// the intent watcher client to wait for the engine to settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCreateOrUpdateResult {
    pub metadata: Metadata,
    pub spec: Spec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_watcher: Option<IntentWatcher>,
}

impl EntityCreateOrUpdateResult {
    pub fn watcher(&self) -> Option<&IntentWatcher> {
        self.intent_watcher.as_ref()
    }

    pub fn reference(&self) -> EntityReference {
        self.metadata.reference()
    }

    /// View as a full entity. A missing status reads as `null`.
    pub fn into_entity(self) -> Entity {
        Entity {
            metadata: self.metadata,
            spec: self.spec,
            status: self.status.unwrap_or(Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// FilterResult
// ---------------------------------------------------------------------------

/// One page (or the whole set) of a filtered listing, in server order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_count: Option<u64>,
    #[serde(default)]
    pub results: Vec<Entity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_without_extension_omits_field() {
        let md = Metadata::new(Uuid::nil(), "bucket");
        let v = serde_json::to_value(&md).unwrap();
        assert!(v.get("extension").is_none());
        assert_eq!(v["spec_version"], 0);
    }

    #[test]
    fn entity_status_defaults_to_null_when_absent() {
        let e: Entity = serde_json::from_value(json!({
            "metadata": {"uuid": Uuid::nil(), "kind": "bucket", "spec_version": 3},
            "spec": {"name": "b1"}
        }))
        .unwrap();
        assert!(e.status.is_null());
        assert_eq!(e.metadata.spec_version, 3);
        assert_eq!(e.reference().kind, "bucket");
    }

    #[test]
    fn create_result_without_watcher_has_no_watcher() {
        let r: EntityCreateOrUpdateResult = serde_json::from_value(json!({
            "metadata": {"uuid": Uuid::nil(), "kind": "object", "spec_version": 1},
            "spec": {"content": ""},
            "intent_watcher": null
        }))
        .unwrap();
        assert!(r.watcher().is_none());
        assert!(r.into_entity().status.is_null());
    }
}
