//! Typed spec and status documents for the storage kinds.
//!
//! The engine stores these as plain JSON; handlers convert at the edge with
//! [`from_doc`] / [`to_doc`] and work on the typed form in between.

use chrono::{DateTime, Utc};
use dsk_schemas::{DskError, DskResult, EntityReference};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

pub const BUCKET_KIND: &str = "bucket";
pub const OBJECT_KIND: &str = "object";

/// Metadata extension stamped on every entity this provider creates.
pub const OWNER: &str = "storage-provider";

// ---------------------------------------------------------------------------
// bucket
// ---------------------------------------------------------------------------

/// One object listed in a bucket, under the name it has there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectLink {
    pub name: String,
    pub reference: EntityReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<ObjectLink>,
}

impl BucketSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: Vec::new(),
        }
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.iter().any(|o| o.name == name)
    }
}

/// Observed bucket. Same shape as the spec.
pub type BucketStatus = BucketSpec;

// ---------------------------------------------------------------------------
// object
// ---------------------------------------------------------------------------

/// Back-reference from an object to one bucket that lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketLink {
    pub bucket_name: String,
    pub object_name: String,
    pub bucket_reference: EntityReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub references: Vec<BucketLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectStatus {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub references: Vec<BucketLink>,
}

/// Input of `link_object` and `unlink_object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub object_name: String,
    pub object_uuid: uuid::Uuid,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

pub fn from_doc<T: DeserializeOwned>(what: &str, doc: &Value) -> DskResult<T> {
    serde_json::from_value(doc.clone())
        .map_err(|e| DskError::invocation(format!("{what} is malformed: {e}"), 400))
}

/// Status documents may be null before the constructor ran.
pub fn status_or_default<T: DeserializeOwned + Default>(doc: &Value) -> T {
    serde_json::from_value(doc.clone()).unwrap_or_default()
}

pub fn to_doc<T: Serialize>(v: &T) -> DskResult<Value> {
    serde_json::to_value(v).map_err(|e| DskError::invocation(e.to_string(), 500))
}

pub fn owner_extension() -> Value {
    json!({ "owner": OWNER })
}

// ---------------------------------------------------------------------------
// Kind descriptions
// ---------------------------------------------------------------------------

pub fn bucket_description() -> Value {
    json!({
        BUCKET_KIND: {
            "type": "object",
            "title": "Bucket",
            "x-papiea-entity": "differ",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "objects": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "reference": {"type": "object"}
                        }
                    }
                }
            }
        }
    })
}

pub fn object_description() -> Value {
    json!({
        OBJECT_KIND: {
            "type": "object",
            "title": "Object",
            "x-papiea-entity": "differ",
            "properties": {
                "content": {"type": "string"},
                "size": {"type": "integer", "x-papiea": "status-only"},
                "last_modified": {"type": "string", "x-papiea": "status-only"},
                "references": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "bucket_name": {"type": "string"},
                            "object_name": {"type": "string"},
                            "bucket_reference": {"type": "object"}
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn bucket_spec_tolerates_missing_objects() {
        let spec: BucketSpec = from_doc("bucket spec", &json!({"name": "b1"})).unwrap();
        assert_eq!(spec, BucketSpec::new("b1"));
    }

    #[test]
    fn malformed_spec_is_a_400_invocation_error() {
        let err = from_doc::<BucketSpec>("bucket spec", &json!({"objects": []})).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("bucket spec is malformed"));
    }

    #[test]
    fn null_status_reads_as_default() {
        let st: ObjectStatus = status_or_default(&Value::Null);
        assert_eq!(st.size, 0);
        assert!(st.references.is_empty());
    }

    #[test]
    fn object_link_wire_shape() {
        let link = ObjectLink {
            name: "o1".into(),
            reference: EntityReference::new(Uuid::nil(), OBJECT_KIND),
        };
        assert_eq!(
            to_doc(&link).unwrap(),
            json!({"name": "o1", "reference": {"uuid": Uuid::nil(), "kind": "object"}})
        );
    }
}
