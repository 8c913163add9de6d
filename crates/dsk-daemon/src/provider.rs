//! Wiring of the storage kinds into one provider.

use dsk_config::ProviderSettings;
use dsk_provider::ProviderSdk;
use dsk_schemas::{DskResult, ProceduralExecutionStrategy};
use serde_json::json;

use crate::bucket::{
    bucket_constructor, change_bucket_name, create_object, ensure_bucket_exists, link_object,
    on_bucket_name, on_bucket_objects, unlink_object,
};
use crate::model::{bucket_description, object_description};
use crate::object::{object_constructor, on_object_content, on_object_references};

pub const DEFAULT_PREFIX: &str = "storage";
pub const DEFAULT_VERSION: &str = "0.1";

const HALT: ProceduralExecutionStrategy = ProceduralExecutionStrategy::HaltIntentful;

/// Declare the bucket and object kinds. Prefix and version come from
/// `settings`, falling back to [`DEFAULT_PREFIX`] / [`DEFAULT_VERSION`].
pub fn storage_provider(settings: &ProviderSettings, s2s_key: Option<String>) -> DskResult<ProviderSdk> {
    let mut sdk = ProviderSdk::new(settings, s2s_key);
    if settings.prefix.is_none() {
        sdk.prefix(DEFAULT_PREFIX);
    }
    if settings.version.is_none() {
        sdk.version(DEFAULT_VERSION);
    }
    sdk.metadata_extension(json!({ "owner": { "type": "string" } }));

    let reference = json!({ "type": "object", "properties": { "uuid": {"type": "string"}, "kind": {"type": "string"} } });
    let handle = json!({ "type": "object", "properties": { "object_name": {"type": "string"}, "object_uuid": {"type": "string"} } });
    let name = json!({ "type": "string" });

    sdk.new_kind(&bucket_description())?
        .kind_procedure("ensure_bucket_exists", HALT, name.clone(), reference.clone(), ensure_bucket_exists)
        .entity_procedure("change_bucket_name", HALT, name.clone(), reference.clone(), change_bucket_name)
        .entity_procedure("create_object", HALT, name, reference.clone(), create_object)
        .entity_procedure("link_object", HALT, handle.clone(), reference.clone(), link_object)
        .entity_procedure("unlink_object", HALT, handle, json!({ "type": "object" }), unlink_object)
        .on("name", on_bucket_name)
        .on("objects", on_bucket_objects)
        .on_create(bucket_constructor);

    sdk.new_kind(&object_description())?
        .on("content", on_object_content)
        .on("references", on_object_references)
        .on_create(object_constructor);

    Ok(sdk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_both_kinds_and_all_callbacks() {
        let sdk = storage_provider(&ProviderSettings::default(), None).unwrap();
        let catalog = sdk.freeze().unwrap();
        assert_eq!(catalog.prefix(), DEFAULT_PREFIX);

        let bucket = catalog.kind("bucket").unwrap();
        assert_eq!(bucket.name_plural, "buckets");
        assert!(bucket.kind_procedures.contains_key("ensure_bucket_exists"));
        assert!(bucket.kind_procedures.contains_key("__bucket_create"));
        assert_eq!(bucket.entity_procedures.len(), 4);
        let sigs: Vec<&str> = bucket
            .intentful_signatures
            .iter()
            .map(|s| s.signature.as_str())
            .collect();
        assert_eq!(sigs, vec!["name", "objects"]);

        let object = catalog.kind("object").unwrap();
        assert_eq!(object.intentful_signatures.len(), 2);
        assert!(object.kind_procedures.contains_key("__object_create"));
    }

    #[test]
    fn configured_prefix_wins() {
        let settings = ProviderSettings {
            prefix: Some("s3_like".into()),
            version: Some("2.0".into()),
            ..ProviderSettings::default()
        };
        let catalog = storage_provider(&settings, None).unwrap().freeze().unwrap();
        assert_eq!(catalog.base_callback(), "http://127.0.0.1:9000/s3_like/2.0");
    }
}
