//! Registration facade.
//!
//! GREEN when:
//! - each missing precondition is named on its own: prefix, then version,
//!   then kind;
//! - malformed kind descriptions are rejected at declaration;
//! - register posts the full descriptor with the provider key, and a
//!   second register posts again.

use dsk_config::ProviderSettings;
use dsk_provider::{ProceduralCtx, ProviderSdk};
use dsk_schemas::{Diff, DskError, DskResult, Entity, ProceduralExecutionStrategy, Status};
use httpmock::prelude::*;
use serde_json::{json, Value};

const HALT: ProceduralExecutionStrategy = ProceduralExecutionStrategy::HaltIntentful;

async fn noop(_ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    Ok(Value::Null)
}

async fn on_objects(_ctx: ProceduralCtx, _entity: Entity, _diff: Diff) -> DskResult<Value> {
    Ok(Value::Null)
}

async fn empty_status(_ctx: ProceduralCtx, _entity: Entity) -> DskResult<Status> {
    Ok(json!({}))
}

fn settings(engine_url: &str) -> ProviderSettings {
    ProviderSettings {
        engine_url: engine_url.to_string(),
        public_host: "10.0.0.5".into(),
        public_port: 9100,
        ..ProviderSettings::default()
    }
}

fn bucket() -> Value {
    json!({"bucket": {"type": "object", "x-papiea-entity": "differ"}})
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

#[test]
fn nothing_set_names_prefix() {
    let sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    let err = sdk.freeze().unwrap_err();
    assert_eq!(err.missing_field(), Some("prefix"));
    assert_eq!(err.to_string(), "Malformed provider description. Missing: prefix");
}

#[test]
fn prefix_only_names_version() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    sdk.prefix("store");
    sdk.new_kind(&bucket()).unwrap();
    assert_eq!(sdk.freeze().unwrap_err().missing_field(), Some("version"));
}

#[test]
fn no_kinds_names_kind() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    sdk.prefix("store").version("0.1");
    assert_eq!(sdk.freeze().unwrap_err().missing_field(), Some("kind"));

    sdk.new_kind(&bucket()).unwrap();
    assert!(sdk.remove_kind("bucket"));
    assert_eq!(sdk.freeze().unwrap_err().missing_field(), Some("kind"));
}

#[tokio::test]
async fn register_without_prefix_never_contacts_engine() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(POST).path("/provider/");
            then.status(200);
        })
        .await;

    let mut sdk = ProviderSdk::new(&settings(&server.base_url()), Some("k".into()));
    sdk.version("0.1");
    sdk.new_kind(&bucket()).unwrap();
    let err = sdk.register().await.unwrap_err();
    assert_eq!(err, DskError::MissingField("prefix"));
    m.assert_hits_async(0).await;
}

// ---------------------------------------------------------------------------
// Kind descriptions
// ---------------------------------------------------------------------------

#[test]
fn empty_description_is_malformed() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    for bad in [json!({}), json!([]), json!("bucket")] {
        let err = sdk.new_kind(&bad).err().unwrap();
        assert!(matches!(err, DskError::MalformedDescription(_)), "{bad} -> {err:?}");
    }
}

#[test]
fn missing_marker_is_malformed() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    let err = sdk
        .new_kind(&json!({"bucket": {"type": "object"}}))
        .err()
        .unwrap();
    assert!(err.to_string().contains("x-papiea-entity"), "{err}");

    let err = sdk
        .new_kind(&json!({"bucket": {"x-papiea-entity": "sometimes"}}))
        .err()
        .unwrap();
    assert!(err.is_malformed_description());
}

#[test]
fn reserved_procedure_names_are_rejected() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    sdk.prefix("store").version("0.1");
    sdk.new_kind(&bucket())
        .unwrap()
        .kind_procedure("__bucket_create", HALT, json!({}), json!({}), noop);
    assert!(sdk.freeze().unwrap_err().is_malformed_description());
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_posts_descriptor_and_is_not_idempotent() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/provider/")
                .header("authorization", "Bearer provider-key")
                .json_body_partial(
                    json!({
                        "prefix": "store",
                        "version": "0.1",
                        "allowExtraProps": false,
                        "extension_structure": {"owner": {"type": "string"}}
                    })
                    .to_string(),
                );
            then.status(200);
        })
        .await;

    let mut sdk = ProviderSdk::new(&settings(&server.base_url()), Some("provider-key".into()));
    sdk.prefix("store")
        .version("0.1")
        .metadata_extension(json!({"owner": {"type": "string"}}));
    sdk.new_kind(&bucket())
        .unwrap()
        .kind_procedure("ensure_bucket_exists", HALT, json!({}), json!({}), noop)
        .on("objects", on_objects)
        .on_create(empty_status);
    sdk.provider_procedure("compute_sum", HALT, json!({}), json!({}), noop);

    let registered = sdk.register().await.unwrap();
    let d = registered.catalog().descriptor();

    let kind = &d["kinds"][0];
    assert_eq!(kind["name"], "bucket");
    assert_eq!(kind["name_plural"], "buckets");
    assert_eq!(kind["intentful_behaviour"], "differ");
    assert_eq!(
        kind["kind_procedures"]["ensure_bucket_exists"]["procedure_callback"],
        "http://10.0.0.5:9100/store/0.1/bucket/procedure/ensure_bucket_exists"
    );
    assert_eq!(
        kind["kind_procedures"]["__bucket_create"]["procedure_callback"],
        "http://10.0.0.5:9100/store/0.1/bucket/constructor"
    );
    assert_eq!(kind["intentful_signatures"][0]["signature"], "objects");
    assert_eq!(
        kind["intentful_signatures"][0]["base_callback"],
        "http://10.0.0.5:9100/store/0.1"
    );
    assert_eq!(kind["intentful_signatures"][0]["execution_strategy"], "Halt_Intentful");
    assert_eq!(
        d["procedures"]["compute_sum"]["procedure_callback"],
        "http://10.0.0.5:9100/store/0.1/procedure/compute_sum"
    );
    assert!(d.get("policy").is_none());
    m.assert_hits_async(1).await;

    sdk.register().await.unwrap();
    m.assert_hits_async(2).await;
}

#[tokio::test]
async fn secure_with_adds_policy_fields() {
    let mut sdk = ProviderSdk::new(&settings("http://127.0.0.1:1"), None);
    sdk.prefix("store")
        .version("0.1")
        .secure_with(json!({"client_id": "x"}), "[request_definition]", "p, admin, *, *");
    sdk.new_kind(&bucket()).unwrap();
    let catalog = sdk.freeze().unwrap();
    let d = catalog.descriptor();
    assert_eq!(d["oauth2"]["client_id"], "x");
    assert_eq!(d["authModel"], "[request_definition]");
    assert_eq!(d["policy"], "p, admin, *, *");
}

#[tokio::test]
async fn engine_rejection_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/provider/");
            then.status(401).json_body(json!({"error": {"message": "invalid s2s key"}}));
        })
        .await;

    let mut sdk = ProviderSdk::new(&settings(&server.base_url()), Some("wrong".into()));
    sdk.prefix("store").version("0.1");
    sdk.new_kind(&bucket()).unwrap();
    let err = sdk.register().await.unwrap_err();
    assert_eq!(
        err,
        DskError::Unauthorized("provider registration failed: invalid s2s key".into())
    );
}
