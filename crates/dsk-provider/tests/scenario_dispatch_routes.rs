//! In-process scenario tests for the callback dispatcher.
//!
//! The router is built from a frozen catalog and driven via
//! `tower::ServiceExt::oneshot`. No engine is contacted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{Request, StatusCode};
use dsk_config::ProviderSettings;
use dsk_provider::{build_router, ProceduralCtx, ProviderSdk, RouteKind};
use dsk_schemas::{Diff, DskError, DskResult, Entity, ProceduralExecutionStrategy, Status};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

const HALT: ProceduralExecutionStrategy = ProceduralExecutionStrategy::HaltIntentful;

static COUNTED: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn echo(_ctx: ProceduralCtx, input: Value) -> DskResult<Value> {
    Ok(json!({ "echo": input }))
}

async fn counted(_ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    COUNTED.fetch_add(1, Ordering::SeqCst);
    Ok(Value::Null)
}

async fn explode(_ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    panic!("bucket index corrupted")
}

async fn reject(_ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    Err(DskError::invocation("Object already exists in the bucket", 422))
}

async fn whoami(_ctx: ProceduralCtx, entity: Entity, input: Value) -> DskResult<Value> {
    Ok(json!({
        "uuid": entity.metadata.uuid,
        "name": entity.spec["name"],
        "input": input,
    }))
}

async fn seen_paths(_ctx: ProceduralCtx, _entity: Entity, diff: Diff) -> DskResult<Value> {
    Ok(json!(diff.iter().map(|d| d.path.to_string()).collect::<Vec<_>>()))
}

async fn initial_status(_ctx: ProceduralCtx, entity: Entity) -> DskResult<Status> {
    Ok(json!({ "name": entity.spec["name"], "objects": [] }))
}

async fn compute_sum(_ctx: ProceduralCtx, input: Value) -> DskResult<Value> {
    let a = input["a"].as_i64().unwrap_or(0);
    let b = input["b"].as_i64().unwrap_or(0);
    Ok(json!(a + b))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bucket_description() -> Value {
    json!({
        "bucket": {
            "type": "object",
            "x-papiea-entity": "differ",
            "properties": {
                "name": {"type": "string"},
                "objects": {"type": "array"}
            }
        }
    })
}

fn make_sdk() -> ProviderSdk {
    let settings = ProviderSettings {
        engine_url: "http://127.0.0.1:1".into(),
        ..ProviderSettings::default()
    };
    let mut sdk = ProviderSdk::new(&settings, Some("provider-key".into()));
    sdk.prefix("store").version("0.1");
    sdk.new_kind(&bucket_description())
        .unwrap()
        .kind_procedure("echo", HALT, json!({}), json!({}), echo)
        .kind_procedure("counted", HALT, json!({}), json!({}), counted)
        .kind_procedure("explode", HALT, json!({}), json!({}), explode)
        .kind_procedure("reject", HALT, json!({}), json!({}), reject)
        .entity_procedure("whoami", HALT, json!({}), json!({}), whoami)
        .on("objects", seen_paths)
        .on("objects.meta", seen_paths)
        .on_create(initial_status);
    sdk.provider_procedure("compute_sum", HALT, json!({}), json!({}), compute_sum);
    sdk
}

fn make_router() -> axum::Router {
    build_router(make_sdk().freeze().unwrap())
}

fn post_json(uri: &str, body: impl Into<axum::body::Body>) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn entity_body(input: Value) -> String {
    json!({
        "metadata": {"uuid": uuid::Uuid::from_u128(42), "kind": "bucket", "spec_version": 3},
        "spec": {"name": "b1", "objects": []},
        "status": {"name": "b1", "objects": []},
        "input": input
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[test]
fn catalog_lists_every_callback_route() {
    let catalog = make_sdk().freeze().unwrap();
    let mut paths: Vec<(String, RouteKind)> = catalog
        .routes()
        .map(|r| (r.path.clone(), r.route_kind))
        .collect();
    paths.sort_by(|a, b| a.0.cmp(&b.0));

    assert!(paths.contains(&("/store/0.1/bucket/procedure/echo".into(), RouteKind::KindProcedure)));
    assert!(paths.contains(&("/store/0.1/bucket/entity_procedure/whoami".into(), RouteKind::EntityProcedure)));
    assert!(paths.contains(&("/store/0.1/bucket/intentful/objects.meta".into(), RouteKind::Intentful)));
    assert!(paths.contains(&("/store/0.1/bucket/constructor".into(), RouteKind::Constructor)));
    assert!(paths.contains(&("/store/0.1/procedure/compute_sum".into(), RouteKind::ProviderProcedure)));
    assert_eq!(catalog.base_callback(), "http://127.0.0.1:9000/store/0.1");
}

// ---------------------------------------------------------------------------
// Procedures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kind_procedure_returns_handler_output() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/procedure/echo", json!({"input": "b1"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!({"echo": "b1"}));
}

#[tokio::test]
async fn provider_procedure_is_served() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/procedure/compute_sum", json!({"input": {"a": 2, "b": 5}}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!(7));
}

#[tokio::test]
async fn invalid_json_is_400_and_handler_never_runs() {
    let before = COUNTED.load(Ordering::SeqCst);
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/procedure/counted", "{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["error"]["status_code"], 400);
    assert!(json["error"]["message"].as_str().unwrap().contains("invalid JSON"));
    assert_eq!(COUNTED.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn handler_panic_becomes_500_body() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/procedure/explode", json!({"input": null}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json = parse_json(body);
    assert_eq!(json["error"]["status_code"], 500);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("bucket index corrupted"));
}

#[tokio::test]
async fn invocation_error_keeps_status_and_message() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/procedure/reject", json!({"input": "o1"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        parse_json(body)["error"]["message"],
        "Object already exists in the bucket"
    );
}

#[tokio::test]
async fn entity_procedure_receives_entity_and_input() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/entity_procedure/whoami", entity_body(json!("o1"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["name"], "b1");
    assert_eq!(json["input"], "o1");
    assert_eq!(json["uuid"], json!(uuid::Uuid::from_u128(42)));
}

#[tokio::test]
async fn entity_procedure_without_metadata_is_400() {
    let (status, _) = call(
        make_router(),
        post_json("/store/0.1/bucket/entity_procedure/whoami", json!({"input": 1}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn constructor_returns_initial_status() {
    let body = json!({
        "input": {
            "metadata": {"uuid": uuid::Uuid::from_u128(7), "kind": "bucket"},
            "spec": {"name": "b9", "objects": []}
        }
    });
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/constructor", body.to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!({"name": "b9", "objects": []}));
}

// ---------------------------------------------------------------------------
// Diff routing
// ---------------------------------------------------------------------------

fn diff_body() -> String {
    entity_body(json!([
        {"key": "1", "path": ["objects", 1], "spec": {"name": "o2"}, "status": null},
        {"key": "owner", "path": ["objects", "meta", "owner"], "spec": "ops", "status": null},
        {"key": "name", "path": ["name"], "spec": "b2", "status": "b1"},
        {"key": "0", "path": ["objects", 0], "spec": null, "status": {"name": "o1"}}
    ]))
}

#[tokio::test]
async fn diff_handler_sees_only_its_longest_prefix_entries() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/intentful/objects", diff_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!(["objects.1", "objects.0"]));

    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/intentful/objects.meta", diff_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), json!(["objects.meta.owner"]));
}

#[tokio::test]
async fn diff_with_no_matching_entries_skips_handler() {
    let body = entity_body(json!([
        {"key": "name", "path": ["name"], "spec": "b2", "status": "b1"}
    ]));
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/intentful/objects", body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body), Value::Null);
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_callback_is_structured_404() {
    let (status, body) = call(
        make_router(),
        post_json("/store/0.1/bucket/procedure/nope", "{}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json = parse_json(body);
    assert_eq!(json["error"]["status_code"], 404);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("/store/0.1/bucket/procedure/nope"));
}

#[tokio::test]
async fn one_catalog_serves_many_routers() {
    let catalog = make_sdk().freeze().unwrap();
    let a = build_router(Arc::clone(&catalog));
    let b = build_router(Arc::clone(&catalog));
    let (sa, _) = call(a, post_json("/store/0.1/bucket/procedure/echo", r#"{"input":1}"#)).await;
    let (sb, _) = call(b, post_json("/store/0.1/bucket/procedure/echo", r#"{"input":2}"#)).await;
    assert_eq!((sa, sb), (StatusCode::OK, StatusCode::OK));
    assert_eq!(Arc::strong_count(&catalog), 1, "routers dropped with their clones");
}
