//! Handlers reaching back into the engine through `ProceduralCtx`.
//!
//! The engine is an httpmock server; callbacks are driven in-process via
//! `oneshot`, each with or without a user `Authorization` header.

use axum::http::{Request, StatusCode};
use dsk_config::ProviderSettings;
use dsk_provider::{ProceduralCtx, ProviderSdk};
use dsk_schemas::{Action, DskResult, EntityReference, ProceduralExecutionStrategy};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot
use uuid::Uuid;

const HALT: ProceduralExecutionStrategy = ProceduralExecutionStrategy::HaltIntentful;
const BUCKET: Uuid = Uuid::from_u128(7);

fn bucket_ref() -> EntityReference {
    EntityReference::new(BUCKET, "bucket")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn touch_status(ctx: ProceduralCtx, input: Value) -> DskResult<Value> {
    ctx.update_status(&bucket_ref(), &json!({ "name": input })).await?;
    Ok(json!("done"))
}

async fn may_read(ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    Ok(json!(ctx.check_permission(&[(Action::Read, bucket_ref())]).await))
}

async fn me(ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    let info = ctx.provider_security_api().user_info().await?;
    Ok(Value::Object(info))
}

async fn read_as_user(ctx: ProceduralCtx, _input: Value) -> DskResult<Value> {
    let entity = ctx.entity_client_for_user("bucket")?.get(&bucket_ref()).await?;
    Ok(entity.spec)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn router_for(engine: &MockServer) -> axum::Router {
    let settings = ProviderSettings {
        engine_url: engine.base_url(),
        ..ProviderSettings::default()
    };
    let mut sdk = ProviderSdk::new(&settings, Some("provider-key".into()));
    sdk.prefix("store").version("0.1");
    sdk.new_kind(&json!({"bucket": {"type": "object", "x-papiea-entity": "differ"}}))
        .unwrap()
        .kind_procedure("touch_status", HALT, json!({}), json!({}), touch_status)
        .kind_procedure("may_read", HALT, json!({}), json!({}), may_read)
        .kind_procedure("me", HALT, json!({}), json!({}), me)
        .kind_procedure("read_as_user", HALT, json!({}), json!({}), read_as_user);
    dsk_provider::build_router(sdk.freeze().unwrap())
}

async fn invoke(router: axum::Router, name: &str, auth: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method("POST")
        .uri(format!("/store/0.1/bucket/procedure/{name}"))
        .header("content-type", "application/json");
    if let Some(a) = auth {
        req = req.header("authorization", a);
    }
    let req = req
        .body(axum::body::Body::from(json!({"input": "b1"}).to_string()))
        .unwrap();

    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp.into_body().collect().await.expect("collect").to_bytes();
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

// ---------------------------------------------------------------------------
// update_status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_status_patches_with_provider_key() {
    let engine = MockServer::start_async().await;
    let m = engine
        .mock_async(|when, then| {
            when.method("PATCH")
                .path("/provider/store/0.1/update_status")
                .header("authorization", "Bearer provider-key")
                .json_body_partial(
                    json!({
                        "entity_ref": {"uuid": BUCKET, "kind": "bucket"},
                        "status": {"name": "b1"}
                    })
                    .to_string(),
                );
            then.status(200);
        })
        .await;

    let (status, body) = invoke(router_for(&engine), "touch_status", Some("Bearer user-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("done"));
    m.assert_hits_async(1).await;
}

#[tokio::test]
async fn update_status_failure_surfaces_as_handler_error() {
    let engine = MockServer::start_async().await;
    engine
        .mock_async(|when, then| {
            when.method("PATCH").path("/provider/store/0.1/update_status");
            then.status(404).json_body(json!({"error": {"message": "entity not found"}}));
        })
        .await;

    let (status, body) = invoke(router_for(&engine), "touch_status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("update_status: entity not found"));
}

// ---------------------------------------------------------------------------
// check_permission
// ---------------------------------------------------------------------------

async fn permission_engine(answer_status: u16, answer: Value) -> MockServer {
    let engine = MockServer::start_async().await;
    engine
        .mock_async(move |when, then| {
            when.method(POST)
                .path("/services/store/0.1/check_permission")
                .header("authorization", "Bearer user-token")
                .json_body(json!([["read", {"uuid": BUCKET, "kind": "bucket"}]]));
            then.status(answer_status).json_body(answer);
        })
        .await;
    engine
}

#[tokio::test]
async fn permission_granted_only_on_ok() {
    let engine = permission_engine(200, json!({"success": "Ok"})).await;
    let (_, body) = invoke(router_for(&engine), "may_read", Some("Bearer user-token")).await;
    assert_eq!(body, json!(true));
}

#[tokio::test]
async fn permission_fails_closed() {
    let engine = permission_engine(200, json!({"success": "Denied"})).await;
    let (_, body) = invoke(router_for(&engine), "may_read", Some("Bearer user-token")).await;
    assert_eq!(body, json!(false), "any answer other than Ok");

    let engine = permission_engine(500, json!({"error": "boom"})).await;
    let (_, body) = invoke(router_for(&engine), "may_read", Some("Bearer user-token")).await;
    assert_eq!(body, json!(false), "engine error");

    let engine = permission_engine(200, json!({"success": "Ok"})).await;
    let (_, body) = invoke(router_for(&engine), "may_read", None).await;
    assert_eq!(body, json!(false), "no invoking token");
}

// ---------------------------------------------------------------------------
// Security API and user-scoped clients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_security_api_uses_provider_key() {
    let engine = MockServer::start_async().await;
    let m = engine
        .mock_async(|when, then| {
            when.method(GET)
                .path("/services/store/0.1/auth/user_info")
                .header("authorization", "Bearer provider-key");
            then.status(200).json_body(json!({"owner": "store-provider", "is_admin": true}));
        })
        .await;

    let (status, body) = invoke(router_for(&engine), "me", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "store-provider");
    m.assert_hits_async(1).await;
}

#[tokio::test]
async fn user_client_forwards_invoking_token() {
    let engine = MockServer::start_async().await;
    let m = engine
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/services/store/0.1/bucket/{BUCKET}"))
                .header("authorization", "Bearer user-token");
            then.status(200).json_body(json!({
                "metadata": {"uuid": BUCKET, "kind": "bucket", "spec_version": 1},
                "spec": {"name": "b1", "objects": []},
                "status": {"name": "b1", "objects": []}
            }));
        })
        .await;

    let (status, body) = invoke(router_for(&engine), "read_as_user", Some("Bearer user-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "b1");
    m.assert_hits_async(1).await;

    let (status, _) = invoke(router_for(&engine), "read_as_user", Some("Basic abc")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    m.assert_hits_async(1).await;
}
