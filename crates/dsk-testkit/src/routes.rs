//! HTTP surface of the fake engine.
//!
//! Error bodies use the engine's own shape, `{"error": {"message", "code"}}`,
//! so clients exercise the same parsing they use against a real deployment.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use dsk_schemas::{
    DskError, Entity, EntityCreateOrUpdateResult, EntityReference, FilterResult, IntentfulBehaviour,
    Metadata,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{entity_matches, EngineStore, Registration};

pub(crate) struct EngineShared {
    pub(crate) store: RwLock<EngineStore>,
    pub(crate) http: reqwest::Client,
}

type Shared = State<Arc<EngineShared>>;

pub(crate) fn build_router(shared: Arc<EngineShared>) -> Router {
    Router::new()
        .route("/provider/", post(register_provider))
        .route("/provider/:prefix/:version/update_status", patch(update_status))
        .route("/services/intent_watcher/filter", post(filter_watchers))
        .route("/services/intent_watcher/:id", get(get_watcher))
        .route("/services/:prefix/:version/check_permission", post(check_permission))
        .route("/services/:prefix/:version/procedure/:name", post(provider_procedure))
        .route(
            "/services/:prefix/:version/:kind",
            get(list_entities).post(create_entity),
        )
        .route("/services/:prefix/:version/:kind/filter", post(filter_entities))
        .route(
            "/services/:prefix/:version/:kind/procedure/:name",
            post(kind_procedure),
        )
        .route(
            "/services/:prefix/:version/:kind/:uuid",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route(
            "/services/:prefix/:version/:kind/:uuid/procedure/:name",
            post(entity_procedure),
        )
        .with_state(shared)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine_error(e: &DskError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match e {
        DskError::NotFound(m)
        | DskError::Conflict(m)
        | DskError::Unauthorized(m)
        | DskError::PermissionDenied(m)
        | DskError::BadRequest(m) => m.clone(),
        other => other.to_string(),
    };
    (
        status,
        Json(json!({"error": {"message": message, "code": status.as_u16()}})),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<HeaderValue> {
    headers
        .get(AUTHORIZATION)
        .filter(|v| v.to_str().is_ok_and(|s| s.starts_with("Bearer ")))
        .cloned()
}

/// Answer of one provider callback.
pub(crate) struct CallbackAnswer {
    pub(crate) status: StatusCode,
    pub(crate) body: Value,
}

impl CallbackAnswer {
    pub(crate) fn is_success(&self) -> bool {
        self.status.is_success()
    }

    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub(crate) async fn call_provider(
    http: &reqwest::Client,
    url: &str,
    auth: Option<HeaderValue>,
    body: &Value,
) -> Result<CallbackAnswer, DskError> {
    let mut rb = http.post(url).json(body);
    if let Some(a) = auth {
        rb = rb.header(AUTHORIZATION, a);
    }
    let resp = rb
        .send()
        .await
        .map_err(|e| DskError::Transport(format!("provider callback {url}: {e}")))?;
    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| DskError::Transport(format!("provider callback {url}: {e}")))?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    debug!(url, status = status.as_u16(), "fake-engine/callback");
    Ok(CallbackAnswer { status, body })
}

fn entity_payload(entity: &Entity, input: Value) -> Value {
    json!({
        "metadata": entity.metadata,
        "spec": entity.spec,
        "status": entity.status,
        "input": input,
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

async fn register_provider(State(st): Shared, headers: HeaderMap, Json(descriptor): Json<Value>) -> StatusCode {
    info!(prefix = %descriptor["prefix"], version = %descriptor["version"], "fake-engine/register");
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    st.store.write().await.register(Registration {
        descriptor,
        authorization,
    });
    StatusCode::OK
}

#[derive(Deserialize)]
struct UpdateStatusBody {
    entity_ref: EntityReference,
    status: Value,
}

async fn update_status(
    State(st): Shared,
    Path((_prefix, _version)): Path<(String, String)>,
    Json(body): Json<UpdateStatusBody>,
) -> Response {
    match st.store.write().await.set_status(&body.entity_ref, body.status) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => engine_error(&e),
    }
}

async fn check_permission(State(st): Shared, headers: HeaderMap, Json(_checks): Json<Value>) -> Response {
    if bearer(&headers).is_none() {
        return engine_error(&DskError::Unauthorized("No user token".into()));
    }
    if st.store.read().await.allow_permissions {
        Json(json!({"success": "Ok"})).into_response()
    } else {
        engine_error(&DskError::PermissionDenied("Permission denied".into()))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateBody {
    spec: Value,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn create_entity(
    State(st): Shared,
    Path((prefix, version, kind)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Response {
    let md = body.metadata.unwrap_or(Value::Null);
    let uuid = md
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Uuid>().ok())
        .unwrap_or_else(Uuid::new_v4);
    let mut metadata = Metadata::new(uuid, kind.clone());
    metadata.spec_version = 1;
    metadata.extension = md.get("extension").cloned().unwrap_or(Value::Null);
    metadata.created_at = Some(Utc::now());
    let mut entity = Entity {
        metadata,
        spec: body.spec.clone(),
        status: body.spec,
    };

    let constructor = {
        let store = st.store.read().await;
        store
            .kind(&prefix, &version, &kind)
            .and_then(|k| k.kind_procedures.get(&format!("__{kind}_create")).cloned())
    };
    if let Some(sig) = constructor {
        let payload = json!({ "input": entity });
        match call_provider(&st.http, &sig.procedure_callback, bearer(&headers), &payload).await {
            Ok(ans) if ans.is_success() => entity.status = ans.body,
            Ok(ans) => return ans.into_response(),
            Err(e) => return engine_error(&e),
        }
    }

    if let Err(e) = st.store.write().await.insert(&prefix, &version, entity.clone()) {
        return engine_error(&e);
    }
    info!(%kind, uuid = %entity.metadata.uuid, "fake-engine/create");
    Json(EntityCreateOrUpdateResult {
        metadata: entity.metadata,
        spec: entity.spec,
        status: Some(entity.status),
        intent_watcher: None,
    })
    .into_response()
}

async fn get_entity(
    State(st): Shared,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, Uuid)>,
) -> Response {
    match st.store.read().await.get(&prefix, &version, &kind, uuid) {
        Ok(e) => Json(e.clone()).into_response(),
        Err(e) => engine_error(&e),
    }
}

async fn list_entities(
    State(st): Shared,
    Path((prefix, version, kind)): Path<(String, String, String)>,
) -> Json<FilterResult> {
    let results = st.store.read().await.collection(&prefix, &version, &kind);
    Json(FilterResult {
        entity_count: Some(results.len() as u64),
        results,
    })
}

#[derive(Deserialize)]
struct VersionOnly {
    spec_version: u64,
}

#[derive(Deserialize)]
struct UpdateBody {
    metadata: VersionOnly,
    spec: Value,
}

async fn update_entity(
    State(st): Shared,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, Uuid)>,
    Json(body): Json<UpdateBody>,
) -> Response {
    let mut store = st.store.write().await;
    let differ = store
        .kind(&prefix, &version, &kind)
        .is_some_and(|k| k.intentful_behaviour == IntentfulBehaviour::Differ);
    let entity = match store.update_spec(
        &prefix,
        &version,
        &kind,
        uuid,
        body.metadata.spec_version,
        body.spec,
        !differ,
    ) {
        Ok(e) => e,
        Err(e) => return engine_error(&e),
    };
    let intent_watcher =
        differ.then(|| store.new_watcher(entity.reference(), entity.metadata.spec_version));
    info!(%kind, %uuid, spec_version = entity.metadata.spec_version, "fake-engine/update");
    Json(EntityCreateOrUpdateResult {
        metadata: entity.metadata,
        spec: entity.spec,
        status: Some(entity.status),
        intent_watcher,
    })
    .into_response()
}

async fn delete_entity(
    State(st): Shared,
    Path((prefix, version, kind, uuid)): Path<(String, String, String, Uuid)>,
    headers: HeaderMap,
) -> Response {
    let (entity, destructor) = {
        let store = st.store.read().await;
        let entity = match store.get(&prefix, &version, &kind, uuid) {
            Ok(e) => e.clone(),
            Err(e) => return engine_error(&e),
        };
        let destructor = store
            .kind(&prefix, &version, &kind)
            .and_then(|k| k.kind_procedures.get(&format!("__{kind}_delete")).cloned());
        (entity, destructor)
    };
    if let Some(sig) = destructor {
        let payload = json!({ "input": entity });
        match call_provider(&st.http, &sig.procedure_callback, bearer(&headers), &payload).await {
            Ok(ans) if ans.is_success() => {}
            Ok(ans) => return ans.into_response(),
            Err(e) => return engine_error(&e),
        }
    }
    match st.store.write().await.remove(&prefix, &version, &kind, uuid) {
        Ok(_) => {
            info!(%kind, %uuid, "fake-engine/delete");
            StatusCode::OK.into_response()
        }
        Err(e) => engine_error(&e),
    }
}

#[derive(Deserialize)]
struct Page {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn filter_entities(
    State(st): Shared,
    Path((prefix, version, kind)): Path<(String, String, String)>,
    Query(page): Query<Page>,
    Json(predicate): Json<Value>,
) -> Json<FilterResult> {
    let matched: Vec<Entity> = st
        .store
        .read()
        .await
        .collection(&prefix, &version, &kind)
        .into_iter()
        .filter(|e| entity_matches(e, &predicate))
        .collect();
    let total = matched.len();
    let results = matched
        .into_iter()
        .skip(page.offset.unwrap_or(0))
        .take(page.limit.unwrap_or(usize::MAX))
        .collect();
    Json(FilterResult {
        entity_count: Some(total as u64),
        results,
    })
}

// ---------------------------------------------------------------------------
// Procedures
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ProcedureBody {
    #[serde(default)]
    input: Value,
}

async fn entity_procedure(
    State(st): Shared,
    Path((prefix, version, kind, uuid, name)): Path<(String, String, String, Uuid, String)>,
    headers: HeaderMap,
    Json(body): Json<ProcedureBody>,
) -> Response {
    let (entity, callback) = {
        let store = st.store.read().await;
        let entity = match store.get(&prefix, &version, &kind, uuid) {
            Ok(e) => e.clone(),
            Err(e) => return engine_error(&e),
        };
        let callback = store
            .kind(&prefix, &version, &kind)
            .and_then(|k| k.entity_procedures.get(&name).map(|s| s.procedure_callback.clone()));
        (entity, callback)
    };
    let Some(url) = callback else {
        return engine_error(&DskError::NotFound(format!("Procedure {name} not found")));
    };
    forward(&st, &url, &headers, entity_payload(&entity, body.input)).await
}

async fn kind_procedure(
    State(st): Shared,
    Path((prefix, version, kind, name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<ProcedureBody>,
) -> Response {
    let callback = st
        .store
        .read()
        .await
        .kind(&prefix, &version, &kind)
        .and_then(|k| k.kind_procedures.get(&name).map(|s| s.procedure_callback.clone()));
    let Some(url) = callback else {
        return engine_error(&DskError::NotFound(format!("Procedure {name} not found")));
    };
    forward(&st, &url, &headers, json!({ "input": body.input })).await
}

async fn provider_procedure(
    State(st): Shared,
    Path((prefix, version, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<ProcedureBody>,
) -> Response {
    let callback = st
        .store
        .read()
        .await
        .provider_procedure_callback(&prefix, &version, &name);
    let Some(url) = callback else {
        return engine_error(&DskError::NotFound(format!("Procedure {name} not found")));
    };
    forward(&st, &url, &headers, json!({ "input": body.input })).await
}

async fn forward(st: &EngineShared, url: &str, headers: &HeaderMap, payload: Value) -> Response {
    match call_provider(&st.http, url, bearer(headers), &payload).await {
        Ok(ans) => ans.into_response(),
        Err(e) => engine_error(&e),
    }
}

// ---------------------------------------------------------------------------
// Intent watchers
// ---------------------------------------------------------------------------

async fn get_watcher(State(st): Shared, Path(id): Path<Uuid>) -> Response {
    match st.store.write().await.observe_watcher(id) {
        Some(w) => Json(w).into_response(),
        None => engine_error(&DskError::NotFound(format!("Intent watcher {id} not found"))),
    }
}

async fn filter_watchers(State(st): Shared, Json(predicate): Json<Value>) -> Json<Value> {
    let results = st.store.read().await.watchers_matching(&predicate);
    Json(json!({ "results": results }))
}
