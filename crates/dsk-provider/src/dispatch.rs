//! Procedure Callback Dispatcher.
//!
//! `build_router` is the single entry point. Each inbound call moves through
//! [`CallPhase`]: `Received -> Parsed -> Executing -> Responded`. A body that
//! does not parse goes straight to `Responded` with 400 and the handler
//! never runs. Whatever the handler does, including panicking, the caller
//! gets a JSON answer.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use dsk_schemas::{Diff, DskError, DskResult, Entity, Metadata};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{ProviderCatalog, Route, RouteHandler};
use crate::context::ProceduralCtx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Received,
    Parsed,
    Executing,
    Responded,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// One POST route per registered callback, plus a 404 fallback.
///
/// Middleware is not applied here; callers layer it on after this call so
/// tests can drive the bare router.
pub fn build_router(catalog: Arc<ProviderCatalog>) -> Router {
    let mut router = Router::new();
    for route in &catalog.routes {
        let path = route.path.clone();
        let route = Arc::clone(route);
        let catalog = Arc::clone(&catalog);
        router = router.route(
            &path,
            post(move |headers: HeaderMap, body: Bytes| {
                let route = Arc::clone(&route);
                let catalog = Arc::clone(&catalog);
                async move { dispatch(catalog, route, headers, body).await }
            }),
        );
    }
    router.fallback(unknown_callback)
}

pub(crate) async fn unknown_callback(uri: Uri) -> Response {
    respond(Err(DskError::NotFound(format!(
        "no callback registered at {}",
        uri.path()
    ))))
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProcedureBody {
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct EntityBody<I> {
    metadata: Metadata,
    #[serde(default)]
    spec: Value,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    input: I,
}

impl<I> EntityBody<I> {
    fn split(self) -> (Entity, I) {
        (
            Entity {
                metadata: self.metadata,
                spec: self.spec,
                status: self.status,
            },
            self.input,
        )
    }
}

#[derive(Debug, Deserialize)]
struct HookBody {
    input: Entity,
}

enum ParsedCall {
    Procedure(Value),
    Entity(Entity, Value),
    Intentful(Entity, Diff),
    Hook(Entity),
}

fn parse_as<T: DeserializeOwned>(v: Value) -> DskResult<T> {
    serde_json::from_value(v).map_err(|e| DskError::BadRequest(format!("malformed callback body: {e}")))
}

fn parse_call(route: &Route, body: &[u8]) -> DskResult<ParsedCall> {
    let v: Value = serde_json::from_slice(body)
        .map_err(|e| DskError::BadRequest(format!("invalid JSON body: {e}")))?;
    Ok(match &route.handler {
        RouteHandler::Procedure(_) => ParsedCall::Procedure(parse_as::<ProcedureBody>(v)?.input),
        RouteHandler::Entity(_) => {
            let (entity, input) = parse_as::<EntityBody<Value>>(v)?.split();
            ParsedCall::Entity(entity, input)
        }
        RouteHandler::Intentful { .. } => {
            let (entity, diff) = parse_as::<EntityBody<Diff>>(v)?.split();
            ParsedCall::Intentful(entity, diff)
        }
        RouteHandler::Hook(_) => ParsedCall::Hook(parse_as::<HookBody>(v)?.input),
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn advance(phase: &mut CallPhase, next: CallPhase, route: &Route) {
    debug!(path = %route.path, from = ?*phase, to = ?next, "callback/phase");
    *phase = next;
}

async fn dispatch(
    catalog: Arc<ProviderCatalog>,
    route: Arc<Route>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut phase = CallPhase::Received;

    let call = match parse_call(&route, &body) {
        Ok(c) => c,
        Err(e) => {
            advance(&mut phase, CallPhase::Responded, &route);
            warn!(path = %route.path, error = %e, "callback/rejected");
            return respond(Err(e));
        }
    };
    advance(&mut phase, CallPhase::Parsed, &route);

    let ctx = ProceduralCtx::new(Arc::clone(&catalog.shared), headers);
    advance(&mut phase, CallPhase::Executing, &route);

    let result = match AssertUnwindSafe(execute(&catalog, &route, ctx, call))
        .catch_unwind()
        .await
    {
        Ok(r) => r,
        Err(panic) => Err(DskError::invocation(panic_message(panic.as_ref()), 500)),
    };

    advance(&mut phase, CallPhase::Responded, &route);
    if let Err(e) = &result {
        warn!(
            path = %route.path,
            procedure = %route.name,
            status = e.status_code(),
            error = %e,
            "callback/failed"
        );
    }
    respond(result)
}

async fn execute(
    catalog: &ProviderCatalog,
    route: &Route,
    ctx: ProceduralCtx,
    call: ParsedCall,
) -> DskResult<Value> {
    match (&route.handler, call) {
        (RouteHandler::Procedure(h), ParsedCall::Procedure(input)) => h.call(ctx, input).await,
        (RouteHandler::Entity(h), ParsedCall::Entity(entity, input)) => {
            h.call(ctx, entity, input).await
        }
        (RouteHandler::Intentful { pattern, handler }, ParsedCall::Intentful(entity, diff)) => {
            let kind = entity.metadata.kind.as_str();
            let diff = match catalog.tables.get(route.kind.as_deref().unwrap_or(kind)) {
                Some(table) => table.select(pattern, diff),
                None => diff,
            };
            if diff.is_empty() {
                debug!(path = %route.path, uuid = %entity.metadata.uuid, "callback/no diff for pattern");
                return Ok(Value::Null);
            }
            handler.call(ctx, entity, diff).await
        }
        (RouteHandler::Hook(h), ParsedCall::Hook(entity)) => h.call(ctx, entity).await,
        _ => Err(DskError::invocation("callback shape mismatch", 500)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn respond(result: DskResult<Value>) -> Response {
    match result {
        Ok(v) => (StatusCode::OK, Json(v)).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(e.to_body())).into_response()
        }
    }
}
