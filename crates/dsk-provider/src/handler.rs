//! Handler seams.
//!
//! Each callback kind has one trait. Plain `async fn`s (and closures) with
//! the matching signature implement it through a blanket impl, so
//! registration reads `kind.on("objects", on_objects_changed)`.
//!
//! Handlers return `DskResult`: business-rule failures are `Err` values
//! (usually [`DskError::Invocation`](dsk_schemas::DskError::Invocation))
//! and are written to the wire with their status code. A panic is caught
//! by the dispatcher and answered with 500.

use std::future::Future;

use async_trait::async_trait;
use dsk_schemas::{Diff, DskResult, Entity, Status};
use serde_json::Value;

use crate::context::ProceduralCtx;

/// Kind-level or provider-level procedure: `(ctx, input) -> output`.
#[async_trait]
pub trait ProcedureHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ProceduralCtx, input: Value) -> DskResult<Value>;
}

#[async_trait]
impl<F, Fut> ProcedureHandler for F
where
    F: Fn(ProceduralCtx, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DskResult<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ProceduralCtx, input: Value) -> DskResult<Value> {
        (self)(ctx, input).await
    }
}

/// Entity-scoped procedure: `(ctx, entity, input) -> output`.
#[async_trait]
pub trait EntityProcedureHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ProceduralCtx, entity: Entity, input: Value) -> DskResult<Value>;
}

#[async_trait]
impl<F, Fut> EntityProcedureHandler for F
where
    F: Fn(ProceduralCtx, Entity, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DskResult<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ProceduralCtx, entity: Entity, input: Value) -> DskResult<Value> {
        (self)(ctx, entity, input).await
    }
}

/// Diff handler: receives only the diff entries routed to its field path
/// and must record the converged observation through
/// [`ProceduralCtx::update_status`].
///
/// Delivery is at-least-once. Handlers must tolerate seeing the same diff
/// twice, which in practice means computing status from spec rather than
/// accumulating onto the previous status.
#[async_trait]
pub trait IntentfulHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ProceduralCtx, entity: Entity, diff: Diff) -> DskResult<Value>;
}

#[async_trait]
impl<F, Fut> IntentfulHandler for F
where
    F: Fn(ProceduralCtx, Entity, Diff) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DskResult<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ProceduralCtx, entity: Entity, diff: Diff) -> DskResult<Value> {
        (self)(ctx, entity, diff).await
    }
}

/// Lifecycle hook. A constructor returns the initial status; a delete hook's
/// return value is passed back to the engine unchanged.
#[async_trait]
pub trait EntityHook: Send + Sync + 'static {
    async fn call(&self, ctx: ProceduralCtx, entity: Entity) -> DskResult<Status>;
}

#[async_trait]
impl<F, Fut> EntityHook for F
where
    F: Fn(ProceduralCtx, Entity) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DskResult<Status>> + Send + 'static,
{
    async fn call(&self, ctx: ProceduralCtx, entity: Entity) -> DskResult<Status> {
        (self)(ctx, entity).await
    }
}
