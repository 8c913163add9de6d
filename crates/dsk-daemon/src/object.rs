//! Object kind: constructor and diff handlers.

use chrono::Utc;
use dsk_provider::ProceduralCtx;
use dsk_schemas::{Diff, DskResult, Entity, Status};
use serde_json::Value;
use tracing::debug;

use crate::model::{from_doc, status_or_default, to_doc, ObjectSpec, ObjectStatus};

/// New objects start empty and unreferenced; the `references` handler
/// converges the back-references afterwards.
pub async fn object_constructor(_ctx: ProceduralCtx, object: Entity) -> DskResult<Status> {
    let spec: ObjectSpec = from_doc("object spec", &object.spec)?;
    to_doc(&ObjectStatus {
        size: spec.content.len() as u64,
        content: spec.content,
        last_modified: Some(Utc::now()),
        references: Vec::new(),
    })
}

/// `content`: status carries the content, its size and when it changed.
pub async fn on_object_content(ctx: ProceduralCtx, object: Entity, _diff: Diff) -> DskResult<Value> {
    let spec: ObjectSpec = from_doc("object spec", &object.spec)?;
    let mut status: ObjectStatus = status_or_default(&object.status);
    status.size = spec.content.len() as u64;
    status.content = spec.content;
    status.last_modified = Some(Utc::now());
    ctx.update_status(&object.reference(), &to_doc(&status)?).await?;
    Ok(Value::Null)
}

/// `references`: status mirrors the spec's back-references.
pub async fn on_object_references(ctx: ProceduralCtx, object: Entity, diff: Diff) -> DskResult<Value> {
    let spec: ObjectSpec = from_doc("object spec", &object.spec)?;
    let mut status: ObjectStatus = status_or_default(&object.status);
    debug!(uuid = %object.metadata.uuid, entries = diff.len(), "object/references diff");
    status.references = spec.references;
    ctx.update_status(&object.reference(), &to_doc(&status)?).await?;
    Ok(Value::Null)
}
