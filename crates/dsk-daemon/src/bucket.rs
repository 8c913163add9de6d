//! Bucket kind: procedures, constructor and diff handlers.
//!
//! Procedures act with the invoking user's token. They only ever change
//! specs; status is written by the diff handlers once the engine reports
//! the resulting diff.

use std::collections::BTreeSet;

use dsk_provider::ProceduralCtx;
use dsk_schemas::{Diff, DskError, DskResult, Entity, EntityReference, Status};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::model::{
    from_doc, owner_extension, status_or_default, to_doc, BucketLink, BucketSpec, BucketStatus,
    ObjectHandle, ObjectLink, ObjectSpec, BUCKET_KIND, OBJECT_KIND,
};

fn bucket_name_input(input: &Value) -> DskResult<&str> {
    input
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DskError::invocation("bucket name must be a non-empty string", 400))
}

// ---------------------------------------------------------------------------
// Kind procedure
// ---------------------------------------------------------------------------

/// Return the bucket named `input`, creating it if none exists.
pub async fn ensure_bucket_exists(ctx: ProceduralCtx, input: Value) -> DskResult<Value> {
    let name = bucket_name_input(&input)?;
    let buckets = ctx.entity_client_for_user(BUCKET_KIND)?;

    let found = buckets
        .filter(&json!({ "spec": { "name": name } }))
        .await
        .map_err(|e| e.with_context("Unable to create bucket entity"))?;
    if let Some(existing) = found.results.first() {
        debug!(bucket = name, uuid = %existing.metadata.uuid, "bucket/exists");
        return to_doc(&existing.reference());
    }

    let created = buckets
        .create(to_doc(&BucketSpec::new(name))?, Some(owner_extension()))
        .await
        .map_err(|e| e.with_context("Unable to create bucket entity"))?;
    info!(bucket = name, uuid = %created.metadata.uuid, "bucket/created");
    to_doc(&created.reference())
}

// ---------------------------------------------------------------------------
// Entity procedures
// ---------------------------------------------------------------------------

/// Rename the bucket and every back-reference its objects hold to it.
pub async fn change_bucket_name(ctx: ProceduralCtx, bucket: Entity, input: Value) -> DskResult<Value> {
    let new_name = bucket_name_input(&input)?;
    let buckets = ctx.entity_client_for_user(BUCKET_KIND)?;

    let clash = buckets
        .filter(&json!({ "spec": { "name": new_name } }))
        .await
        .map_err(|e| e.with_context("Unable to change the bucket name"))?;
    if !clash.results.is_empty() {
        return Err(DskError::invocation("Bucket with new name already exists", 409));
    }

    let mut spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    spec.name = new_name.to_string();
    buckets
        .update(&bucket.metadata, to_doc(&spec)?)
        .await
        .map_err(|e| e.with_context("Unable to change the bucket name"))?;

    let objects = ctx.entity_client_for_user(OBJECT_KIND)?;
    let linked: BTreeSet<_> = spec.objects.iter().map(|o| o.reference.uuid).collect();
    for uuid in linked {
        let object = objects
            .get(&EntityReference::new(uuid, OBJECT_KIND))
            .await
            .map_err(|e| e.with_context("Unable to change the bucket name"))?;
        let mut ospec: ObjectSpec = from_doc("object spec", &object.spec)?;
        for r in ospec
            .references
            .iter_mut()
            .filter(|r| r.bucket_reference.uuid == bucket.metadata.uuid)
        {
            r.bucket_name = new_name.to_string();
        }
        objects
            .update(&object.metadata, to_doc(&ospec)?)
            .await
            .map_err(|e| e.with_context("Unable to change the bucket name"))?;
    }

    info!(uuid = %bucket.metadata.uuid, new_name, "bucket/renamed");
    to_doc(&bucket.reference())
}

/// Create an empty object and list it in the bucket under `input`.
pub async fn create_object(ctx: ProceduralCtx, bucket: Entity, input: Value) -> DskResult<Value> {
    let object_name = input
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DskError::invocation("object name must be a non-empty string", 400))?;
    let mut spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    if spec.has_object(object_name) {
        return Err(DskError::invocation("Object already exists in the bucket", 409));
    }

    let ospec = ObjectSpec {
        content: String::new(),
        references: vec![BucketLink {
            bucket_name: spec.name.clone(),
            object_name: object_name.to_string(),
            bucket_reference: bucket.reference(),
        }],
    };
    let created = ctx
        .entity_client_for_user(OBJECT_KIND)?
        .create(to_doc(&ospec)?, Some(owner_extension()))
        .await
        .map_err(|e| e.with_context("Unable to create object entity"))?;

    spec.objects.push(ObjectLink {
        name: object_name.to_string(),
        reference: created.reference(),
    });
    ctx.entity_client_for_user(BUCKET_KIND)?
        .update(&bucket.metadata, to_doc(&spec)?)
        .await
        .map_err(|e| e.with_context("Unable to create object entity"))?;

    info!(bucket = %spec.name, object = object_name, uuid = %created.metadata.uuid, "bucket/object created");
    to_doc(&created.reference())
}

/// List an existing object in the bucket and record the back-reference on
/// the object.
///
/// The object is written first and its back-reference is only added once,
/// so a call that failed between the two writes converges when retried.
pub async fn link_object(ctx: ProceduralCtx, bucket: Entity, input: Value) -> DskResult<Value> {
    let handle: ObjectHandle = from_doc("link_object input", &input)?;
    let mut spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    if spec.has_object(&handle.object_name) {
        return Err(DskError::invocation("Object already exists in the bucket", 409));
    }

    let objects = ctx.entity_client_for_user(OBJECT_KIND)?;
    let object_ref = EntityReference::new(handle.object_uuid, OBJECT_KIND);
    let object = objects.get(&object_ref).await.map_err(|e| match e {
        DskError::NotFound(_) => DskError::invocation("Object not found", 404),
        other => other.with_context("Unable to link object entity"),
    })?;

    let mut ospec: ObjectSpec = from_doc("object spec", &object.spec)?;
    let already_linked = ospec.references.iter().any(|r| {
        r.object_name == handle.object_name && r.bucket_reference.uuid == bucket.metadata.uuid
    });
    if !already_linked {
        ospec.references.push(BucketLink {
            bucket_name: spec.name.clone(),
            object_name: handle.object_name.clone(),
            bucket_reference: bucket.reference(),
        });
        objects
            .update(&object.metadata, to_doc(&ospec)?)
            .await
            .map_err(|e| e.with_context("Unable to link object entity"))?;
    }

    spec.objects.push(ObjectLink {
        name: handle.object_name.clone(),
        reference: object_ref.clone(),
    });
    let listed = ctx
        .entity_client_for_user(BUCKET_KIND)?
        .update(&bucket.metadata, to_doc(&spec)?)
        .await;
    if let Err(e) = listed {
        warn!(
            bucket = %bucket.metadata.uuid,
            object = %object_ref.uuid,
            error = %e,
            "bucket/link left a back-reference without a bucket entry"
        );
        return Err(e.with_context("Unable to link object entity"));
    }

    info!(bucket = %spec.name, object = %handle.object_name, "bucket/object linked");
    to_doc(&object_ref)
}

/// Drop the object from the bucket. When no bucket references the object
/// any more, the object entity is deleted.
pub async fn unlink_object(ctx: ProceduralCtx, bucket: Entity, input: Value) -> DskResult<Value> {
    let handle: ObjectHandle = from_doc("unlink_object input", &input)?;
    let mut spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    if !spec.has_object(&handle.object_name) {
        return Err(DskError::invocation("Object not found in the bucket", 404));
    }

    spec.objects.retain(|o| o.name != handle.object_name);
    ctx.entity_client_for_user(BUCKET_KIND)?
        .update(&bucket.metadata, to_doc(&spec)?)
        .await
        .map_err(|e| e.with_context("Unable to unlink object entity"))?;

    let objects = ctx.entity_client_for_user(OBJECT_KIND)?;
    let object_ref = EntityReference::new(handle.object_uuid, OBJECT_KIND);
    let object = objects
        .get(&object_ref)
        .await
        .map_err(|e| e.with_context("Unable to unlink object entity"))?;
    let mut ospec: ObjectSpec = from_doc("object spec", &object.spec)?;
    ospec.references.retain(|r| {
        !(r.object_name == handle.object_name && r.bucket_reference.uuid == bucket.metadata.uuid)
    });

    if ospec.references.is_empty() {
        objects
            .delete(&object_ref)
            .await
            .map_err(|e| e.with_context("Unable to unlink object entity"))?;
        info!(uuid = %object_ref.uuid, "bucket/object deleted at zero references");
        return Ok(json!({ "object": object_ref, "deleted": true }));
    }

    objects
        .update(&object.metadata, to_doc(&ospec)?)
        .await
        .map_err(|e| e.with_context("Unable to unlink object entity"))?;
    Ok(json!({ "object": object_ref, "deleted": false }))
}

// ---------------------------------------------------------------------------
// Constructor and diff handlers
// ---------------------------------------------------------------------------

pub async fn bucket_constructor(_ctx: ProceduralCtx, bucket: Entity) -> DskResult<Status> {
    let spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    to_doc(&BucketStatus {
        name: spec.name,
        objects: spec.objects,
    })
}

/// `name`: status mirrors the spec's name.
pub async fn on_bucket_name(ctx: ProceduralCtx, bucket: Entity, diff: Diff) -> DskResult<Value> {
    let spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    let mut status: BucketStatus = status_or_default(&bucket.status);
    debug!(uuid = %bucket.metadata.uuid, entries = diff.len(), "bucket/name diff");
    status.name = spec.name;
    ctx.update_status(&bucket.reference(), &to_doc(&status)?).await?;
    Ok(Value::Null)
}

/// `objects`: one diff entry per added or removed element. The whole list
/// is copied from spec, so redelivery is harmless.
pub async fn on_bucket_objects(ctx: ProceduralCtx, bucket: Entity, diff: Diff) -> DskResult<Value> {
    let spec: BucketSpec = from_doc("bucket spec", &bucket.spec)?;
    let mut status: BucketStatus = status_or_default(&bucket.status);
    let added = diff.iter().filter(|d| d.is_addition()).count();
    let removed = diff.iter().filter(|d| d.is_removal()).count();
    debug!(uuid = %bucket.metadata.uuid, added, removed, "bucket/objects diff");
    status.objects = spec.objects;
    ctx.update_status(&bucket.reference(), &to_doc(&status)?).await?;
    Ok(Value::Null)
}
