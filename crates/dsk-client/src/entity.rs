//! Entity Client: CRUD, filter and procedure calls against one kind's
//! collection at `{engine}/services/{prefix}/{version}/{kind}`.
//!
//! Stateless apart from the HTTP session. Concurrent `update()` calls on
//! one entity are not coordinated here; the engine's `spec_version` check
//! is the only serialization point, and a stale version comes back as
//! [`DskError::Conflict`].

use std::time::Duration;

use dsk_schemas::{
    DskError, DskResult, Entity, EntityCreateOrUpdateResult, EntityReference, FilterResult,
    Metadata, Spec,
};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::http::EngineHttp;

/// Page size for filter iteration.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Per-client transport knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

pub(crate) fn services_url(engine_url: &str, prefix: &str, version: &str) -> String {
    format!(
        "{}/services/{}/{}",
        engine_url.trim_end_matches('/'),
        prefix,
        version
    )
}

#[derive(Debug, Clone)]
pub struct EntityClient {
    http: EngineHttp,
    base_url: String,
    kind: String,
    batch_size: usize,
}

impl EntityClient {
    pub fn new(
        engine_url: &str,
        prefix: &str,
        version: &str,
        kind: &str,
        token: Option<String>,
    ) -> DskResult<Self> {
        Self::with_options(engine_url, prefix, version, kind, token, ClientOptions::default())
    }

    pub fn with_options(
        engine_url: &str,
        prefix: &str,
        version: &str,
        kind: &str,
        token: Option<String>,
        opts: ClientOptions,
    ) -> DskResult<Self> {
        let http = EngineHttp::new(token, opts.timeout)?;
        Ok(Self::from_parts(
            http,
            format!("{}/{}", services_url(engine_url, prefix, version), kind),
            kind,
            opts.batch_size,
        ))
    }

    pub(crate) fn from_parts(http: EngineHttp, base_url: String, kind: &str, batch: usize) -> Self {
        Self {
            http,
            base_url,
            kind: kind.to_string(),
            batch_size: batch.max(1),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn url(&self, tail: &str) -> String {
        if tail.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, tail)
        }
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Create an entity; the engine assigns the uuid.
    pub async fn create(
        &self,
        spec: Spec,
        metadata_extension: Option<Value>,
    ) -> DskResult<EntityCreateOrUpdateResult> {
        let mut body = json!({ "spec": spec });
        if let Some(ext) = metadata_extension {
            body["metadata"] = json!({ "extension": ext });
        }
        let res: EntityCreateOrUpdateResult = self
            .http
            .json(Method::POST, &self.base_url, Some(&body))
            .await?;
        info!(kind = %self.kind, uuid = %res.metadata.uuid, "entity/create");
        Ok(res)
    }

    /// Create with caller-chosen metadata (uuid included).
    pub async fn create_with_metadata(
        &self,
        metadata: &Metadata,
        spec: Spec,
    ) -> DskResult<EntityCreateOrUpdateResult> {
        let body = json!({ "metadata": metadata, "spec": spec });
        let res: EntityCreateOrUpdateResult = self
            .http
            .json(Method::POST, &self.base_url, Some(&body))
            .await?;
        info!(kind = %self.kind, uuid = %res.metadata.uuid, "entity/create");
        Ok(res)
    }

    pub async fn get(&self, entity: &EntityReference) -> DskResult<Entity> {
        self.http
            .json::<(), _>(Method::GET, &self.url(&entity.uuid.to_string()), None)
            .await
    }

    /// Unfiltered listing in server order. Unbounded; prefer
    /// [`filter_iter`](Self::filter_iter) for large collections.
    pub async fn get_all(&self) -> DskResult<Vec<Entity>> {
        let res: FilterResult = self
            .http
            .json::<(), _>(Method::GET, &self.base_url, None)
            .await?;
        Ok(res.results)
    }

    /// Replace the spec. `metadata.spec_version` must be the version last
    /// read; the engine answers a stale one with `Conflict`.
    pub async fn update(
        &self,
        metadata: &Metadata,
        spec: Spec,
    ) -> DskResult<EntityCreateOrUpdateResult> {
        let body = json!({
            "metadata": { "spec_version": metadata.spec_version },
            "spec": spec,
        });
        let res: EntityCreateOrUpdateResult = self
            .http
            .json(Method::PUT, &self.url(&metadata.uuid.to_string()), Some(&body))
            .await?;
        info!(
            kind = %self.kind,
            uuid = %metadata.uuid,
            spec_version = metadata.spec_version,
            watcher = ?res.intent_watcher.as_ref().map(|w| w.uuid),
            "entity/update"
        );
        Ok(res)
    }

    /// Not idempotent: a second delete of the same uuid fails with `NotFound`.
    pub async fn delete(&self, entity: &EntityReference) -> DskResult<()> {
        self.http
            .empty::<()>(Method::DELETE, &self.url(&entity.uuid.to_string()), None)
            .await?;
        info!(kind = %self.kind, uuid = %entity.uuid, "entity/delete");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Filter
    // -----------------------------------------------------------------------

    /// Partial-match query over `spec`, `status` and `metadata`. An empty
    /// object matches everything.
    pub async fn filter(&self, predicate: &Value) -> DskResult<FilterResult> {
        self.http
            .json(Method::POST, &self.url("filter"), Some(predicate))
            .await
    }

    /// `query` is forwarded verbatim after `filter?`.
    pub async fn filter_with_query(&self, predicate: &Value, query: &str) -> DskResult<FilterResult> {
        let tail = format!("filter?{}", query.trim_start_matches('?'));
        self.http
            .json(Method::POST, &self.url(&tail), Some(predicate))
            .await
    }

    async fn filter_page(
        &self,
        predicate: &Value,
        limit: usize,
        offset: usize,
    ) -> DskResult<Vec<Entity>> {
        let rb = self
            .http
            .request(Method::POST, &self.url("filter"))
            .query(&[("limit", limit), ("offset", offset)])
            .json(predicate);
        let resp = crate::http::check(crate::http::send(rb).await?).await?;
        let page: FilterResult = crate::http::decode(resp).await?;
        debug!(kind = %self.kind, limit, offset, n = page.results.len(), "entity/filter_page");
        Ok(page.results)
    }

    /// One step of the fixed-stride cursor walk: `None` once a page comes
    /// back empty.
    async fn next_page(
        &self,
        predicate: &Value,
        batch: usize,
        offset: usize,
    ) -> DskResult<Option<(Vec<Entity>, usize)>> {
        let page = self.filter_page(predicate, batch, offset).await?;
        if page.is_empty() {
            return Ok(None);
        }
        Ok(Some((page, offset + batch)))
    }

    /// Lazy walk over every match using the configured batch size.
    pub fn filter_iter(&self, predicate: Value) -> BoxStream<'_, DskResult<Entity>> {
        self.filter_iter_with(predicate, self.batch_size, 0)
    }

    pub fn list_iter(&self) -> BoxStream<'_, DskResult<Entity>> {
        self.filter_iter(json!({}))
    }

    /// Sequential `limit`/`offset` cursor walk.
    ///
    /// The offset advances by `batch_size` per request, whatever the page
    /// length. A page shorter than `batch_size` does not end the walk; only
    /// a page with zero results does, and nothing is requested after it. The first
    /// error ends the stream. Each call starts its own cursor; entities
    /// added or removed mid-walk may be skipped or seen twice.
    pub fn filter_iter_with(
        &self,
        predicate: Value,
        batch_size: usize,
        offset: usize,
    ) -> BoxStream<'_, DskResult<Entity>> {
        let batch = batch_size.max(1);
        stream::try_unfold(offset, move |offset| {
            let predicate = predicate.clone();
            async move { self.next_page(&predicate, batch, offset).await }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Entity, DskError>)))
        .try_flatten()
        .boxed()
    }

    // -----------------------------------------------------------------------
    // Procedures
    // -----------------------------------------------------------------------

    /// Entity-scoped procedure.
    pub async fn invoke_procedure(
        &self,
        name: &str,
        entity: &EntityReference,
        input: Value,
    ) -> DskResult<Value> {
        let tail = format!("{}/procedure/{}", entity.uuid, name);
        debug!(kind = %self.kind, uuid = %entity.uuid, procedure = name, "entity/invoke");
        self.http
            .json(Method::POST, &self.url(&tail), Some(&json!({ "input": input })))
            .await
    }

    /// Kind-scoped procedure (no entity).
    pub async fn invoke_kind_procedure(&self, name: &str, input: Value) -> DskResult<Value> {
        let tail = format!("procedure/{name}");
        debug!(kind = %self.kind, procedure = name, "kind/invoke");
        self.http
            .json(Method::POST, &self.url(&tail), Some(&json!({ "input": input })))
            .await
    }
}

// ---------------------------------------------------------------------------
// ImmutableEntity
// ---------------------------------------------------------------------------

/// A fetched entity bound to the client that fetched it.
///
/// The snapshot is never mutated in place; [`refresh`](Self::refresh) and
/// [`update`](Self::update) return a new value.
#[derive(Debug, Clone)]
pub struct ImmutableEntity<'c> {
    client: &'c EntityClient,
    entity: Entity,
}

impl<'c> ImmutableEntity<'c> {
    pub async fn fetch(client: &'c EntityClient, entity: &EntityReference) -> DskResult<Self> {
        let entity = client.get(entity).await?;
        Ok(Self { client, entity })
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn reference(&self) -> EntityReference {
        self.entity.reference()
    }

    pub fn into_entity(self) -> Entity {
        self.entity
    }

    pub async fn refresh(&self) -> DskResult<Self> {
        Self::fetch(self.client, &self.reference()).await
    }

    /// Update using this snapshot's `spec_version`, then re-read.
    pub async fn update(&self, spec: Spec) -> DskResult<Self> {
        self.client.update(&self.entity.metadata, spec).await?;
        self.refresh().await
    }

    pub async fn delete(self) -> DskResult<()> {
        self.client.delete(&self.entity.reference()).await
    }

    pub async fn invoke(&self, name: &str, input: Value) -> DskResult<Value> {
        self.client
            .invoke_procedure(name, &self.reference(), input)
            .await
    }
}
