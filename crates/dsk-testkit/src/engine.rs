use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use dsk_schemas::{
    Diff, Entity, EntityReference, FieldPath, IntentWatcher, IntentfulBehaviour, IntentfulSignature,
    IntentfulStatus,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::routes::{build_router, call_provider, EngineShared};
use crate::store::{naive_diff, EngineStore, Registration};

/// What one [`FakeEngine::reconcile`] pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub entity: EntityReference,
    pub diff: Diff,
    /// Field-path signatures whose callbacks were invoked, in order.
    pub invoked: Vec<String>,
    /// `(signature, status code, error body)` of callbacks that failed.
    pub failures: Vec<(String, u16, Value)>,
}

impl ReconcileReport {
    pub fn converged(&self) -> bool {
        self.diff.is_empty()
    }
}

/// In-process engine bound to an ephemeral localhost port.
///
/// Stops serving when dropped.
pub struct FakeEngine {
    addr: SocketAddr,
    shared: Arc<EngineShared>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind fake engine")?;
        let addr = listener.local_addr().context("fake engine local addr")?;
        let shared = Arc::new(EngineShared {
            store: RwLock::new(EngineStore::default()),
            http: reqwest::Client::new(),
        });
        let shutdown = CancellationToken::new();
        let app = build_router(Arc::clone(&shared));
        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await;
            if let Err(e) = served {
                warn!(error = %e, "fake engine stopped");
            }
        });
        info!("fake engine listening on http://{}", addr);
        Ok(Self {
            addr,
            shared,
            shutdown,
            task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub async fn registrations(&self) -> Vec<Registration> {
        self.shared.store.read().await.registrations().to_vec()
    }

    pub async fn entity(&self, uuid: Uuid) -> Option<Entity> {
        self.shared
            .store
            .read()
            .await
            .find(uuid)
            .map(|s| s.entity.clone())
    }

    pub async fn entities(&self, prefix: &str, version: &str, kind: &str) -> Vec<Entity> {
        self.shared.store.read().await.collection(prefix, version, kind)
    }

    /// Every `update_status` the engine accepted, oldest first.
    pub async fn status_updates(&self) -> Vec<(EntityReference, Value)> {
        self.shared.store.read().await.status_updates().to_vec()
    }

    pub async fn watcher(&self, uuid: Uuid) -> Option<IntentWatcher> {
        self.shared.store.read().await.watcher(uuid)
    }

    // -----------------------------------------------------------------------
    // Scripting
    // -----------------------------------------------------------------------

    /// Create a watcher for `entity` outside of any spec update.
    pub async fn insert_watcher(&self, entity: EntityReference, spec_version: u64) -> IntentWatcher {
        self.shared.store.write().await.new_watcher(entity, spec_version)
    }

    /// Statuses returned by the next reads of watcher `uuid`, in order. The
    /// last one is returned for every read after that.
    pub async fn script_watcher(&self, uuid: Uuid, statuses: Vec<IntentfulStatus>) -> Result<()> {
        if self.shared.store.write().await.script_watcher(uuid, statuses) {
            Ok(())
        } else {
            Err(anyhow!("no intent watcher {uuid}"))
        }
    }

    /// Overwrite an entity's status as if a provider had written it. Shows
    /// up in [`status_updates`](Self::status_updates) like any other write.
    pub async fn force_status(&self, entity: &EntityReference, status: Value) -> Result<()> {
        self.shared
            .store
            .write()
            .await
            .set_status(entity, status)
            .map_err(|e| anyhow!("{e}"))
    }

    /// Answer for every later `check_permission` call that carries a token.
    pub async fn allow_permissions(&self, allow: bool) {
        self.shared.store.write().await.allow_permissions = allow;
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Diff one entity and deliver the diff to each registered handler whose
    /// field path covers at least one entry. The entity is re-read and
    /// re-diffed before every handler, so a handler sees the status left by
    /// the one before it. Pending watchers for the entity settle to
    /// `Completed Successfully`, or `Failed` if any handler failed.
    pub async fn reconcile(&self, uuid: Uuid) -> Result<ReconcileReport> {
        let (entity, signatures) = self.snapshot(uuid).await?;
        let mut report = ReconcileReport {
            entity: entity.reference(),
            diff: naive_diff(&entity.spec, &entity.status),
            invoked: Vec::new(),
            failures: Vec::new(),
        };

        for sig in &signatures {
            let Some(current) = self.entity(uuid).await else {
                break;
            };
            let diff = naive_diff(&current.spec, &current.status);
            let pattern = FieldPath::parse(&sig.signature);
            if !diff.iter().any(|d| d.path.starts_with(&pattern)) {
                continue;
            }
            let payload = json!({
                "metadata": current.metadata,
                "spec": current.spec,
                "status": current.status,
                "input": diff,
            });
            report.invoked.push(sig.signature.clone());
            match call_provider(&self.shared.http, &sig.procedure_callback, None, &payload).await {
                Ok(ans) if ans.is_success() => {}
                Ok(ans) => report
                    .failures
                    .push((sig.signature.clone(), ans.status.as_u16(), ans.body)),
                Err(e) => report
                    .failures
                    .push((sig.signature.clone(), 502, json!({ "error": e.to_string() }))),
            }
        }

        let settled = if report.failures.is_empty() {
            IntentfulStatus::CompletedSuccessfully
        } else {
            IntentfulStatus::Failed
        };
        self.shared.store.write().await.settle_watchers(uuid, settled);
        info!(
            uuid = %uuid,
            diff = report.diff.len(),
            invoked = report.invoked.len(),
            failures = report.failures.len(),
            "fake-engine/reconcile"
        );
        Ok(report)
    }

    async fn snapshot(&self, uuid: Uuid) -> Result<(Entity, Vec<IntentfulSignature>)> {
        let store = self.shared.store.read().await;
        let stored = store.find(uuid).ok_or_else(|| anyhow!("no entity {uuid}"))?;
        let kind = store
            .kind(&stored.prefix, &stored.version, &stored.entity.metadata.kind)
            .ok_or_else(|| anyhow!("kind {} is not registered", stored.entity.metadata.kind))?;
        Ok((stored.entity.clone(), kind.intentful_signatures))
    }

    /// One reconcile pass over every stored entity whose kind is registered
    /// as `differ`.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>> {
        let uuids = {
            let store = self.shared.store.read().await;
            store
                .all_uuids()
                .into_iter()
                .filter(|u| {
                    store.find(*u).is_some_and(|s| {
                        store
                            .kind(&s.prefix, &s.version, &s.entity.metadata.kind)
                            .is_some_and(|k| k.intentful_behaviour == IntentfulBehaviour::Differ)
                    })
                })
                .collect::<Vec<_>>()
        };
        let mut reports = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            reports.push(self.reconcile(uuid).await?);
        }
        Ok(reports)
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine").field("addr", &self.addr).finish()
    }
}
