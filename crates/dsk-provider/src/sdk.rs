//! Registration Facade.
//!
//! Construction is single-threaded: declare kinds and procedures on a
//! [`ProviderSdk`], then [`register`](ProviderSdk::register). Registration
//! freezes the declarations into an immutable [`ProviderCatalog`] that the
//! dispatcher shares across every inbound call; nothing is global.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::Router;
use dsk_client::{ClientOptions, EngineHttp, Method};
use dsk_config::ProviderSettings;
use dsk_schemas::{
    DskError, DskResult, FieldPath, IntentfulBehaviour, IntentfulSignature, Kind,
    ProceduralExecutionStrategy, ProceduralSignature, PROVIDER_ENTITY_MARKER,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::{HandlerTable, ProviderCatalog, Route, RouteHandler, RouteKind};
use crate::context::ProviderShared;
use crate::dispatch::build_router;
use crate::handler::{EntityHook, EntityProcedureHandler, IntentfulHandler, ProcedureHandler};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

struct Decl<H: ?Sized> {
    argument: Value,
    result: Value,
    strategy: ProceduralExecutionStrategy,
    handler: Arc<H>,
}

impl<H: ?Sized> Clone for Decl<H> {
    fn clone(&self) -> Self {
        Self {
            argument: self.argument.clone(),
            result: self.result.clone(),
            strategy: self.strategy,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: ?Sized> Decl<H> {
    fn signature(&self, name: &str, callback: String, base: &str) -> ProceduralSignature {
        ProceduralSignature {
            name: name.to_string(),
            argument: self.argument.clone(),
            result: self.result.clone(),
            execution_strategy: self.strategy,
            procedure_callback: callback,
            base_callback: base.to_string(),
        }
    }
}

struct KindDecl {
    name: String,
    name_plural: String,
    structure: Value,
    behaviour: IntentfulBehaviour,
    dependency_tree: BTreeMap<String, Vec<String>>,
    kind_procedures: BTreeMap<String, Decl<dyn ProcedureHandler>>,
    entity_procedures: BTreeMap<String, Decl<dyn EntityProcedureHandler>>,
    intentful: Vec<(FieldPath, Arc<dyn IntentfulHandler>)>,
    constructor: Option<Arc<dyn EntityHook>>,
    destructor: Option<Arc<dyn EntityHook>>,
}

impl KindDecl {
    fn new(name: String, structure: Value, behaviour: IntentfulBehaviour) -> Self {
        Self {
            name_plural: format!("{name}s"),
            name,
            structure,
            behaviour,
            dependency_tree: BTreeMap::new(),
            kind_procedures: BTreeMap::new(),
            entity_procedures: BTreeMap::new(),
            intentful: Vec::new(),
            constructor: None,
            destructor: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SecurityConfig {
    oauth2: Value,
    auth_model: String,
    policy: String,
}

// ---------------------------------------------------------------------------
// KindBuilder
// ---------------------------------------------------------------------------

/// Attaches procedures and handlers to one kind.
pub struct KindBuilder<'a> {
    decl: &'a mut KindDecl,
}

impl<'a> KindBuilder<'a> {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn name_plural(&mut self, plural: &str) -> &mut Self {
        self.decl.name_plural = plural.to_string();
        self
    }

    /// Procedure on the kind as a whole (no entity).
    pub fn kind_procedure<H: ProcedureHandler>(
        &mut self,
        name: &str,
        strategy: ProceduralExecutionStrategy,
        argument: Value,
        result: Value,
        handler: H,
    ) -> &mut Self {
        self.decl.kind_procedures.insert(
            name.to_string(),
            Decl {
                argument,
                result,
                strategy,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Procedure invoked on one entity of this kind.
    pub fn entity_procedure<H: EntityProcedureHandler>(
        &mut self,
        name: &str,
        strategy: ProceduralExecutionStrategy,
        argument: Value,
        result: Value,
        handler: H,
    ) -> &mut Self {
        self.decl.entity_procedures.insert(
            name.to_string(),
            Decl {
                argument,
                result,
                strategy,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Diff handler for `field_path` (dotted, e.g. `"objects"`). A second
    /// registration on the same path replaces the first.
    pub fn on<H: IntentfulHandler>(&mut self, field_path: &str, handler: H) -> &mut Self {
        let path = FieldPath::parse(field_path);
        let handler: Arc<dyn IntentfulHandler> = Arc::new(handler);
        match self.decl.intentful.iter_mut().find(|(p, _)| *p == path) {
            Some(slot) => slot.1 = handler,
            None => {
                self.decl
                    .dependency_tree
                    .insert(path.to_string(), Vec::new());
                self.decl.intentful.push((path, handler));
            }
        }
        self
    }

    /// Constructor: returns the initial status of a new entity.
    pub fn on_create<H: EntityHook>(&mut self, handler: H) -> &mut Self {
        self.decl.constructor = Some(Arc::new(handler));
        self
    }

    pub fn on_delete<H: EntityHook>(&mut self, handler: H) -> &mut Self {
        self.decl.destructor = Some(Arc::new(handler));
        self
    }
}

// ---------------------------------------------------------------------------
// ProviderSdk
// ---------------------------------------------------------------------------

pub struct ProviderSdk {
    engine_url: String,
    public_base: String,
    bind_addr: String,
    client_opts: ClientOptions,
    s2s_key: Option<String>,
    prefix: Option<String>,
    version: Option<String>,
    allow_extra_props: bool,
    metadata_extension: Value,
    security: Option<SecurityConfig>,
    kinds: Vec<KindDecl>,
    procedures: BTreeMap<String, Decl<dyn ProcedureHandler>>,
}

impl std::fmt::Debug for ProviderSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSdk")
            .field("engine_url", &self.engine_url)
            .field("public_base", &self.public_base)
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .field("s2s_key", &self.s2s_key.as_ref().map(|_| "<REDACTED>"))
            .field("kinds", &self.kinds.iter().map(|k| &k.name).collect::<Vec<_>>())
            .field("procedures", &self.procedures.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderSdk {
    pub fn new(settings: &ProviderSettings, s2s_key: Option<String>) -> Self {
        Self {
            engine_url: settings.engine_url.trim_end_matches('/').to_string(),
            public_base: settings.public_base_url(),
            bind_addr: settings.effective_bind_addr(),
            client_opts: ClientOptions {
                timeout: settings.request_timeout,
                batch_size: settings.batch_size,
            },
            s2s_key,
            prefix: settings.prefix.clone(),
            version: settings.version.clone(),
            allow_extra_props: settings.allow_extra_props,
            metadata_extension: json!({}),
            security: None,
            kinds: Vec::new(),
            procedures: BTreeMap::new(),
        }
    }

    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn version(&mut self, version: &str) -> &mut Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn metadata_extension(&mut self, schema: Value) -> &mut Self {
        self.metadata_extension = schema;
        self
    }

    pub fn allow_extra_props(&mut self, allow: bool) -> &mut Self {
        self.allow_extra_props = allow;
        self
    }

    pub fn secure_with(&mut self, oauth2: Value, auth_model: &str, policy: &str) -> &mut Self {
        self.security = Some(SecurityConfig {
            oauth2,
            auth_model: auth_model.to_string(),
            policy: policy.to_string(),
        });
        self
    }

    /// Declare a kind from its description.
    ///
    /// The description must be a non-empty object whose every entry carries
    /// the `x-papiea-entity` marker. The first entry (in key order) names
    /// the kind.
    pub fn new_kind(&mut self, description: &Value) -> DskResult<KindBuilder<'_>> {
        let map = description
            .as_object()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                DskError::MalformedDescription("kind description must be a non-empty object".into())
            })?;

        let mut behaviour = None;
        for (type_name, ty) in map {
            let marker = ty.get(PROVIDER_ENTITY_MARKER).ok_or_else(|| {
                DskError::MalformedDescription(format!(
                    "entity type {type_name} is missing {PROVIDER_ENTITY_MARKER}"
                ))
            })?;
            let parsed = marker
                .as_str()
                .and_then(IntentfulBehaviour::parse)
                .ok_or_else(|| {
                    DskError::MalformedDescription(format!(
                        "entity type {type_name} has unknown {PROVIDER_ENTITY_MARKER} value {marker}"
                    ))
                })?;
            behaviour.get_or_insert(parsed);
        }

        let name = map.keys().next().cloned().unwrap_or_default();
        let decl = KindDecl::new(name, description.clone(), behaviour.unwrap_or_default());
        Ok(self.push_kind(decl))
    }

    /// Declare a kind from an existing descriptor. Only the name, plural,
    /// structure, behaviour and dependency tree are taken; procedures must be
    /// attached through the returned builder.
    pub fn add_kind(&mut self, kind: Kind) -> KindBuilder<'_> {
        let mut decl = KindDecl::new(kind.name, kind.kind_structure, kind.intentful_behaviour);
        decl.name_plural = kind.name_plural;
        decl.dependency_tree = kind.dependency_tree;
        self.push_kind(decl)
    }

    fn push_kind(&mut self, decl: KindDecl) -> KindBuilder<'_> {
        self.kinds.retain(|k| k.name != decl.name);
        self.kinds.push(decl);
        let idx = self.kinds.len() - 1;
        KindBuilder {
            decl: &mut self.kinds[idx],
        }
    }

    pub fn remove_kind(&mut self, name: &str) -> bool {
        let before = self.kinds.len();
        self.kinds.retain(|k| k.name != name);
        self.kinds.len() != before
    }

    pub fn provider_procedure<H: ProcedureHandler>(
        &mut self,
        name: &str,
        strategy: ProceduralExecutionStrategy,
        argument: Value,
        result: Value,
        handler: H,
    ) -> &mut Self {
        self.procedures.insert(
            name.to_string(),
            Decl {
                argument,
                result,
                strategy,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Check preconditions and build the immutable catalog without contacting
    /// the engine.
    ///
    /// Fails with `MissingField("prefix")`, `MissingField("version")` or
    /// `MissingField("kind")`, checked in that order.
    pub fn freeze(&self) -> DskResult<Arc<ProviderCatalog>> {
        let prefix = self.prefix.clone().ok_or(DskError::MissingField("prefix"))?;
        let version = self.version.clone().ok_or(DskError::MissingField("version"))?;
        if self.kinds.is_empty() {
            return Err(DskError::MissingField("kind"));
        }
        check_segment("prefix", &prefix)?;
        check_segment("version", &version)?;

        let base_path = format!("/{prefix}/{version}");
        let base_callback = format!("{}{}", self.public_base, base_path);
        let url = |local: &str| format!("{}{}", self.public_base, local);

        let mut routes: Vec<Route> = Vec::new();
        let mut kinds = Vec::with_capacity(self.kinds.len());
        let mut tables = HashMap::new();

        for k in &self.kinds {
            check_segment("kind", &k.name)?;
            let kind_path = format!("{base_path}/{}", k.name);

            let mut kind_procedures = BTreeMap::new();
            for (name, d) in &k.kind_procedures {
                check_procedure_name(name)?;
                let local = format!("{kind_path}/procedure/{name}");
                kind_procedures.insert(name.clone(), d.signature(name, url(&local), &base_callback));
                routes.push(Route {
                    path: local,
                    route_kind: RouteKind::KindProcedure,
                    kind: Some(k.name.clone()),
                    name: name.clone(),
                    handler: RouteHandler::Procedure(Arc::clone(&d.handler)),
                });
            }

            let mut entity_procedures = BTreeMap::new();
            for (name, d) in &k.entity_procedures {
                check_procedure_name(name)?;
                let local = format!("{kind_path}/entity_procedure/{name}");
                entity_procedures
                    .insert(name.clone(), d.signature(name, url(&local), &base_callback));
                routes.push(Route {
                    path: local,
                    route_kind: RouteKind::EntityProcedure,
                    kind: Some(k.name.clone()),
                    name: name.clone(),
                    handler: RouteHandler::Entity(Arc::clone(&d.handler)),
                });
            }

            let mut intentful_signatures = Vec::with_capacity(k.intentful.len());
            for (pattern, handler) in &k.intentful {
                if pattern.is_empty() {
                    return Err(DskError::MalformedDescription(format!(
                        "kind {}: diff handler needs a non-empty field path",
                        k.name
                    )));
                }
                let name = pattern.to_string();
                check_segment("field path", &name)?;
                let local = format!("{kind_path}/intentful/{name}");
                intentful_signatures.push(IntentfulSignature {
                    signature: name.clone(),
                    name: name.clone(),
                    argument: json!({}),
                    result: json!({}),
                    execution_strategy: ProceduralExecutionStrategy::HaltIntentful,
                    procedure_callback: url(&local),
                    base_callback: base_callback.clone(),
                });
                routes.push(Route {
                    path: local,
                    route_kind: RouteKind::Intentful,
                    kind: Some(k.name.clone()),
                    name,
                    handler: RouteHandler::Intentful {
                        pattern: pattern.clone(),
                        handler: Arc::clone(handler),
                    },
                });
            }
            tables.insert(
                k.name.clone(),
                HandlerTable::new(k.intentful.iter().map(|(p, _)| p.clone()).collect()),
            );

            // Lifecycle hooks travel to the engine as reserved kind procedures.
            if let Some(h) = &k.constructor {
                let name = format!("__{}_create", k.name);
                let local = format!("{kind_path}/constructor");
                kind_procedures.insert(name.clone(), hook_signature(&name, url(&local), &base_callback));
                routes.push(Route {
                    path: local,
                    route_kind: RouteKind::Constructor,
                    kind: Some(k.name.clone()),
                    name,
                    handler: RouteHandler::Hook(Arc::clone(h)),
                });
            }
            if let Some(h) = &k.destructor {
                let name = format!("__{}_delete", k.name);
                let local = format!("{kind_path}/destructor");
                kind_procedures.insert(name.clone(), hook_signature(&name, url(&local), &base_callback));
                routes.push(Route {
                    path: local,
                    route_kind: RouteKind::Destructor,
                    kind: Some(k.name.clone()),
                    name,
                    handler: RouteHandler::Hook(Arc::clone(h)),
                });
            }

            kinds.push(Kind {
                name: k.name.clone(),
                name_plural: k.name_plural.clone(),
                kind_structure: k.structure.clone(),
                intentful_behaviour: k.behaviour,
                intentful_signatures,
                dependency_tree: k.dependency_tree.clone(),
                kind_procedures,
                entity_procedures,
            });
        }

        let mut procedures = BTreeMap::new();
        for (name, d) in &self.procedures {
            check_procedure_name(name)?;
            let local = format!("{base_path}/procedure/{name}");
            procedures.insert(name.clone(), d.signature(name, url(&local), &base_callback));
            routes.push(Route {
                path: local,
                route_kind: RouteKind::ProviderProcedure,
                kind: None,
                name: name.clone(),
                handler: RouteHandler::Procedure(Arc::clone(&d.handler)),
            });
        }

        let mut seen = HashSet::new();
        for r in &routes {
            if !seen.insert(r.path.as_str()) {
                return Err(DskError::MalformedDescription(format!(
                    "two callbacks resolve to {}",
                    r.path
                )));
            }
        }

        let descriptor = self.descriptor(&prefix, &version, &kinds, &procedures)?;
        let shared = Arc::new(ProviderShared {
            engine_url: self.engine_url.clone(),
            prefix: prefix.clone(),
            version: version.clone(),
            session: EngineHttp::new(self.s2s_key.clone(), self.client_opts.timeout)?,
            client_opts: self.client_opts,
        });

        Ok(Arc::new(ProviderCatalog {
            prefix,
            version,
            base_callback,
            descriptor,
            kinds,
            procedures,
            routes: routes.into_iter().map(Arc::new).collect(),
            tables,
            shared,
        }))
    }

    fn descriptor(
        &self,
        prefix: &str,
        version: &str,
        kinds: &[Kind],
        procedures: &BTreeMap<String, ProceduralSignature>,
    ) -> DskResult<Value> {
        let mut d = Map::new();
        d.insert("kinds".into(), to_json(kinds)?);
        d.insert("version".into(), json!(version));
        d.insert("prefix".into(), json!(prefix));
        d.insert("procedures".into(), to_json(procedures)?);
        d.insert("extension_structure".into(), self.metadata_extension.clone());
        d.insert("allowExtraProps".into(), json!(self.allow_extra_props));
        if let Some(sec) = &self.security {
            d.insert("policy".into(), json!(sec.policy));
            d.insert("oauth2".into(), sec.oauth2.clone());
            d.insert("authModel".into(), json!(sec.auth_model));
        }
        Ok(Value::Object(d))
    }

    /// Post the descriptor to the engine and return the callback server.
    ///
    /// Not idempotent: each call posts again.
    pub async fn register(&self) -> DskResult<RegisteredProvider> {
        let catalog = self.freeze()?;
        let url = format!("{}/provider/", self.engine_url);
        catalog
            .shared
            .session
            .empty(Method::POST, &url, Some(catalog.descriptor()))
            .await
            .map_err(|e| e.with_context("provider registration failed"))?;
        info!(
            prefix = %catalog.prefix,
            version = %catalog.version,
            kinds = catalog.kinds.len(),
            routes = catalog.routes.len(),
            "provider/registered"
        );
        Ok(RegisteredProvider {
            router: build_router(Arc::clone(&catalog)),
            catalog,
            bind_addr: self.bind_addr.clone(),
        })
    }
}

fn hook_signature(name: &str, callback: String, base: &str) -> ProceduralSignature {
    ProceduralSignature {
        name: name.to_string(),
        argument: json!({}),
        result: json!({}),
        execution_strategy: ProceduralExecutionStrategy::HaltIntentful,
        procedure_callback: callback,
        base_callback: base.to_string(),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(v: &T) -> DskResult<Value> {
    serde_json::to_value(v).map_err(|e| DskError::MalformedDescription(e.to_string()))
}

/// One URL path segment: letters, digits, `_`, `-`, `.`.
fn check_segment(what: &str, s: &str) -> DskResult<()> {
    let ok = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(DskError::MalformedDescription(format!(
            "{what} {s:?} is not a valid path segment"
        )))
    }
}

/// `__`-prefixed names are reserved for lifecycle hooks.
fn check_procedure_name(name: &str) -> DskResult<()> {
    check_segment("procedure name", name)?;
    if name.starts_with("__") {
        return Err(DskError::MalformedDescription(format!(
            "procedure name {name:?} is reserved"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RegisteredProvider
// ---------------------------------------------------------------------------

/// A registered provider: the frozen catalog plus its callback router.
#[derive(Debug)]
pub struct RegisteredProvider {
    catalog: Arc<ProviderCatalog>,
    router: Router,
    bind_addr: String,
}

impl RegisteredProvider {
    pub fn catalog(&self) -> &Arc<ProviderCatalog> {
        &self.catalog
    }

    /// Bare router (no middleware), for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!("provider callbacks listening on http://{}", addr);
        axum::serve(listener, self.router.layer(TraceLayer::new_for_http())).await
    }

    pub async fn serve_on_bind_addr(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }
}
