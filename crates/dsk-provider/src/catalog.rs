//! The frozen provider catalog: descriptor posted to the engine, callback
//! route table, and per-kind diff routing. Built once by
//! [`ProviderSdk::freeze`](crate::ProviderSdk::freeze) and never mutated.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dsk_schemas::{Diff, FieldPath, Kind, ProceduralSignature};
use serde_json::Value;

use crate::context::ProviderShared;
use crate::handler::{EntityHook, EntityProcedureHandler, IntentfulHandler, ProcedureHandler};

// ---------------------------------------------------------------------------
// Diff routing
// ---------------------------------------------------------------------------

/// Field-path patterns registered for one kind.
///
/// A diff entry belongs to the longest pattern that is a prefix of (or
/// equal to) its path. Entries no pattern covers belong to nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerTable {
    patterns: Vec<FieldPath>,
}

impl HandlerTable {
    pub fn new(mut patterns: Vec<FieldPath>) -> Self {
        patterns.sort();
        patterns.dedup();
        Self { patterns }
    }

    pub fn patterns(&self) -> &[FieldPath] {
        &self.patterns
    }

    pub fn resolve(&self, path: &FieldPath) -> Option<&FieldPath> {
        self.patterns
            .iter()
            .filter(|p| path.starts_with(p))
            .max_by_key(|p| p.len())
    }

    /// Keep the entries routed to `pattern`, in their original order.
    pub fn select(&self, pattern: &FieldPath, diff: Diff) -> Diff {
        diff.into_iter()
            .filter(|d| self.resolve(&d.path) == Some(pattern))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// What an inbound callback resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    ProviderProcedure,
    KindProcedure,
    EntityProcedure,
    Intentful,
    Constructor,
    Destructor,
}

pub(crate) enum RouteHandler {
    Procedure(Arc<dyn ProcedureHandler>),
    Entity(Arc<dyn EntityProcedureHandler>),
    Intentful {
        pattern: FieldPath,
        handler: Arc<dyn IntentfulHandler>,
    },
    Hook(Arc<dyn EntityHook>),
}

/// One callback endpoint.
pub struct Route {
    /// Path served locally, e.g. `/store/0.1/bucket/procedure/ensure_bucket_exists`.
    pub path: String,
    pub route_kind: RouteKind,
    /// Owning kind; `None` for provider procedures.
    pub kind: Option<String>,
    pub name: String,
    pub(crate) handler: RouteHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("route_kind", &self.route_kind)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProviderCatalog
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ProviderCatalog {
    pub(crate) prefix: String,
    pub(crate) version: String,
    pub(crate) base_callback: String,
    pub(crate) descriptor: Value,
    pub(crate) kinds: Vec<Kind>,
    pub(crate) procedures: BTreeMap<String, ProceduralSignature>,
    pub(crate) routes: Vec<Arc<Route>>,
    pub(crate) tables: HashMap<String, HandlerTable>,
    pub(crate) shared: Arc<ProviderShared>,
}

impl ProviderCatalog {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `http://{public_host}:{public_port}/{prefix}/{version}`
    pub fn base_callback(&self) -> &str {
        &self.base_callback
    }

    /// Exact JSON posted to `POST {engine}/provider/`.
    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    pub fn kinds(&self) -> &[Kind] {
        &self.kinds
    }

    pub fn kind(&self, name: &str) -> Option<&Kind> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn procedures(&self) -> &BTreeMap<String, ProceduralSignature> {
        &self.procedures
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().map(|r| r.as_ref())
    }

    pub fn handler_table(&self, kind: &str) -> Option<&HandlerTable> {
        self.tables.get(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsk_schemas::DiffField;
    use serde_json::json;

    fn table() -> HandlerTable {
        HandlerTable::new(vec![
            FieldPath::parse("objects"),
            FieldPath::parse("name"),
            FieldPath::parse("objects.meta"),
        ])
    }

    #[test]
    fn longest_prefix_wins() {
        let t = table();
        assert_eq!(
            t.resolve(&FieldPath::parse("objects.meta.owner")),
            Some(&FieldPath::parse("objects.meta"))
        );
        assert_eq!(
            t.resolve(&FieldPath::parse("objects.0")),
            Some(&FieldPath::parse("objects"))
        );
        assert_eq!(t.resolve(&FieldPath::parse("name")), Some(&FieldPath::parse("name")));
        assert_eq!(t.resolve(&FieldPath::parse("names")), None);
    }

    #[test]
    fn select_keeps_order_and_drops_foreign_entries() {
        let t = table();
        let diff = vec![
            DiffField::new(FieldPath::parse("objects.1"), json!({"name": "b"}), Value::Null),
            DiffField::new(FieldPath::parse("name"), json!("b2"), json!("b1")),
            DiffField::new(FieldPath::parse("objects.meta.x"), json!(1), Value::Null),
            DiffField::new(FieldPath::parse("objects.0"), Value::Null, json!({"name": "a"})),
        ];
        let mine = t.select(&FieldPath::parse("objects"), diff);
        let paths: Vec<String> = mine.iter().map(|d| d.path.to_string()).collect();
        assert_eq!(paths, vec!["objects.1", "objects.0"]);
    }
}
