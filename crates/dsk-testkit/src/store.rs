//! In-memory state behind the fake engine. Plain data; no IO.

use std::collections::VecDeque;

use chrono::Utc;
use dsk_schemas::{
    DiffField, Diff, DskError, DskResult, Entity, EntityReference, FieldPath, IntentWatcher,
    IntentfulStatus, Kind, PathSegment,
};
use serde_json::Value;
use uuid::Uuid;

/// One `POST /provider/` as the engine received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub descriptor: Value,
    /// Raw `Authorization` header, if any.
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredEntity {
    pub(crate) prefix: String,
    pub(crate) version: String,
    pub(crate) entity: Entity,
}

#[derive(Debug, Clone)]
struct WatcherRecord {
    watcher: IntentWatcher,
    /// Statuses handed out by successive reads; the last one sticks.
    script: VecDeque<IntentfulStatus>,
}

#[derive(Debug)]
pub(crate) struct EngineStore {
    registrations: Vec<Registration>,
    entities: Vec<StoredEntity>,
    watchers: Vec<WatcherRecord>,
    status_updates: Vec<(EntityReference, Value)>,
    pub(crate) allow_permissions: bool,
}

impl Default for EngineStore {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
            entities: Vec::new(),
            watchers: Vec::new(),
            status_updates: Vec::new(),
            allow_permissions: true,
        }
    }
}

impl EngineStore {
    // -----------------------------------------------------------------------
    // Providers
    // -----------------------------------------------------------------------

    pub(crate) fn register(&mut self, reg: Registration) {
        self.registrations.push(reg);
    }

    pub(crate) fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Latest descriptor posted for `prefix`/`version`.
    fn descriptor(&self, prefix: &str, version: &str) -> Option<&Value> {
        self.registrations
            .iter()
            .rev()
            .map(|r| &r.descriptor)
            .find(|d| d["prefix"] == prefix && d["version"] == version)
    }

    pub(crate) fn kind(&self, prefix: &str, version: &str, kind: &str) -> Option<Kind> {
        let kinds = self.descriptor(prefix, version)?.get("kinds")?.as_array()?;
        kinds
            .iter()
            .find(|k| k["name"] == kind)
            .and_then(|k| serde_json::from_value(k.clone()).ok())
    }

    pub(crate) fn provider_procedure_callback(
        &self,
        prefix: &str,
        version: &str,
        name: &str,
    ) -> Option<String> {
        self.descriptor(prefix, version)?
            .pointer(&format!("/procedures/{name}/procedure_callback"))?
            .as_str()
            .map(str::to_string)
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub(crate) fn insert(&mut self, prefix: &str, version: &str, entity: Entity) -> DskResult<()> {
        if self.position(entity.metadata.uuid).is_some() {
            return Err(DskError::Conflict(format!(
                "Entity with uuid {} already exists",
                entity.metadata.uuid
            )));
        }
        self.entities.push(StoredEntity {
            prefix: prefix.to_string(),
            version: version.to_string(),
            entity,
        });
        Ok(())
    }

    fn position(&self, uuid: Uuid) -> Option<usize> {
        self.entities.iter().position(|s| s.entity.metadata.uuid == uuid)
    }

    pub(crate) fn find(&self, uuid: Uuid) -> Option<&StoredEntity> {
        self.entities.iter().find(|s| s.entity.metadata.uuid == uuid)
    }

    /// Entity in one collection; a uuid stored under another kind is not found.
    pub(crate) fn get(&self, prefix: &str, version: &str, kind: &str, uuid: Uuid) -> DskResult<&Entity> {
        self.entities
            .iter()
            .find(|s| {
                s.prefix == prefix
                    && s.version == version
                    && s.entity.metadata.kind == kind
                    && s.entity.metadata.uuid == uuid
            })
            .map(|s| &s.entity)
            .ok_or_else(|| DskError::NotFound(format!("Entity {kind}/{uuid} not found")))
    }

    pub(crate) fn collection(&self, prefix: &str, version: &str, kind: &str) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|s| s.prefix == prefix && s.version == version && s.entity.metadata.kind == kind)
            .map(|s| s.entity.clone())
            .collect()
    }

    /// Replace the spec if `expected` is the current version. Returns the
    /// stored entity after the bump.
    pub(crate) fn update_spec(
        &mut self,
        prefix: &str,
        version: &str,
        kind: &str,
        uuid: Uuid,
        expected: u64,
        spec: Value,
        mirror_status: bool,
    ) -> DskResult<Entity> {
        let current = self.get(prefix, version, kind, uuid)?.metadata.spec_version;
        if current != expected {
            return Err(DskError::Conflict("Spec version mismatch".into()));
        }
        let idx = self
            .position(uuid)
            .ok_or_else(|| DskError::NotFound(format!("Entity {kind}/{uuid} not found")))?;
        let e = &mut self.entities[idx].entity;
        e.metadata.spec_version += 1;
        if mirror_status {
            e.status = spec.clone();
        }
        e.spec = spec;
        Ok(e.clone())
    }

    pub(crate) fn remove(&mut self, prefix: &str, version: &str, kind: &str, uuid: Uuid) -> DskResult<Entity> {
        self.get(prefix, version, kind, uuid)?;
        let idx = self
            .position(uuid)
            .ok_or_else(|| DskError::NotFound(format!("Entity {kind}/{uuid} not found")))?;
        Ok(self.entities.remove(idx).entity)
    }

    pub(crate) fn set_status(&mut self, entity_ref: &EntityReference, status: Value) -> DskResult<()> {
        let idx = self
            .position(entity_ref.uuid)
            .filter(|i| self.entities[*i].entity.metadata.kind == entity_ref.kind)
            .ok_or_else(|| {
                DskError::NotFound(format!("Entity {}/{} not found", entity_ref.kind, entity_ref.uuid))
            })?;
        self.entities[idx].entity.status = status.clone();
        self.status_updates.push((entity_ref.clone(), status));
        Ok(())
    }

    pub(crate) fn status_updates(&self) -> &[(EntityReference, Value)] {
        &self.status_updates
    }

    pub(crate) fn all_uuids(&self) -> Vec<Uuid> {
        self.entities.iter().map(|s| s.entity.metadata.uuid).collect()
    }

    // -----------------------------------------------------------------------
    // Watchers
    // -----------------------------------------------------------------------

    pub(crate) fn new_watcher(&mut self, entity_ref: EntityReference, spec_version: u64) -> IntentWatcher {
        let watcher = IntentWatcher {
            uuid: Uuid::new_v4(),
            entity_ref,
            spec_version,
            status: IntentfulStatus::Pending,
            created_at: Some(Utc::now()),
        };
        self.watchers.push(WatcherRecord {
            watcher: watcher.clone(),
            script: VecDeque::new(),
        });
        watcher
    }

    pub(crate) fn script_watcher(&mut self, uuid: Uuid, statuses: Vec<IntentfulStatus>) -> bool {
        match self.watchers.iter_mut().find(|w| w.watcher.uuid == uuid) {
            Some(w) => {
                w.script = statuses.into();
                true
            }
            None => false,
        }
    }

    /// A read of the watcher: advances its script by one step.
    pub(crate) fn observe_watcher(&mut self, uuid: Uuid) -> Option<IntentWatcher> {
        let rec = self.watchers.iter_mut().find(|w| w.watcher.uuid == uuid)?;
        if let Some(next) = rec.script.pop_front() {
            rec.watcher.status = next;
        }
        Some(rec.watcher.clone())
    }

    pub(crate) fn watcher(&self, uuid: Uuid) -> Option<IntentWatcher> {
        self.watchers
            .iter()
            .find(|w| w.watcher.uuid == uuid)
            .map(|w| w.watcher.clone())
    }

    pub(crate) fn watchers_matching(&self, predicate: &Value) -> Vec<IntentWatcher> {
        self.watchers
            .iter()
            .map(|w| &w.watcher)
            .filter(|w| {
                serde_json::to_value(w)
                    .map(|v| partial_match(&v, predicate))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Move every unsettled, unscripted watcher of `entity` to `status`.
    pub(crate) fn settle_watchers(&mut self, entity: Uuid, status: IntentfulStatus) {
        for w in self
            .watchers
            .iter_mut()
            .filter(|w| w.watcher.entity_ref.uuid == entity && w.script.is_empty())
            .filter(|w| !w.watcher.status.is_terminal())
        {
            w.watcher.status = status;
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Every key in `wanted` is present in `actual` with a matching value.
/// Objects match recursively; anything else must be equal.
pub(crate) fn partial_match(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Object(a), Value::Object(w)) => w
            .iter()
            .all(|(k, wv)| a.get(k).is_some_and(|av| partial_match(av, wv))),
        (a, w) => a == w,
    }
}

/// Filter body `{spec?, status?, metadata?}` against one entity.
pub(crate) fn entity_matches(entity: &Entity, predicate: &Value) -> bool {
    let Some(pred) = predicate.as_object() else {
        return false;
    };
    let metadata = serde_json::to_value(&entity.metadata).unwrap_or(Value::Null);
    pred.iter().all(|(section, wanted)| match section.as_str() {
        "spec" => partial_match(&entity.spec, wanted),
        "status" => partial_match(&entity.status, wanted),
        "metadata" => partial_match(&metadata, wanted),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Top-level spec/status comparison.
///
/// A changed scalar or object field yields one entry at `[key]`. For a list
/// field each element missing from status is an addition at `[key, i]` (spec
/// index) and each element missing from spec is a removal at `[key, j]`
/// (status index). Keys present only in status are ignored.
pub fn naive_diff(spec: &Value, status: &Value) -> Diff {
    let Some(spec_fields) = spec.as_object() else {
        return Vec::new();
    };
    let mut diff = Vec::new();
    for (key, s) in spec_fields {
        let st = status.get(key).unwrap_or(&Value::Null);
        if s == st {
            continue;
        }
        match (s, st) {
            (Value::Array(want), Value::Array(have)) => {
                for (i, el) in want.iter().enumerate().filter(|(_, el)| !have.contains(el)) {
                    diff.push(element(key, i, el.clone(), Value::Null));
                }
                for (j, el) in have.iter().enumerate().filter(|(_, el)| !want.contains(el)) {
                    diff.push(element(key, j, Value::Null, el.clone()));
                }
            }
            _ => diff.push(DiffField::new(FieldPath::parse(key), s.clone(), st.clone())),
        }
    }
    diff
}

fn element(key: &str, idx: usize, spec: Value, status: Value) -> DiffField {
    let mut path = FieldPath::parse(key);
    path.push(PathSegment::Index(idx));
    DiffField::new(path, spec, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_match_recurses_into_objects_only() {
        let actual = json!({"name": "b1", "objects": [1, 2], "meta": {"a": 1, "b": 2}});
        assert!(partial_match(&actual, &json!({})));
        assert!(partial_match(&actual, &json!({"meta": {"a": 1}})));
        assert!(!partial_match(&actual, &json!({"objects": [1]})));
        assert!(!partial_match(&actual, &json!({"missing": null})));
    }

    #[test]
    fn diff_emits_one_entry_per_list_element() {
        let spec = json!({"name": "b1", "objects": [{"name": "o1"}, {"name": "o2"}]});
        let status = json!({"name": "b1", "objects": [{"name": "o0"}, {"name": "o1"}]});
        let diff = naive_diff(&spec, &status);
        let paths: Vec<String> = diff.iter().map(|d| d.path.to_string()).collect();
        assert_eq!(paths, vec!["objects.1", "objects.0"]);
        assert!(diff[0].is_addition());
        assert!(diff[1].is_removal());
    }

    #[test]
    fn diff_of_converged_entity_is_empty() {
        let doc = json!({"name": "b1", "objects": []});
        assert!(naive_diff(&doc, &doc).is_empty());
        let d = naive_diff(&json!({"name": "b2"}), &json!({"name": "b1"}));
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].path, FieldPath::parse("name"));
        assert_eq!(d[0].spec, json!("b2"));
    }

    #[test]
    fn watcher_script_advances_then_sticks() {
        let mut store = EngineStore::default();
        let w = store.new_watcher(EntityReference::new(Uuid::nil(), "bucket"), 2);
        assert!(store.script_watcher(
            w.uuid,
            vec![IntentfulStatus::InProgress, IntentfulStatus::CompletedSuccessfully]
        ));
        let seen: Vec<_> = (0..3)
            .filter_map(|_| store.observe_watcher(w.uuid))
            .map(|w| w.status)
            .collect();
        assert_eq!(
            seen,
            vec![
                IntentfulStatus::InProgress,
                IntentfulStatus::CompletedSuccessfully,
                IntentfulStatus::CompletedSuccessfully
            ]
        );
    }
}
