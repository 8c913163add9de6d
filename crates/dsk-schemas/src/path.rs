//! Field-path addressing inside spec/status documents, and the diff entries
//! the engine computes between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// One step into a JSON document: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => write!(f, "{k}"),
        }
    }
}

/// Ordered list of segments addressing a field, e.g. `references.0.bucket_name`.
///
/// Wire form is a JSON array (`["references", 0, "bucket_name"]`), which is
/// how the engine reports diff paths. The empty path addresses the document
/// root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. All-digit tokens become array indices; empty
    /// tokens are skipped, so `""` and `"."` both parse to the root.
    pub fn parse(dotted: &str) -> Self {
        let segments = dotted
            .split('.')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| match t.parse::<usize>() {
                Ok(i) => PathSegment::Index(i),
                Err(_) => PathSegment::Key(t.to_string()),
            })
            .collect();
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` addresses this path or one of its ancestors.
    /// Segment boundaries are respected: `obj` is not a prefix of `objects`.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn push(&mut self, seg: PathSegment) {
        self.0.push(seg);
    }

    /// Resolve this path inside `doc`. Missing fields and type mismatches
    /// yield `None`.
    pub fn lookup<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut cur = doc;
        for seg in &self.0 {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
            first = false;
        }
        Ok(())
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// One field-level delta between spec and status.
///
/// `spec` / `status` carry the values the engine observed at `path` on each
/// side; for list-valued fields the engine emits one entry per added or
/// removed element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffField {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub keys: Value,
    pub path: FieldPath,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl DiffField {
    pub fn new(path: FieldPath, spec: Value, status: Value) -> Self {
        let key = path
            .segments()
            .last()
            .map(|s| s.to_string())
            .unwrap_or_default();
        Self {
            key,
            keys: Value::Null,
            path,
            spec,
            status,
        }
    }

    /// An element present in spec but absent from status.
    pub fn is_addition(&self) -> bool {
        !self.spec.is_null() && self.status.is_null()
    }

    /// An element present in status but absent from spec.
    pub fn is_removal(&self) -> bool {
        self.spec.is_null() && !self.status.is_null()
    }
}

/// Ordered sequence of deltas for one entity.
pub type Diff = Vec<DiffField>;
