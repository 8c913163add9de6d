//! Declarative descriptions of kinds and procedures, as posted to the
//! engine at registration time. Immutable once registration completes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key every entity type in a kind description must carry.
pub const PROVIDER_ENTITY_MARKER: &str = "x-papiea-entity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProceduralExecutionStrategy {
    #[serde(rename = "Halt_Intentful")]
    HaltIntentful,
}

/// How the engine treats spec changes for a kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentfulBehaviour {
    #[default]
    Basic,
    SpecOnly,
    Differ,
}

impl IntentfulBehaviour {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(Self::Basic),
            "spec-only" => Some(Self::SpecOnly),
            "differ" => Some(Self::Differ),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralSignature {
    pub name: String,
    pub argument: Value,
    pub result: Value,
    pub execution_strategy: ProceduralExecutionStrategy,
    pub procedure_callback: String,
    pub base_callback: String,
}

/// A diff handler declaration: `signature` is the field-path pattern the
/// handler converges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentfulSignature {
    pub signature: String,
    pub name: String,
    pub argument: Value,
    pub result: Value,
    pub execution_strategy: ProceduralExecutionStrategy,
    pub procedure_callback: String,
    pub base_callback: String,
}

/// One kind as posted in the provider descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kind {
    pub name: String,
    pub name_plural: String,
    pub kind_structure: Value,
    pub intentful_behaviour: IntentfulBehaviour,
    #[serde(default)]
    pub intentful_signatures: Vec<IntentfulSignature>,
    #[serde(default)]
    pub dependency_tree: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub kind_procedures: BTreeMap<String, ProceduralSignature>,
    #[serde(default)]
    pub entity_procedures: BTreeMap<String, ProceduralSignature>,
}

/// Authorization action names understood by the engine's permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Update,
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "register_provider")]
    RegisterProvider,
    #[serde(rename = "unregister_provider")]
    UnregisterProvider,
    #[serde(rename = "read_provider")]
    ReadProvider,
    #[serde(rename = "update_auth")]
    UpdateAuth,
    #[serde(rename = "create_key")]
    CreateS2sKey,
    #[serde(rename = "read_key")]
    ReadS2sKey,
    #[serde(rename = "inactive_key")]
    InactivateS2sKey,
    #[serde(rename = "update_status")]
    UpdateStatus,
}

/// Opaque user description returned by `auth/user_info`.
pub type UserInfo = serde_json::Map<String, Value>;

/// Service-to-service key record.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct S2sKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl std::fmt::Debug for S2sKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S2sKey")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("key", &self.key.as_ref().map(|_| "<REDACTED>"))
            .field("active", &self.active)
            .finish()
    }
}
