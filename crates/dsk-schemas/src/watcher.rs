use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityReference;

/// Convergence state of an intent watcher.
///
/// Terminal states: `CompletedSuccessfully`, `CompletedPartially`, `Failed`,
/// `OutdatedDiff`. `OutdatedDiff` means the spec changed again before the
/// engine finished converging; the watcher is superseded, not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentfulStatus {
    Pending,
    #[serde(rename = "Active", alias = "InProgress")]
    InProgress,
    #[serde(rename = "Completed Successfully", alias = "CompletedSuccessfully")]
    CompletedSuccessfully,
    #[serde(rename = "Completed Partially", alias = "CompletedPartially")]
    CompletedPartially,
    Failed,
    #[serde(rename = "Outdated", alias = "OutdatedDiff")]
    OutdatedDiff,
}

impl IntentfulStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentfulStatus::Pending | IntentfulStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentfulStatus::Pending => "Pending",
            IntentfulStatus::InProgress => "Active",
            IntentfulStatus::CompletedSuccessfully => "Completed Successfully",
            IntentfulStatus::CompletedPartially => "Completed Partially",
            IntentfulStatus::Failed => "Failed",
            IntentfulStatus::OutdatedDiff => "Outdated",
        }
    }
}

/// Server-side convergence task created by a spec update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentWatcher {
    pub uuid: Uuid,
    pub entity_ref: EntityReference,
    #[serde(default)]
    pub spec_version: u64,
    pub status: IntentfulStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
