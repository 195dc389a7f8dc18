//! Launch metadata accumulated during a run.
//!
//! Stored as a JSON blob on the pipeline row; typed here so the orchestrator
//! and the API read the same shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::params::ResolvedParams;
use crate::{PipelineStatus, ResourceId};

/// Build/scan output captured after the external runner finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Directory the build/scan step wrote its artifacts to.
    pub build_dir: String,
    /// Source revision the runner actually checked out.
    pub revision: Option<String>,
    /// Report files produced by the analyzers.
    pub reports: Vec<String>,
}

/// Fan-out enrichment progress, persisted at completion (live values come
/// from the in-memory tracker).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnrichmentProgress {
    pub total: u64,
    pub done: u64,
}

/// A one-off post-run action attached to a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneOffAction {
    pub id: String,
    /// Status whose transition fires this action.
    pub trigger_status: PipelineStatus,
    pub action_type: String,
    #[serde(default)]
    pub config: Value,
}

/// Free-form structured metadata accumulated during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ResolvedParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finding_ids: Vec<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentProgress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_off_actions: Vec<OneOffAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_off_actions_done: Vec<String>,
}

impl LaunchData {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Actions triggered by `status` that have not fired yet.
    pub fn pending_actions(&self, status: PipelineStatus) -> Vec<&OneOffAction> {
        self.one_off_actions
            .iter()
            .filter(|a| a.trigger_status == status && !self.one_off_actions_done.contains(&a.id))
            .collect()
    }

    pub fn mark_action_done(&mut self, id: &str) {
        if !self.one_off_actions_done.iter().any(|d| d == id) {
            self.one_off_actions_done.push(id.to_string());
        }
    }
}
