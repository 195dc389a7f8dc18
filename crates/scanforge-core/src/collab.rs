//! Traits for external collaborators.
//!
//! The orchestration core never depends on how the build/scan executable,
//! the enrichment service or the AI triage backend actually work; each is a
//! narrow async interface implemented by an adapter and faked in tests.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::params::ResolvedParams;
use crate::{Result, ResourceId};

/// Identity of the project/version a run targets, as the runner needs it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub pipeline_id: ResourceId,
    pub project_name: String,
    pub project_version: String,
}

/// Output of the external build/scan step.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub build_dir: String,
    pub revision: Option<String>,
    pub reports: Vec<String>,
}

/// Output of the upload/ingest step: the findings it created.
#[derive(Debug, Clone)]
pub struct UploadOutput {
    pub finding_ids: Vec<ResourceId>,
}

/// The opaque external build/scan/upload executable.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    /// Run the build/scan step with resolved parameters.
    async fn run_build(&self, ctx: &RunContext, params: &ResolvedParams) -> Result<ScanOutput>;

    /// Upload produced reports, returning the created finding ids.
    async fn upload(&self, ctx: &RunContext, output: &ScanOutput) -> Result<UploadOutput>;

    /// Tear down run-scoped resources (e.g. sandbox containers).
    /// Must tolerate being called for runs that never started anything.
    async fn cleanup(&self, pipeline_id: ResourceId) -> Result<()>;
}

/// Per-finding enrichment work, fanned out after upload.
#[async_trait]
pub trait FindingEnricher: Send + Sync {
    async fn enrich(&self, pipeline_id: ResourceId, finding_id: ResourceId) -> Result<()>;
}

/// Pushes a run's findings to the AI triage backend.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn push(
        &self,
        pipeline_id: ResourceId,
        finding_ids: &[ResourceId],
        filter_snapshot: Option<&serde_json::Value>,
    ) -> Result<()>;
}

/// Best-effort view of live worker load.
///
/// An `Err` means capacity is unknown, which callers must treat as "no
/// capacity check possible", never as "zero capacity".
pub trait WorkerInspector: Send + Sync {
    fn active_counts(&self) -> Result<HashMap<String, usize>>;
}
