//! HTTP clients for the enrichment and AI triage backends.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use scanforge_core::{AiClient, Error, FindingEnricher, ResourceId, Result};

/// Client for the AI triage backend.
pub struct HttpAiClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn push(
        &self,
        pipeline_id: ResourceId,
        finding_ids: &[ResourceId],
        filter_snapshot: Option<&serde_json::Value>,
    ) -> Result<()> {
        let url = format!("{}/api/triage", self.base_url.trim_end_matches('/'));
        info!(pipeline_id = %pipeline_id, findings = finding_ids.len(),
            "Pushing findings to AI triage");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "pipeline_id": pipeline_id,
                "finding_ids": finding_ids,
                "filter": filter_snapshot,
            }))
            .send()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("AI push request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExecutionFailed(format!(
                "AI backend rejected push with {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Client for the per-finding enrichment service.
pub struct HttpEnricher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnricher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FindingEnricher for HttpEnricher {
    async fn enrich(&self, pipeline_id: ResourceId, finding_id: ResourceId) -> Result<()> {
        let url = format!("{}/api/enrich", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "pipeline_id": pipeline_id,
                "finding_id": finding_id,
            }))
            .send()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("enrichment request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::ExecutionFailed(format!(
                "enrichment service rejected finding {}: {}",
                finding_id,
                response.status()
            )));
        }
        Ok(())
    }
}
