//! Process-based build/scan/upload runner.
//!
//! Invokes an external executable with a JSON parameter blob on stdin and
//! reads a JSON result from stdout. The executable's internals are opaque to
//! the core; only this wire contract matters.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use scanforge_core::{
    Error, ResolvedParams, ResourceId, Result, RunContext, ScanOutput, ScanRunner, UploadOutput,
};

#[derive(Debug, Deserialize)]
struct BuildReply {
    build_dir: String,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    reports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    finding_ids: Vec<ResourceId>,
}

/// Runs the configured scanner executable once per pipeline step.
pub struct ProcessScanRunner {
    command: String,
}

impl ProcessScanRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn invoke(&self, subcommand: &str, input: serde_json::Value) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.command)
            .arg(subcommand)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ExecutionFailed(format!("failed to spawn '{}': {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&input)
                .map_err(|e| Error::Internal(format!("failed to encode runner input: {}", e)))?;
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| Error::ExecutionFailed(format!("failed to write runner input: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("runner did not complete: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExecutionFailed(format!(
                "runner '{} {}' exited with {}: {}",
                self.command, subcommand, output.status, stderr
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ScanRunner for ProcessScanRunner {
    async fn run_build(&self, ctx: &RunContext, params: &ResolvedParams) -> Result<ScanOutput> {
        info!(pipeline_id = %ctx.pipeline_id, project = %ctx.project_name,
            "Invoking external build/scan step");
        let stdout = self
            .invoke(
                "scan",
                json!({
                    "pipeline_id": ctx.pipeline_id,
                    "project": ctx.project_name,
                    "version": ctx.project_version,
                    "params": params,
                }),
            )
            .await?;
        let reply: BuildReply = parse_reply(&stdout)?;
        Ok(ScanOutput {
            build_dir: reply.build_dir,
            revision: reply.revision,
            reports: reply.reports,
        })
    }

    async fn upload(&self, ctx: &RunContext, output: &ScanOutput) -> Result<UploadOutput> {
        let stdout = self
            .invoke(
                "upload",
                json!({
                    "pipeline_id": ctx.pipeline_id,
                    "build_dir": output.build_dir,
                    "reports": output.reports,
                }),
            )
            .await?;
        let reply: UploadReply = parse_reply(&stdout)?;
        info!(pipeline_id = %ctx.pipeline_id, findings = reply.finding_ids.len(),
            "Upload step completed");
        Ok(UploadOutput {
            finding_ids: reply.finding_ids,
        })
    }

    async fn cleanup(&self, pipeline_id: ResourceId) -> Result<()> {
        match self
            .invoke("cleanup", json!({ "pipeline_id": pipeline_id }))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // Cleanup is best-effort; a missing sandbox is not a failure.
                warn!(pipeline_id = %pipeline_id, error = %e, "Cleanup step reported an error");
                Ok(())
            }
        }
    }
}

fn parse_reply<T: serde::de::DeserializeOwned>(stdout: &[u8]) -> Result<T> {
    serde_json::from_slice(stdout).map_err(|e| {
        Error::ExecutionFailed(format!(
            "runner produced unparseable output: {} ({})",
            e,
            String::from_utf8_lossy(stdout)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_reply_tolerates_missing_optional_fields() {
        let reply: BuildReply = parse_reply(br#"{"build_dir": "/tmp/b"}"#).unwrap();
        assert_eq!(reply.build_dir, "/tmp/b");
        assert!(reply.revision.is_none());
        assert!(reply.reports.is_empty());
    }

    #[test]
    fn upload_reply_parses_finding_ids() {
        let id = ResourceId::new();
        let raw = format!(r#"{{"finding_ids": ["{}"]}}"#, id);
        let reply: UploadReply = parse_reply(raw.as_bytes()).unwrap();
        assert_eq!(reply.finding_ids, vec![id]);
    }

    #[test]
    fn garbage_output_is_an_execution_failure() {
        let err = parse_reply::<BuildReply>(b"scanner exploded").unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }
}
