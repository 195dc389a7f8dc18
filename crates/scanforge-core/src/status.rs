//! Pipeline status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an analysis pipeline run.
///
/// `Finished` is the single terminal state and also the pre-launch state: a
/// freshly created pipeline row sits in `Finished` until an orchestration
/// task claims it via the begin-run guard. Once launched, persisted statuses
/// only move forward in lifecycle order (forcing `Finished` is always
/// allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Launched,
    FindingPostprocessing,
    UploadingResults,
    WaitingAiConfirmation,
    PushToAi,
    WaitingAiResult,
    Finished,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Finished)
    }

    /// Position in the lifecycle ordering. Persisted status sequences are
    /// non-decreasing with respect to this rank.
    pub fn rank(&self) -> u8 {
        match self {
            PipelineStatus::Launched => 0,
            PipelineStatus::FindingPostprocessing => 1,
            PipelineStatus::UploadingResults => 2,
            PipelineStatus::WaitingAiConfirmation => 3,
            PipelineStatus::PushToAi => 4,
            PipelineStatus::WaitingAiResult => 5,
            PipelineStatus::Finished => 6,
        }
    }

    /// Whether a persisted transition from `self` to `new` is permitted.
    ///
    /// Same-status writes are allowed (and treated as no-ops by the store);
    /// leaving `Finished` is only possible through the begin-run guard, not
    /// through an ordinary status write.
    pub fn allows(&self, new: PipelineStatus) -> bool {
        if *self == new {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        new.rank() >= self.rank()
    }

    /// Stable string form used for persistence and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Launched => "launched",
            PipelineStatus::FindingPostprocessing => "finding_postprocessing",
            PipelineStatus::UploadingResults => "uploading_results",
            PipelineStatus::WaitingAiConfirmation => "waiting_ai_confirmation",
            PipelineStatus::PushToAi => "push_to_ai",
            PipelineStatus::WaitingAiResult => "waiting_ai_result",
            PipelineStatus::Finished => "finished",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launched" => Ok(PipelineStatus::Launched),
            "finding_postprocessing" => Ok(PipelineStatus::FindingPostprocessing),
            "uploading_results" => Ok(PipelineStatus::UploadingResults),
            "waiting_ai_confirmation" => Ok(PipelineStatus::WaitingAiConfirmation),
            "push_to_ai" => Ok(PipelineStatus::PushToAi),
            "waiting_ai_result" => Ok(PipelineStatus::WaitingAiResult),
            "finished" => Ok(PipelineStatus::Finished),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown pipeline status '{other}'"
            ))),
        }
    }
}
