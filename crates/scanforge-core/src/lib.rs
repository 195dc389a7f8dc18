//! Core domain types and traits for the scanforge analysis platform.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - The cron evaluator for launch schedules
//! - The pipeline status state machine
//! - Launch parameter resolution and merging
//! - Launch metadata accumulated during a run
//! - Traits for the external collaborators (scan runner, enricher, AI client,
//!   worker introspection)

pub mod collab;
pub mod cron;
pub mod error;
pub mod id;
pub mod launch;
pub mod params;
pub mod status;

pub use collab::{
    AiClient, FindingEnricher, RunContext, ScanOutput, ScanRunner, UploadOutput, WorkerInspector,
};
pub use cron::CronSpec;
pub use error::{Error, Result};
pub use id::ResourceId;
pub use launch::{ArtifactInfo, EnrichmentProgress, LaunchData, OneOffAction};
pub use params::{
    validate_filter_envelope, AiMode, ConfigSnapshot, LaunchOverrides, ProjectProfile,
    ResolvedParams,
};
pub use status::PipelineStatus;
