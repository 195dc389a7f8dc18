//! External collaborator adapters for scanforge.
//!
//! The orchestration core talks to narrow traits; this crate provides the
//! production implementations: a process-based build/scan/upload runner and
//! HTTP clients for enrichment and AI triage.

pub mod ai;
pub mod process;

pub use ai::{HttpAiClient, HttpEnricher};
pub use process::ProcessScanRunner;
