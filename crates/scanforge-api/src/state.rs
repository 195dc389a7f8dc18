//! Shared application state.

use std::sync::Arc;

use scanforge_db::{PipelineRepo, ProjectRepo, QueueRepo, ScheduleRepo};
use scanforge_scheduler::PipelineRunner;

use crate::auth::Authorizer;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<dyn ProjectRepo>,
    pub schedules: Arc<dyn ScheduleRepo>,
    pub queue: Arc<dyn QueueRepo>,
    pub pipelines: Arc<dyn PipelineRepo>,
    pub runner: PipelineRunner,
    pub authorizer: Arc<dyn Authorizer>,
    /// Default retention window for queue purges, in days.
    pub queue_retention_days: i64,
}
