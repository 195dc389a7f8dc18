//! Row types shared by the PostgreSQL and in-memory stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use scanforge_core::PipelineStatus;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: Uuid,
    pub name: String,
    pub supported_languages: Value,
    pub compilable: bool,
    pub profile: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProjectVersionRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LaunchConfigRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub analyzers: Value,
    pub languages: Value,
    pub source_ref: Option<String>,
    pub ai_mode: String,
    pub ai_filter: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub launch_config_id: Uuid,
    pub cron_expression: String,
    pub enabled: bool,
    pub concurrency_cap: i32,
    pub last_fired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueEntryRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub project_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub launch_config_id: Uuid,
    pub dispatched: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub pipeline_id: Option<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_version_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub run_task_id: Option<Uuid>,
    pub watch_task_id: Option<Uuid>,
    pub launch_data: Value,
}

impl PipelineRecord {
    /// Parsed status; unparseable rows read as finished so they can never
    /// block a new launch.
    pub fn status(&self) -> PipelineStatus {
        self.status.parse().unwrap_or(PipelineStatus::Finished)
    }
}

/// A committed status transition, published to subscribers after the write
/// lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub pipeline_id: Uuid,
    pub old: PipelineStatus,
    pub new: PipelineStatus,
}

/// Input for creating or replacing a schedule.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub launch_config_id: Uuid,
    pub cron_expression: String,
    pub enabled: bool,
    pub concurrency_cap: i32,
}

/// Input for creating a launch configuration.
#[derive(Debug, Clone)]
pub struct NewLaunchConfig {
    pub project_id: Uuid,
    pub name: String,
    pub analyzers: Vec<String>,
    pub languages: Vec<String>,
    pub source_ref: Option<String>,
    pub ai_mode: String,
    pub ai_filter: Option<Value>,
}

/// Listing filter for queue entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFilter {
    pub only_pending: bool,
    pub limit: Option<i64>,
}
