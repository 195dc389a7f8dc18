//! Schedule routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use scanforge_core::CronSpec;
use scanforge_db::{NewSchedule, QueueEntryRecord, ScheduleRecord};

use crate::auth::{self, Action};
use crate::error::ApiError;
use crate::state::AppState;

const MAX_LIST_LIMIT: usize = 500;
const MAX_PREVIEW_COUNT: usize = 20;
const MIN_CONCURRENCY_CAP: i32 = 1;
const MAX_CONCURRENCY_CAP: i32 = 8;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_schedules))
        .route(
            "/{id}",
            get(get_schedule).patch(patch_schedule).delete(delete_schedule),
        )
        .route("/preview", post(preview))
        .route("/disable", post(disable_bulk))
        .route("/{id}/run-once", post(run_once))
}

/// Schedule with the owning project resolved through its launch config.
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    #[serde(flatten)]
    pub schedule: ScheduleRecord,
    pub project_id: Uuid,
}

async fn with_project(
    state: &AppState,
    schedule: ScheduleRecord,
) -> Result<ScheduleResponse, ApiError> {
    let config = state
        .projects
        .get_launch_config(schedule.launch_config_id)
        .await?;
    Ok(ScheduleResponse {
        schedule,
        project_id: config.project_id,
    })
}

#[derive(Debug, Deserialize)]
pub struct UpsertScheduleRequest {
    pub launch_config_id: Uuid,
    pub cron_expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cap")]
    pub concurrency_cap: i32,
}

fn default_enabled() -> bool {
    true
}

fn default_cap() -> i32 {
    MIN_CONCURRENCY_CAP
}

/// `PUT /api/projects/{id}/schedule` — create or replace the schedule for
/// one of the project's launch configs.
pub async fn upsert_for_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(req): Json<UpsertScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    auth::require(&state, &headers, Some(project_id), Action::Edit).await?;

    let config = state.projects.get_launch_config(req.launch_config_id).await?;
    if config.project_id != project_id {
        return Err(ApiError::BadRequest(
            "launch config does not belong to this project".into(),
        ));
    }
    // Parse up front so a bad expression never lands in the table.
    CronSpec::parse(&req.cron_expression)?;
    if !(MIN_CONCURRENCY_CAP..=MAX_CONCURRENCY_CAP).contains(&req.concurrency_cap) {
        return Err(ApiError::BadRequest(format!(
            "concurrency_cap must be between {} and {}",
            MIN_CONCURRENCY_CAP, MAX_CONCURRENCY_CAP
        )));
    }

    let schedule = state
        .schedules
        .upsert(NewSchedule {
            launch_config_id: req.launch_config_id,
            cron_expression: req.cron_expression,
            enabled: req.enabled,
            concurrency_cap: req.concurrency_cap,
        })
        .await?;
    Ok(Json(ScheduleResponse {
        schedule,
        project_id,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    project_id: Option<Uuid>,
    enabled: Option<bool>,
    /// Substring match against the cron expression.
    search: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ScheduleResponse>>, ApiError> {
    auth::require(&state, &headers, query.project_id, Action::View).await?;

    let limit = query.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let mut out = Vec::new();
    for schedule in state.schedules.list().await? {
        if let Some(enabled) = query.enabled {
            if schedule.enabled != enabled {
                continue;
            }
        }
        if let Some(search) = &query.search {
            if !schedule.cron_expression.contains(search.as_str()) {
                continue;
            }
        }
        let resolved = with_project(&state, schedule).await?;
        if let Some(project_id) = query.project_id {
            if resolved.project_id != project_id {
                continue;
            }
        }
        out.push(resolved);
    }

    let page = out.into_iter().skip(offset).take(limit).collect();
    Ok(Json(page))
}

async fn get_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = state.schedules.get(id).await?;
    let resolved = with_project(&state, schedule).await?;
    auth::require(&state, &headers, Some(resolved.project_id), Action::View).await?;
    Ok(Json(resolved))
}

#[derive(Debug, Deserialize)]
struct PatchScheduleRequest {
    enabled: Option<bool>,
}

/// Only `enabled` may be patched; everything else goes through the upsert.
async fn patch_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchScheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = state.schedules.get(id).await?;
    let config = state
        .projects
        .get_launch_config(schedule.launch_config_id)
        .await?;
    auth::require(&state, &headers, Some(config.project_id), Action::Edit).await?;

    let enabled = req
        .enabled
        .ok_or_else(|| ApiError::BadRequest("only 'enabled' can be patched".into()))?;
    let updated = state.schedules.set_enabled(id, enabled).await?;
    Ok(Json(ScheduleResponse {
        schedule: updated,
        project_id: config.project_id,
    }))
}

async fn delete_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let schedule = state.schedules.get(id).await?;
    let config = state
        .projects
        .get_launch_config(schedule.launch_config_id)
        .await?;
    auth::require(&state, &headers, Some(config.project_id), Action::Edit).await?;
    state.schedules.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    cron_expression: String,
    #[serde(default = "default_preview_count")]
    count: usize,
}

fn default_preview_count() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    next: Vec<DateTime<Utc>>,
}

/// Dry-run a cron expression. No schedule state is touched.
async fn preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    auth::require(&state, &headers, None, Action::View).await?;
    if !(1..=MAX_PREVIEW_COUNT).contains(&req.count) {
        return Err(ApiError::BadRequest(format!(
            "count must be between 1 and {}",
            MAX_PREVIEW_COUNT
        )));
    }
    let spec = CronSpec::parse(&req.cron_expression)?;
    Ok(Json(PreviewResponse {
        next: spec.preview(Utc::now(), req.count),
    }))
}

#[derive(Debug, Deserialize, Default)]
struct DisableRequest {
    /// Restrict the bulk disable to one project's schedules.
    project_id: Option<Uuid>,
}

async fn disable_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DisableRequest>,
) -> Result<Json<Value>, ApiError> {
    auth::require(&state, &headers, req.project_id, Action::Edit).await?;

    let disabled = match req.project_id {
        None => state.schedules.disable_all().await?,
        Some(project_id) => {
            let mut disabled = 0u64;
            for config in state.projects.list_launch_configs(project_id).await? {
                match state.schedules.get_by_launch_config(config.id).await {
                    Ok(schedule) if schedule.enabled => {
                        state.schedules.set_enabled(schedule.id, false).await?;
                        disabled += 1;
                    }
                    Ok(_) => {}
                    Err(scanforge_db::DbError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            disabled
        }
    };
    Ok(Json(json!({ "disabled": disabled })))
}

/// Enqueue one entry for the schedule right now, bypassing cron evaluation.
/// The entry is schedule-less so the dispatcher treats it as manual and the
/// schedule's `last_fired_at` stays untouched.
async fn run_once(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueEntryRecord>, ApiError> {
    let schedule = state.schedules.get(id).await?;
    let config = state
        .projects
        .get_launch_config(schedule.launch_config_id)
        .await?;
    auth::require(&state, &headers, Some(config.project_id), Action::Edit).await?;

    let entry = state
        .queue
        .enqueue(config.project_id, None, config.id, Utc::now())
        .await?;
    Ok(Json(entry))
}
