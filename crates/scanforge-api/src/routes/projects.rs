//! Project and launch configuration routes.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use scanforge_core::{validate_filter_envelope, AiMode};
use scanforge_db::{LaunchConfigRecord, NewLaunchConfig, ProjectRecord, ProjectVersionRecord};

use crate::auth::{self, Action};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_project).get(list_projects))
        .route("/{id}", get(get_project))
        .route("/{id}/versions", post(add_version))
        .route(
            "/{id}/launch-configs",
            post(create_launch_config).get(list_launch_configs),
        )
        .route("/{id}/schedule", put(super::schedules::upsert_for_project))
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: String,
    #[serde(default)]
    supported_languages: Vec<String>,
    #[serde(default)]
    compilable: bool,
    #[serde(default)]
    profile: Value,
}

async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<ProjectRecord>, ApiError> {
    auth::require(&state, &headers, None, Action::Edit).await?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("project name must not be empty".into()));
    }
    let project = state
        .projects
        .create(
            req.name.trim(),
            req.supported_languages,
            req.compilable,
            req.profile,
        )
        .await?;
    Ok(Json(project))
}

async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProjectRecord>>, ApiError> {
    auth::require(&state, &headers, None, Action::View).await?;
    Ok(Json(state.projects.list().await?))
}

async fn get_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectRecord>, ApiError> {
    auth::require(&state, &headers, Some(id), Action::View).await?;
    Ok(Json(state.projects.get(id).await?))
}

#[derive(Debug, Deserialize)]
struct AddVersionRequest {
    version: String,
}

async fn add_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<AddVersionRequest>,
) -> Result<Json<ProjectVersionRecord>, ApiError> {
    auth::require(&state, &headers, Some(id), Action::Edit).await?;
    if req.version.trim().is_empty() {
        return Err(ApiError::BadRequest("version must not be empty".into()));
    }
    let version = state.projects.add_version(id, req.version.trim()).await?;
    Ok(Json(version))
}

#[derive(Debug, Deserialize)]
struct CreateLaunchConfigRequest {
    name: String,
    #[serde(default)]
    analyzers: Vec<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    source_ref: Option<String>,
    #[serde(default)]
    ai_mode: Option<String>,
    #[serde(default)]
    ai_filter: Option<Value>,
}

async fn create_launch_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateLaunchConfigRequest>,
) -> Result<Json<LaunchConfigRecord>, ApiError> {
    auth::require(&state, &headers, Some(id), Action::Edit).await?;

    let ai_mode: AiMode = match req.ai_mode.as_deref() {
        Some(raw) => raw.parse()?,
        None => AiMode::Disabled,
    };
    if let Some(filter) = &req.ai_filter {
        validate_filter_envelope(filter)?;
    }
    if ai_mode == AiMode::AutoDefault && req.ai_filter.is_none() {
        return Err(ApiError::BadRequest(
            "AUTO_DEFAULT ai_mode requires an ai_filter".into(),
        ));
    }

    let config = state
        .projects
        .create_launch_config(NewLaunchConfig {
            project_id: id,
            name: req.name,
            analyzers: req.analyzers,
            languages: req.languages,
            source_ref: req.source_ref,
            ai_mode: ai_mode.as_str().to_string(),
            ai_filter: req.ai_filter,
        })
        .await?;
    Ok(Json(config))
}

async fn list_launch_configs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LaunchConfigRecord>>, ApiError> {
    auth::require(&state, &headers, Some(id), Action::View).await?;
    Ok(Json(state.projects.list_launch_configs(id).await?))
}

/// Deletes a launch config; schedules and queue entries cascade with it.
pub async fn delete_launch_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let config = state.projects.get_launch_config(id).await?;
    auth::require(&state, &headers, Some(config.project_id), Action::Edit).await?;
    state.projects.delete_launch_config(id).await?;
    Ok(Json(json!({ "deleted": id })))
}
