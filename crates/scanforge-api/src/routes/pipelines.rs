//! Pipeline routes: manual starts, lifecycle controls, and the SSE feed.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

use scanforge_core::{LaunchOverrides, PipelineStatus};
use scanforge_db::PipelineRecord;
use scanforge_scheduler::PipelineEvent;

use crate::auth::{self, Action};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_pipeline).get(list_pipelines))
        .route("/{id}", get(get_pipeline).delete(delete_pipeline))
        .route("/{id}/stop", post(stop_pipeline))
        .route("/{id}/confirm-ai", post(confirm_ai))
        .route("/{id}/ai-result", post(ai_result))
        .route("/{id}/progress", get(progress))
        .route("/{id}/events", get(events))
}

#[derive(Debug, Deserialize)]
struct StartPipelineRequest {
    launch_config_id: Uuid,
    #[serde(default)]
    version_id: Option<Uuid>,
    #[serde(default)]
    overrides: LaunchOverrides,
}

/// Manual start. Responds 409 when the version already has a live run.
async fn start_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartPipelineRequest>,
) -> Result<Json<PipelineRecord>, ApiError> {
    let config = state.projects.get_launch_config(req.launch_config_id).await?;
    auth::require(&state, &headers, Some(config.project_id), Action::Edit).await?;

    let worker = state.runner.default_worker();
    let pipeline = state
        .runner
        .start(req.launch_config_id, req.version_id, &req.overrides, &worker)
        .await?;
    Ok(Json(pipeline))
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    project_id: Option<Uuid>,
    /// Exact status match, e.g. `launched` or `finished`.
    status: Option<String>,
}

async fn list_pipelines(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PipelineRecord>>, ApiError> {
    auth::require(&state, &headers, query.project_id, Action::View).await?;
    let mut pipelines = state.pipelines.list(query.project_id).await?;
    if let Some(status) = &query.status {
        status.parse::<PipelineStatus>()?;
        pipelines.retain(|p| p.status == *status);
    }
    Ok(Json(pipelines))
}

async fn get_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineRecord>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::View).await?;
    Ok(Json(pipeline))
}

/// Only terminal pipelines can be deleted; live runs must be stopped first.
async fn delete_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::Edit).await?;
    state.pipelines.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

async fn stop_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::Edit).await?;
    state.runner.stop(id).await?;
    Ok(Json(json!({ "stopped": id })))
}

async fn confirm_ai(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::Edit).await?;
    state.runner.confirm_ai(id).await?;
    Ok(Json(json!({ "confirmed": id })))
}

async fn ai_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::Edit).await?;
    state.runner.ai_result(id).await?;
    Ok(Json(json!({ "finished": id })))
}

async fn progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::View).await?;
    let (total, done, percent) = state.runner.progress(id).await?;
    Ok(Json(json!({
        "total": total,
        "done": done,
        "percent": percent,
    })))
}

/// SSE stream of the pipeline's status transitions. The stream ends after the
/// terminal `finished` event.
async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let pipeline = state.pipelines.get(id).await?;
    auth::require(&state, &headers, Some(pipeline.project_id), Action::View).await?;

    // A run that already reached the terminal state will never publish again;
    // a late subscriber gets the terminal event right away instead of idling
    // on keep-alives. Pre-launch rows also read as finished but have no
    // started_at yet, and those still have their whole lifecycle ahead.
    let already_finished = pipeline.status().is_terminal() && pipeline.started_at.is_some();
    let stream = event_feed(state.runner.bus().subscribe(), id, already_finished);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

enum FeedState {
    Terminal,
    Open,
    Closed,
}

fn event_feed(
    rx: Receiver<PipelineEvent>,
    id: Uuid,
    already_finished: bool,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let initial = if already_finished {
        FeedState::Terminal
    } else {
        FeedState::Open
    };
    futures::stream::unfold((rx, initial), move |(mut rx, state)| async move {
        match state {
            FeedState::Closed => None,
            FeedState::Terminal => Some((Ok(finished_event(id)), (rx, FeedState::Closed))),
            FeedState::Open => loop {
                match rx.recv().await {
                    Ok(PipelineEvent::StatusChanged(change)) if change.pipeline_id == id => {
                        let data = json!({
                            "pipeline_id": change.pipeline_id,
                            "old": change.old.as_str(),
                            "new": change.new.as_str(),
                        });
                        let event = Event::default().event("status").data(data.to_string());
                        return Some((Ok(event), (rx, FeedState::Open)));
                    }
                    Ok(PipelineEvent::EnrichmentCompleted { pipeline_id })
                        if pipeline_id == id =>
                    {
                        let data = json!({ "pipeline_id": pipeline_id });
                        let event = Event::default().event("enriched").data(data.to_string());
                        return Some((Ok(event), (rx, FeedState::Open)));
                    }
                    Ok(PipelineEvent::Finished { pipeline_id }) if pipeline_id == id => {
                        // Terminal status is forever; close after delivering it.
                        return Some((Ok(finished_event(id)), (rx, FeedState::Closed)));
                    }
                    Ok(_) => continue,
                    // A lagged subscriber just misses intermediate transitions.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    })
}

fn finished_event(id: Uuid) -> Event {
    let data = json!({ "pipeline_id": id });
    Event::default().event("finished").data(data.to_string())
}
