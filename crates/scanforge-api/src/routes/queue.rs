//! Launch queue routes.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use scanforge_db::{QueueEntryRecord, QueueFilter};

use crate::auth::{self, Action};
use crate::error::ApiError;
use crate::state::AppState;

const MAX_QUEUE_LIMIT: i64 = 2000;
const MAX_RETENTION_DAYS: i64 = 365;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue))
        .route("/{id}", axum::routing::delete(delete_entry))
        .route("/purge", post(purge))
}

#[derive(Debug, Deserialize, Default)]
struct QueueQuery {
    #[serde(default)]
    only_pending: bool,
    limit: Option<i64>,
}

async fn list_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Vec<QueueEntryRecord>>, ApiError> {
    auth::require(&state, &headers, None, Action::View).await?;
    let limit = query
        .limit
        .unwrap_or(MAX_QUEUE_LIMIT)
        .clamp(1, MAX_QUEUE_LIMIT);
    let entries = state
        .queue
        .list(QueueFilter {
            only_pending: query.only_pending,
            limit: Some(limit),
        })
        .await?;
    Ok(Json(entries))
}

async fn delete_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let entry = state.queue.get(id).await?;
    auth::require(&state, &headers, Some(entry.project_id), Action::Edit).await?;
    state.queue.delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize, Default)]
struct PurgeRequest {
    /// Dispatched entries older than this many days are removed. Defaults to
    /// the configured retention window.
    days: Option<i64>,
}

async fn purge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<Value>, ApiError> {
    auth::require(&state, &headers, None, Action::Edit).await?;
    let days = req.days.unwrap_or(state.queue_retention_days);
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_RETENTION_DAYS
        )));
    }
    let cutoff = Utc::now() - Duration::days(days);
    let purged = state.queue.purge_dispatched(cutoff).await?;
    Ok(Json(json!({ "purged": purged })))
}
