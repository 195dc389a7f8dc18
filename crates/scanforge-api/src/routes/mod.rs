//! Route definitions.

pub mod health;
pub mod pipelines;
pub mod projects;
pub mod queue;
pub mod schedules;

use axum::routing::delete;
use axum::Router;

use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/projects", projects::router())
        .nest("/schedules", schedules::router())
        .nest("/queue", queue::router())
        .nest("/pipelines", pipelines::router())
        .route(
            "/launch-configs/{id}",
            delete(projects::delete_launch_config),
        )
}
