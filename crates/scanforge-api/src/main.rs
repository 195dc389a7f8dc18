//! scanforge API server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanforge_api::auth::TokenAuthorizer;
use scanforge_api::{routes, AppState, Config};
use scanforge_core::WorkerInspector;
use scanforge_db::{
    PgPipelineRepo, PgProjectRepo, PgQueueRepo, PgScheduleRepo, PipelineRepo, ProjectRepo,
    QueueRepo, ScheduleRepo,
};
use scanforge_executor::{HttpAiClient, HttpEnricher, ProcessScanRunner};
use scanforge_scheduler::{
    spawn_action_listener, Dispatcher, Launcher, PipelineRunner, ScheduleTicker, StatusBus,
    WorkerRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let pool = scanforge_db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    scanforge_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("Database ready");

    let projects: Arc<dyn ProjectRepo> = Arc::new(PgProjectRepo::new(pool.clone()));
    let schedules: Arc<dyn ScheduleRepo> = Arc::new(PgScheduleRepo::new(pool.clone()));
    let queue: Arc<dyn QueueRepo> = Arc::new(PgQueueRepo::new(pool.clone()));
    let pipelines: Arc<dyn PipelineRepo> = Arc::new(PgPipelineRepo::new(pool));

    let registry = Arc::new(WorkerRegistry::new(config.workers.clone()));
    let bus = StatusBus::default();
    let runner = PipelineRunner::new(
        pipelines.clone(),
        projects.clone(),
        Arc::new(ProcessScanRunner::new(config.runner_cmd.clone())),
        Arc::new(HttpEnricher::new(config.ai_url.clone())),
        Arc::new(HttpAiClient::new(config.ai_url.clone())),
        registry.clone(),
        bus.clone(),
    );

    spawn_action_listener(pipelines.clone(), bus);

    let ticker = Arc::new(ScheduleTicker::new(schedules.clone()));
    tokio::spawn(ticker.run(Duration::from_secs(config.tick_secs)));
    info!(every_secs = config.tick_secs, "Schedule ticker started");

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        schedules.clone(),
        registry.clone() as Arc<dyn WorkerInspector>,
        Arc::new(runner.clone()) as Arc<dyn Launcher>,
        registry.workers().to_vec(),
    ));
    tokio::spawn(dispatcher.run(Duration::from_secs(config.dispatch_secs)));
    info!(every_secs = config.dispatch_secs, "Dispatcher started");

    let state = AppState {
        projects,
        schedules,
        queue,
        pipelines,
        runner,
        authorizer: Arc::new(TokenAuthorizer::new(config.api_token.clone())),
        queue_retention_days: config.queue_retention_days,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!(bind = %config.bind, "Starting scanforge server");
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .context("failed to bind listen address")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
