use std::sync::Arc;

use anyhow::Context;
use drawq_pipeline::config::PipelineConfig;
use drawq_pipeline::migrator::{Migrator, MigratorSettings};
use drawq_pipeline::provider::{GenerationProvider, HttpGenerationProvider};
use drawq_pipeline::queue::TaskQueue;
use drawq_pipeline::reaper::{Reaper, ReaperSettings};
use drawq_pipeline::storage::{HttpStorageClient, StorageClient};
use drawq_pipeline::worker::{TaskWorker, WorkerSettings};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = PipelineConfig::from_env()?;

    let pool = drawq_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    drawq_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    drawq_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let generation_api_url = config
        .generation_api_url
        .clone()
        .context("GENERATION_API_URL must be set")?;
    let storage_api_url = config
        .storage_api_url
        .clone()
        .context("STORAGE_API_URL must be set")?;

    let http = reqwest::Client::new();
    let provider: Arc<dyn GenerationProvider> = Arc::new(HttpGenerationProvider::with_client(
        http.clone(),
        generation_api_url,
    ));
    let storage: Arc<dyn StorageClient> =
        Arc::new(HttpStorageClient::with_client(http, storage_api_url));

    let queue = TaskQueue::new(pool);
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let worker_settings = WorkerSettings::from(&config);
    for n in 0..config.worker_concurrency {
        let worker = TaskWorker::new(
            format!("worker-{n}"),
            queue.clone(),
            Arc::clone(&provider),
            worker_settings,
        );
        let cancel = cancel.clone();
        tracker.spawn(async move { worker.run(cancel).await });
    }

    let reaper = Reaper::new(queue.clone(), ReaperSettings::from(&config));
    tracker.spawn({
        let cancel = cancel.clone();
        async move { reaper.run(cancel).await }
    });

    let migrator = Migrator::new(queue, storage, MigratorSettings::from(&config));
    tracker.spawn({
        let cancel = cancel.clone();
        async move { migrator.run(cancel).await }
    });

    tracing::info!(workers = config.worker_concurrency, "Drawing pipeline running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested; waiting for loops to stop");

    cancel.cancel();
    tracker.close();
    tracker.wait().await;

    tracing::info!("Drawing pipeline stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "drawq_worker=debug,drawq_pipeline=debug,drawq_db=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
