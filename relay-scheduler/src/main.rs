use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use sqlx::postgres::PgPoolOptions;
use time::Duration as TimeDuration;
use tokio::sync::Semaphore;

use relay_common::health::HealthRegistry;
use relay_common::metrics::setup_metrics_router;
use relay_common::queue::{PgQueue, Queue};
use relay_common::store::{PgTaskStore, TaskStore};

use config::Config;
use recovery_sweeper::RecoverySweeper;
use retry_scheduler::RetryScheduler;

mod config;
mod error;
mod recovery_sweeper;
mod retry_scheduler;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn retry_loop(
    scheduler: RetryScheduler,
    interval_secs: u64,
    liveness: relay_common::health::HealthHandle,
) {
    let semaphore = Semaphore::new(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        let _permit = semaphore.acquire().await;
        interval.tick().await;
        liveness.report_healthy().await;
        if let Err(error) = scheduler.run_once().await {
            tracing::error!(%error, "retry scheduler pass failed");
        }
        drop(_permit);
    }
}

async fn recovery_loop(
    sweeper: RecoverySweeper,
    interval_secs: u64,
    liveness: relay_common::health::HealthHandle,
) {
    let semaphore = Semaphore::new(1);
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        let _permit = semaphore.acquire().await;
        interval.tick().await;
        liveness.report_healthy().await;
        if let Err(error) = sweeper.run_once().await {
            tracing::error!(%error, "recovery sweeper pass failed");
        }
        drop(_permit);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");
    let retry_liveness = liveness
        .register("retry-scheduler".to_string(), TimeDuration::seconds(60))
        .await;
    let recovery_liveness = liveness
        .register("recovery-sweeper".to_string(), TimeDuration::seconds(120))
        .await;

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let task_store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pg_pool.clone()));
    let queue: Arc<dyn Queue> = Arc::new(PgQueue::new(pg_pool));

    let retry_scheduler = RetryScheduler::new(
        task_store.clone(),
        queue.clone(),
        config.retry_batch_size,
    );
    let recovery_sweeper = RecoverySweeper::new(
        task_store,
        queue,
        Duration::from_secs(config.recovery_stuck_threshold_secs.max(0) as u64),
    );

    let retry_loop_fut = Box::pin(retry_loop(
        retry_scheduler,
        config.retry_scan_interval_secs,
        retry_liveness,
    ));
    let recovery_loop_fut = Box::pin(recovery_loop(
        recovery_sweeper,
        config.recovery_scan_interval_secs,
        recovery_liveness,
    ));
    let background = Box::pin(select(retry_loop_fut, recovery_loop_fut));

    let router = Router::new()
        .route("/", get(|| async { "notification-relay scheduler" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route(
            "/_liveness",
            get(move || ready(liveness.get_status())),
        );
    let router = router.merge(setup_metrics_router());
    let http_server = Box::pin(listen(router, config.bind()));

    match select(http_server, background).await {
        Either::Left((listen_result, _)) => {
            if let Err(error) = listen_result {
                tracing::error!(%error, "scheduler http server exited");
            }
        }
        Either::Right((_, _)) => {
            tracing::error!("scheduler background loops exited unexpectedly")
        }
    }
}
