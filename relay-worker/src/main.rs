//! Consume queued notification tasks and dispatch them over HTTP.

use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use time::Duration as TimeDuration;

use relay_common::delivery::DeliveryExecutor;
use relay_common::health::HealthRegistry;
use relay_common::metrics::{serve, setup_metrics_router};
use relay_common::outcome::OutcomeHandler;
use relay_common::queue::{PgQueue, Queue};
use relay_common::retry::RetryPolicy;
use relay_common::store::{PgTaskStore, TaskStore};
use relay_worker::config::Config;
use relay_worker::error::WorkerError;
use relay_worker::pool::WorkerPool;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let pool_liveness = liveness
        .register("worker-pool".to_string(), TimeDuration::seconds(60))
        .await;

    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let task_store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pg_pool.clone()));
    let queue: Arc<dyn Queue> = Arc::new(PgQueue::new(pg_pool.clone()));
    let log_store = Arc::new(relay_common::log_store::PgLogStore::new(pg_pool));

    let executor = Arc::new(DeliveryExecutor::new(
        config.connect_timeout.0,
        config.read_timeout.0,
    ));
    let retry_policy = RetryPolicy::new(config.retry_policy.base_delay.0);
    let outcome_handler = Arc::new(OutcomeHandler::new(
        task_store.clone(),
        log_store,
        retry_policy,
    ));

    let worker_pool = WorkerPool::new(
        task_store,
        queue,
        executor,
        outcome_handler,
        config.concurrency,
        config.poll_timeout.0,
        config.error_backoff.0,
        config.shutdown_grace.0,
    );

    let router_liveness = liveness.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(router_liveness.get_status())));
    let router = router.merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    pool_liveness.report_healthy().await;
    worker_pool.run(&config.worker_name, &liveness).await;

    Ok(())
}

pub async fn index() -> &'static str {
    "notification-relay worker"
}
