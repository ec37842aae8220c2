use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use sqlx::postgres::PgPoolOptions;
use time::Duration as TimeDuration;

use relay_common::health::HealthRegistry;
use relay_common::log_store::{LogStore, PgLogStore};
use relay_common::metrics::setup_metrics_router;
use relay_common::queue::{PgQueue, Queue};
use relay_common::store::{PgTaskStore, TaskStore};

use config::Config;
use handlers::app::add_routes;
use state::AppState;

mod config;
mod handlers;
mod state;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");
    let http_liveness = liveness
        .register("http-server".to_string(), TimeDuration::seconds(30))
        .await;
    tokio::spawn(async move {
        loop {
            http_liveness.report_healthy().await;
            tokio::time::sleep(StdDuration::from_secs(10)).await;
        }
    });

    let pg_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let task_store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pg_pool.clone()));
    let log_store: Arc<dyn LogStore> = Arc::new(PgLogStore::new(pg_pool.clone()));
    let queue: Arc<dyn Queue> = Arc::new(PgQueue::new(pg_pool));

    let state = AppState {
        task_store,
        log_store,
        queue,
    };

    let app = add_routes(Router::new(), state);
    let app = app
        .route("/v1/health", get(move || async move { liveness.get_status() }))
        .merge(setup_metrics_router());

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(error) => tracing::error!(%error, "relay-api http server exited"),
    }
}
