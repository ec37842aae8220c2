use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

use super::{notifications, stats};

/// Routes requiring `AppState` (the task store, log store, and queue).
/// `/v1/health` is wired separately in `main`, since it reads a
/// `HealthRegistry` rather than this state.
pub fn add_routes(router: Router, state: AppState) -> Router {
    router
        .route("/", get(index))
        .route("/v1/notifications", post(notifications::create))
        .route("/v1/notifications/:task_id", get(notifications::get_task))
        .route(
            "/v1/notifications/:task_id/logs",
            get(notifications::get_logs),
        )
        .route(
            "/v1/notifications/:task_id/retry",
            post(notifications::retry),
        )
        .route("/v1/stats", get(stats::get_stats))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "notification-relay api"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{self, Request, StatusCode};
    use http_body_util::BodyExt;
    use relay_common::log_store::InMemoryLogStore;
    use relay_common::queue::InMemoryQueue;
    use relay_common::store::InMemoryTaskStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            task_store: Arc::new(InMemoryTaskStore::new()),
            log_store: Arc::new(InMemoryLogStore::new()),
            queue: Arc::new(InMemoryQueue::new()),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn index_responds_ok() {
        let app = add_routes(Router::new(), test_state());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_fetch_task_round_trips() {
        let app = add_routes(Router::new(), test_state());

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/v1/notifications")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "sourceSystem": "billing",
                            "targetUrl": "https://example.com/hook",
                            "body": {"invoiceId": "inv_1"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(create_response.status(), StatusCode::ACCEPTED);
        let created = body_json(create_response).await;
        let task_id = created["taskId"].as_str().unwrap().to_owned();

        let get_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/notifications/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(get_response.status(), StatusCode::OK);
        let task = body_json(get_response).await;
        assert_eq!(task["status"], "PENDING");
    }

    #[tokio::test]
    async fn create_rejects_invalid_target_url() {
        let app = add_routes(Router::new(), test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/v1/notifications")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "sourceSystem": "billing",
                            "targetUrl": "not-a-url",
                            "body": {"invoiceId": "inv_1"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_task_is_not_found() {
        let app = add_routes(Router::new(), test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/notifications/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_on_non_failed_task_is_rejected() {
        let app = add_routes(Router::new(), test_state());

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/v1/notifications")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "sourceSystem": "billing",
                            "targetUrl": "https://example.com/hook",
                            "body": {"invoiceId": "inv_1"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let created = body_json(create_response).await;
        let task_id = created["taskId"].as_str().unwrap().to_owned();

        let retry_response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri(format!("/v1/notifications/{task_id}/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(retry_response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_reports_queue_size_and_task_counts() {
        let app = add_routes(Router::new(), test_state());

        app.clone()
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/v1/notifications")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "sourceSystem": "billing",
                            "targetUrl": "https://example.com/hook",
                            "body": {"invoiceId": "inv_1"}
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["queueSize"], 1);
        assert_eq!(stats["taskStats"]["PENDING"], 1);
    }
}
