//! # Delivery Executor
//!
//! Given a `Task` whose status is `PROCESSING`, perform exactly one
//! outbound HTTP attempt and classify the outcome. See spec §4.E for the
//! classification table this module implements verbatim. The executor
//! never mutates task state — it hands a classified `Outcome` to the
//! outcome handler (`crate::outcome`).

use std::time::{Duration, Instant};

use http::StatusCode;
use reqwest::header;

use crate::error::DeliveryError;
use crate::model::Task;

/// Why a failed attempt is considered retryable. Carried through to the
/// log/outcome handler purely for observability; the state-machine
/// behavior is identical across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableKind {
    Network,
    TransientClient,
    ServerError,
    System,
}

/// Why a failed attempt is considered terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    NonSuccess,
    ClientError,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        status: u16,
        body: Option<String>,
        latency_ms: i64,
    },
    Retryable {
        kind: RetryableKind,
        status: Option<u16>,
        body: Option<String>,
        error: String,
        latency_ms: i64,
    },
    Terminal {
        kind: TerminalKind,
        status: Option<u16>,
        body: Option<String>,
        error: String,
        latency_ms: i64,
    },
}

impl Outcome {
    pub fn latency_ms(&self) -> i64 {
        match self {
            Outcome::Success { latency_ms, .. } => *latency_ms,
            Outcome::Retryable { latency_ms, .. } => *latency_ms,
            Outcome::Terminal { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Outcome::Success { status, .. } => Some(*status),
            Outcome::Retryable { status, .. } => *status,
            Outcome::Terminal { status, .. } => *status,
        }
    }

    pub fn response_body(&self) -> Option<String> {
        match self {
            Outcome::Success { body, .. } => body.clone(),
            Outcome::Retryable { body, .. } => body.clone(),
            Outcome::Terminal { body, .. } => body.clone(),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Retryable { error, .. } => Some(error.clone()),
            Outcome::Terminal { error, .. } => Some(error.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

pub struct DeliveryExecutor {
    client: reqwest::Client,
}

impl DeliveryExecutor {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent("notification-relay")
            .build()
            .expect("failed to construct reqwest client for delivery executor");

        Self { client }
    }
}

impl Default for DeliveryExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        )
    }
}

impl DeliveryExecutor {
    /// Perform one outbound HTTP attempt for `task` and classify the
    /// result. `task.status` is expected to already be `PROCESSING`;
    /// this function does not check it, since that invariant is the
    /// worker loop's responsibility.
    pub async fn execute(&self, task: &Task) -> Outcome {
        let started = Instant::now();

        let headers = match build_headers(&task.headers) {
            Ok(headers) => headers,
            Err(error) => {
                return Outcome::Terminal {
                    kind: TerminalKind::NonSuccess,
                    status: None,
                    body: None,
                    error: error.to_string(),
                    latency_ms: elapsed_ms(started),
                };
            }
        };

        let method: http::Method = task.http_method.into();
        let request = self
            .client
            .request(method, &task.target_url)
            .headers(headers)
            .json(&task.body);

        match request.send().await {
            Ok(response) => classify_response(response, started).await,
            Err(error) => classify_send_error(error, started),
        }
    }
}

/// Build the outbound header map: `Content-Type: application/json` by
/// default, overridden if the task's own headers specify one — caller
/// headers win on collision (original_source fixes this detail; spec.md
/// leaves it "unspecified, not relied upon").
fn build_headers(
    task_headers: &std::collections::HashMap<String, String>,
) -> Result<header::HeaderMap, DeliveryError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    for (name, value) in task_headers {
        let header_name = header::HeaderName::try_from(name.as_str())
            .map_err(|_| DeliveryError::InvalidHeader(name.clone()))?;
        let header_value = header::HeaderValue::try_from(value.as_str())
            .map_err(|_| DeliveryError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

async fn classify_response(response: reqwest::Response, started: Instant) -> Outcome {
    let status = response.status();
    let latency_ms = elapsed_ms(started);
    let body_excerpt = response.text().await.unwrap_or_default();
    let body = Some(body_excerpt.clone());

    if status.is_success() {
        return Outcome::Success {
            status: status.as_u16(),
            body,
            latency_ms,
        };
    }

    if (300..400).contains(&status.as_u16()) {
        return Outcome::Terminal {
            kind: TerminalKind::NonSuccess,
            status: Some(status.as_u16()),
            body,
            error: format!("non-2xx redirect response: {status}; body: {body_excerpt}"),
            latency_ms,
        };
    }

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return Outcome::Retryable {
            kind: RetryableKind::TransientClient,
            status: Some(status.as_u16()),
            body,
            error: format!("transient client error: {status}; body: {body_excerpt}"),
            latency_ms,
        };
    }

    if status.is_client_error() {
        return Outcome::Terminal {
            kind: TerminalKind::ClientError,
            status: Some(status.as_u16()),
            body,
            error: format!("client error: {status}; body: {body_excerpt}"),
            latency_ms,
        };
    }

    // 5xx.
    Outcome::Retryable {
        kind: RetryableKind::ServerError,
        status: Some(status.as_u16()),
        body,
        error: format!("server error: {status}; body: {body_excerpt}"),
        latency_ms,
    }
}

fn classify_send_error(error: reqwest::Error, started: Instant) -> Outcome {
    let latency_ms = elapsed_ms(started);

    if error.is_timeout() || error.is_connect() {
        return Outcome::Retryable {
            kind: RetryableKind::Network,
            status: None,
            body: None,
            error: error.to_string(),
            latency_ms,
        };
    }

    // Anything else (body encoding, redirect policy, etc.) is an
    // unexpected exception during send: treated as retryable per spec's
    // last row ("Any other exception during send").
    Outcome::Retryable {
        kind: RetryableKind::System,
        status: None,
        body: None,
        error: error.to_string(),
        latency_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMethod, NewTask};
    use chrono::Utc;
    use httpmock::prelude::*;
    use std::collections::HashMap;

    fn task_for(server: &MockServer, path: &str) -> Task {
        Task::new(
            NewTask {
                source_system: "billing".to_owned(),
                target_url: server.url(path),
                http_method: HttpMethod::Post,
                headers: HashMap::new(),
                body: serde_json::json!({"event": "invoice.paid"}),
                max_retries: 5,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn status_200_classifies_as_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(200).body("ok");
        });

        let executor = DeliveryExecutor::default();
        let outcome = executor.execute(&task_for(&server, "/hook")).await;

        mock.assert();
        assert!(outcome.is_success());
        assert_eq!(outcome.http_status(), Some(200));
    }

    #[tokio::test]
    async fn status_429_classifies_as_retryable_transient_client() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(429);
        });

        let executor = DeliveryExecutor::default();
        let outcome = executor.execute(&task_for(&server, "/hook")).await;

        match outcome {
            Outcome::Retryable { kind, status, .. } => {
                assert_eq!(kind, RetryableKind::TransientClient);
                assert_eq!(status, Some(429));
            }
            other => panic!("expected Retryable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_400_classifies_as_terminal_client_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(400);
        });

        let executor = DeliveryExecutor::default();
        let outcome = executor.execute(&task_for(&server, "/hook")).await;

        match outcome {
            Outcome::Terminal { kind, status, .. } => {
                assert_eq!(kind, TerminalKind::ClientError);
                assert_eq!(status, Some(400));
            }
            other => panic!("expected Terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_500_classifies_as_retryable_server_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(500);
        });

        let executor = DeliveryExecutor::default();
        let outcome = executor.execute(&task_for(&server, "/hook")).await;

        match outcome {
            Outcome::Retryable { kind, status, .. } => {
                assert_eq!(kind, RetryableKind::ServerError);
                assert_eq!(status, Some(500));
            }
            other => panic!("expected Retryable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_302_classifies_as_terminal_non_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(302);
        });

        let executor = DeliveryExecutor::default();
        let outcome = executor.execute(&task_for(&server, "/hook")).await;

        match outcome {
            Outcome::Terminal { kind, status, .. } => {
                assert_eq!(kind, TerminalKind::NonSuccess);
                assert_eq!(status, Some(302));
            }
            other => panic!("expected Terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_classifies_as_retryable_network() {
        // Nothing listens on this port; the send should fail to connect.
        let mut task = task_for(&MockServer::start(), "/hook");
        task.target_url = "http://127.0.0.1:1".to_owned();

        let executor = DeliveryExecutor::new(Duration::from_millis(200), Duration::from_secs(2));
        let outcome = executor.execute(&task).await;

        match outcome {
            Outcome::Retryable { kind, status, .. } => {
                assert_eq!(kind, RetryableKind::Network);
                assert_eq!(status, None);
            }
            other => panic!("expected Retryable(network), got {other:?}"),
        }
    }

    #[test]
    fn caller_header_overrides_default_content_type() {
        let mut task_headers = HashMap::new();
        task_headers.insert("Content-Type".to_owned(), "application/xml".to_owned());

        let headers = build_headers(&task_headers).unwrap();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/xml");
    }
}
