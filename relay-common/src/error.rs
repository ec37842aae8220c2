//! Error taxonomy shared across `relay-common`'s components. Mirrors the
//! teacher's `pgqueue::PgQueueError`: one `thiserror` enum per seam,
//! wrapping the underlying library error rather than discarding it.

use thiserror::Error;

/// Errors that can originate from the `TaskStore`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("taskId {0} already exists")]
    DuplicateTaskId(uuid::Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors that can originate from the `Queue`.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
}

/// Errors from the delivery executor's attempt to send a request, prior to
/// classification. These never escape `delivery::execute` as-is; they are
/// folded into `Outcome::Retryable`/`Outcome::Terminal` variants, but are
/// kept as a distinct type to make the failure mode explicit at the call
/// site in tests.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("{0} is not a valid HttpMethod")]
    InvalidHttpMethod(String),
    #[error("invalid target URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}
