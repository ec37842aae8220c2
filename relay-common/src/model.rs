//! The data model shared by every component of the relay: `Task` and
//! `AttemptLog`, plus the small value types that hang off them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de::Visitor, Deserialize, Serialize};
use uuid::Uuid;

/// Supported HTTP methods for an outbound notification. A narrower set
/// than `http::Method`'s full range: GET/DELETE/etc. make no sense for a
/// body-carrying notification call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Post
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseHttpMethodError(pub String);

impl fmt::Display for ParseHttpMethodError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a valid HttpMethod", self.0)
    }
}

impl std::error::Error for ParseHttpMethodError {}

impl FromStr for HttpMethod {
    type Err = ParseHttpMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_ref() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            invalid => Err(ParseHttpMethodError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(val: HttpMethod) -> Self {
        match val {
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
        }
    }
}

struct HttpMethodVisitor;

impl<'de> Visitor<'de> for HttpMethodVisitor {
    type Value = HttpMethod;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "one of POST, PUT, PATCH")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        HttpMethod::from_str(s)
            .map_err(|_| serde::de::Error::invalid_value(serde::de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(HttpMethodVisitor)
    }
}

impl Serialize for HttpMethod {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// The lifecycle state of a `Task`. See spec §3's state machine: PENDING is
/// the only state from which a worker claims, PROCESSING is held
/// exclusively by one worker, SUCCESS/FAILED are terminal (barring manual
/// retry resetting FAILED back to PENDING).
#[derive(Debug, PartialEq, Eq, Clone, Copy, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Processing => write!(f, "PROCESSING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single notification-delivery job. One row in the `notification_tasks`
/// table; see spec §3 for the field-by-field semantics and invariants.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: Uuid,
    pub source_system: String,
    pub target_url: String,
    pub http_method: HttpMethod,
    #[sqlx(json)]
    pub headers: HashMap<String, String>,
    #[sqlx(json)]
    pub body: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_http_status: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Default retry budget when a create-task request omits `maxRetries`.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Parameters required to construct a new `Task`; everything else
/// (`taskId`, timestamps, counters) is assigned by `intake::create_task`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub source_system: String,
    pub target_url: String,
    #[serde(default)]
    pub http_method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

impl Task {
    /// Construct a fresh, unpersisted `Task` in `PENDING` state from a
    /// validated `NewTask`. Invariant 1 and 2 of spec §3 hold by
    /// construction: `completed_at` is `None` and `retry_count` is 0.
    pub fn new(new_task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            source_system: new_task.source_system,
            target_url: new_task.target_url,
            http_method: new_task.http_method,
            headers: new_task.headers,
            body: new_task.body,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: new_task.max_retries,
            next_retry_at: None,
            last_http_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Reset a terminally-FAILED task back to PENDING for manual retry.
    /// Caller is responsible for having CAS-gated this on `status =
    /// FAILED` beforehand (spec §9, "Manual-retry race").
    pub fn reset_for_manual_retry(&mut self, now: DateTime<Utc>) {
        self.retry_count = 0;
        self.next_retry_at = None;
        self.completed_at = None;
        self.status = TaskStatus::Pending;
        self.updated_at = now;
    }
}

/// One row per executed dispatch attempt (success or failure). Append-only;
/// see spec §3 "Attempt log".
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptLog {
    pub task_id: Uuid,
    pub attempt_number: i32,
    pub http_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

pub const RESPONSE_BODY_TRUNCATE_CHARS: usize = 2_000;
pub const ERROR_MESSAGE_TRUNCATE_CHARS: usize = 1_000;

/// Truncate a string to at most `max_chars` Unicode scalar values,
/// respecting UTF-8 boundaries rather than byte offsets (original_source
/// fixes this detail; spec.md leaves "truncated to N chars" implicit).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    s.chars().take(max_chars).collect()
}

impl AttemptLog {
    pub fn new(
        task_id: Uuid,
        attempt_number: i32,
        http_status: Option<i32>,
        response_body: Option<String>,
        error_message: Option<String>,
        latency_ms: i64,
        success: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            attempt_number,
            http_status,
            response_body: response_body
                .map(|s| truncate_chars(&s, RESPONSE_BODY_TRUNCATE_CHARS)),
            error_message: error_message
                .map(|s| truncate_chars(&s, ERROR_MESSAGE_TRUNCATE_CHARS)),
            latency_ms,
            success,
            created_at: now,
        }
    }
}
