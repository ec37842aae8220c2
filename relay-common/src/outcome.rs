//! # Outcome Handler
//!
//! Applies a classified `Outcome` (from `crate::delivery`) to a task's
//! durable record and appends the corresponding attempt log entry. See
//! spec §4.F. The log append happens before the task-state save so that
//! a crash between the two leaves a visible trail (the attempt log row)
//! even if the task row itself is never updated — the recovery sweeper
//! (§4.I) is what reconciles a task left mid-transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::delivery::Outcome;
use crate::error::StoreError;
use crate::log_store::LogStore;
use crate::model::{AttemptLog, Task, TaskStatus};
use crate::retry::RetryPolicy;
use crate::store::TaskStore;

pub struct OutcomeHandler {
    task_store: Arc<dyn TaskStore>,
    log_store: Arc<dyn LogStore>,
    retry_policy: RetryPolicy,
}

impl OutcomeHandler {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        log_store: Arc<dyn LogStore>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            task_store,
            log_store,
            retry_policy,
        }
    }

    /// Apply `outcome` to `task` (expected to be held as `PROCESSING` by
    /// the caller) and persist both the log entry and the resulting task
    /// state.
    pub async fn handle(&self, mut task: Task, outcome: Outcome, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let attempt_number = task.retry_count + 1;

        let log_entry = AttemptLog::new(
            task.task_id,
            attempt_number,
            outcome.http_status(),
            outcome.response_body(),
            outcome.error_message(),
            outcome.latency_ms(),
            outcome.is_success(),
            now,
        );
        self.log_store.append(log_entry).await?;
        metrics::histogram!("notification_dispatch_duration_seconds")
            .record(outcome.latency_ms() as f64 / 1000.0);

        match outcome {
            Outcome::Success { status, .. } => {
                task.status = TaskStatus::Success;
                task.last_http_status = Some(status as i32);
                task.last_error = None;
                task.completed_at = Some(now);
                task.updated_at = now;
                metrics::counter!("notification_tasks_completed_total").increment(1);
            }
            Outcome::Terminal { status, error, .. } => {
                task.retry_count += 1;
                task.last_http_status = status.map(|s| s as i32);
                task.last_error = Some(error);
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                task.updated_at = now;
                metrics::counter!("notification_tasks_failed_total").increment(1);
            }
            Outcome::Retryable { status, error, .. } => {
                task.retry_count += 1;
                task.last_http_status = status.map(|s| s as i32);
                task.last_error = Some(error);

                if task.retry_count < task.max_retries {
                    let delay = self.retry_policy.backoff(task.retry_count);
                    task.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
                    task.status = TaskStatus::Pending;
                    task.updated_at = now;
                    metrics::counter!("notification_tasks_retried_total").increment(1);
                } else {
                    task.status = TaskStatus::Failed;
                    task.completed_at = Some(now);
                    task.updated_at = now;
                    metrics::counter!("notification_tasks_failed_total").increment(1);
                }
            }
        }

        self.task_store.save(&task).await?;
        Ok(task)
    }
}
