//! # Retry Scheduler
//!
//! Periodically re-enqueues `PENDING` tasks whose `next_retry_at` has
//! elapsed. The worker pool only ever dispatches what is on the queue;
//! this is what puts due retries back on it (spec §4.H).

use std::sync::Arc;

use chrono::Utc;
use relay_common::queue::Queue;
use relay_common::store::TaskStore;
use tracing::{info, warn};

use crate::error::SchedulerError;

pub struct RetryScheduler {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
    batch_size: i64,
}

impl RetryScheduler {
    pub fn new(task_store: Arc<dyn TaskStore>, queue: Arc<dyn Queue>, batch_size: i64) -> Self {
        Self {
            task_store,
            queue,
            batch_size,
        }
    }

    /// Runs a single scan-and-enqueue pass, returning the number of
    /// tasks pushed.
    pub async fn run_once(&self) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let due = self.task_store.find_dispatchable(now, self.batch_size).await?;

        let mut enqueued = 0;
        for task in due {
            if let Err(error) = self.queue.push(task.task_id).await {
                // Matches the intake service's stance: a push failure
                // here just means this task waits for the next pass.
                warn!(task_id = %task.task_id, %error, "retry scheduler failed to enqueue task");
                continue;
            }
            enqueued += 1;
        }

        metrics::counter!("notification_retry_scheduler_ticks_total").increment(1);
        metrics::counter!("notification_retry_scheduler_enqueued_total").increment(enqueued as u64);

        if enqueued > 0 {
            info!(enqueued, "retry scheduler enqueued due tasks");
        }

        Ok(enqueued)
    }
}
