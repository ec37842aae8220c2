//! # Worker Pool
//!
//! N concurrent consumers popping task-ids off the queue, claiming them
//! via CAS, and running them through the delivery executor and outcome
//! handler. See spec §4.G.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_common::delivery::DeliveryExecutor;
use relay_common::health::{HealthHandle, HealthRegistry};
use relay_common::model::TaskStatus;
use relay_common::outcome::OutcomeHandler;
use relay_common::queue::Queue;
use relay_common::store::TaskStore;
use time::Duration as TimeDuration;
use tracing::{error, info, warn};

pub struct WorkerPool {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
    executor: Arc<DeliveryExecutor>,
    outcome_handler: Arc<OutcomeHandler>,
    concurrency: usize,
    poll_timeout: Duration,
    error_backoff: Duration,
    shutdown_grace: Duration,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        queue: Arc<dyn Queue>,
        executor: Arc<DeliveryExecutor>,
        outcome_handler: Arc<OutcomeHandler>,
        concurrency: usize,
        poll_timeout: Duration,
        error_backoff: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            task_store,
            queue,
            executor,
            outcome_handler,
            concurrency,
            poll_timeout,
            error_backoff,
            shutdown_grace,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flip the running flag so loops exit after their current
    /// iteration. Does not itself wait for drain; see `shutdown`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn `concurrency` worker loops, each registered with
    /// `health_registry` under its own name and reporting in on every
    /// iteration. Returns once every loop has either run to completion
    /// or been interrupted after the shutdown grace period.
    pub async fn run(&self, name_prefix: &str, health_registry: &HealthRegistry) {
        let mut handles = Vec::with_capacity(self.concurrency);

        for index in 0..self.concurrency {
            let worker_name = format!("{name_prefix}-{index}");
            let liveness = health_registry
                .register(worker_name.clone(), TimeDuration::seconds(30))
                .await;
            let task_store = self.task_store.clone();
            let queue = self.queue.clone();
            let executor = self.executor.clone();
            let outcome_handler = self.outcome_handler.clone();
            let poll_timeout = self.poll_timeout;
            let error_backoff = self.error_backoff;
            let running = self.running.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_name,
                    task_store,
                    queue,
                    executor,
                    outcome_handler,
                    poll_timeout,
                    error_backoff,
                    running,
                    liveness,
                )
                .await;
            }));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(self.shutdown_grace, join_handles(handles))
            .await
            .is_err()
        {
            warn!(
                "worker pool did not drain within {:?}; remaining workers were interrupted",
                self.shutdown_grace
            );
            for abort_handle in abort_handles {
                abort_handle.abort();
            }
        }
    }
}

async fn join_handles(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_name: String,
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
    executor: Arc<DeliveryExecutor>,
    outcome_handler: Arc<OutcomeHandler>,
    poll_timeout: Duration,
    error_backoff: Duration,
    running: Arc<AtomicBool>,
    liveness: HealthHandle,
) {
    info!(worker = %worker_name, "worker loop starting");

    while running.load(Ordering::SeqCst) {
        liveness.report_healthy().await;

        match run_one_iteration(&task_store, &queue, &executor, &outcome_handler, poll_timeout)
            .await
        {
            Ok(()) => {}
            Err(error) => {
                error!(worker = %worker_name, %error, "unexpected error in worker loop");
                tokio::time::sleep(error_backoff).await;
            }
        }
    }

    info!(worker = %worker_name, "worker loop stopped");
}

async fn run_one_iteration(
    task_store: &Arc<dyn TaskStore>,
    queue: &Arc<dyn Queue>,
    executor: &Arc<DeliveryExecutor>,
    outcome_handler: &Arc<OutcomeHandler>,
    poll_timeout: Duration,
) -> Result<(), crate::error::WorkerError> {
    let popped = queue.pop_blocking(poll_timeout).await?;

    let Some(task_id) = popped else {
        return Ok(());
    };

    if task_store.find_by_task_id(task_id).await?.is_none() {
        // Stale queue entry referencing a pruned row: drop silently.
        return Ok(());
    }

    let now = Utc::now();
    let claimed = task_store
        .compare_and_set_status(task_id, TaskStatus::Pending, TaskStatus::Processing, now)
        .await?;

    if !claimed {
        // Another worker already owns this task.
        return Ok(());
    }

    // Re-load to capture the fresh `updated_at` set by the CAS.
    let Some(mut claimed_task) = task_store.find_by_task_id(task_id).await? else {
        return Ok(());
    };

    // Open question in spec §9, resolved toward the safer variant:
    // a task whose `next_retry_at` is still in the future should not be
    // dispatched early just because it reached the front of the queue.
    // Release the claim and skip; the retry scheduler will re-enqueue it
    // once its backoff window elapses.
    if let Some(next_retry_at) = claimed_task.next_retry_at {
        if next_retry_at > now {
            task_store
                .compare_and_set_status(
                    task_id,
                    TaskStatus::Processing,
                    TaskStatus::Pending,
                    Utc::now(),
                )
                .await?;
            return Ok(());
        }
    }

    metrics::counter!("notification_dispatch_attempts_total").increment(1);
    let outcome = executor.execute(&claimed_task).await;
    claimed_task.updated_at = now;
    outcome_handler
        .handle(claimed_task, outcome, Utc::now())
        .await?;

    Ok(())
}
