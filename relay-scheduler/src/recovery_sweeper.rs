//! # Recovery Sweeper
//!
//! Finds `PROCESSING` tasks abandoned by a worker that crashed or was
//! killed mid-delivery (no outcome was ever recorded) and forces them
//! back to `PENDING` so they re-enter the retry path instead of being
//! stuck forever (spec §4.I).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_common::model::TaskStatus;
use relay_common::queue::Queue;
use relay_common::store::TaskStore;
use tracing::{info, warn};

use crate::error::SchedulerError;

pub struct RecoverySweeper {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
    stuck_threshold: Duration,
}

impl RecoverySweeper {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        queue: Arc<dyn Queue>,
        stuck_threshold: Duration,
    ) -> Self {
        Self {
            task_store,
            queue,
            stuck_threshold,
        }
    }

    /// Runs a single scan-and-recover pass, returning the number of
    /// tasks recovered.
    pub async fn run_once(&self) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let threshold = now
            - chrono::Duration::from_std(self.stuck_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let stuck = self.task_store.find_stuck(threshold).await?;

        let mut recovered = 0;
        for task in stuck {
            let reset = self
                .task_store
                .compare_and_set_status(
                    task.task_id,
                    TaskStatus::Processing,
                    TaskStatus::Pending,
                    now,
                )
                .await?;

            if !reset {
                // Finished (or got re-claimed) between find_stuck and here.
                continue;
            }

            if let Err(error) = self.queue.push(task.task_id).await {
                warn!(task_id = %task.task_id, %error, "recovery sweeper failed to enqueue recovered task");
                continue;
            }

            recovered += 1;
        }

        metrics::counter!("notification_recovery_sweeper_ticks_total").increment(1);
        metrics::counter!("notification_recovery_sweeper_recovered_total").increment(recovered as u64);

        if recovered > 0 {
            info!(recovered, "recovery sweeper reset abandoned tasks");
        }

        Ok(recovered)
    }
}
