//! # Intake Service
//!
//! Creates a task: assigns an id, persists it, and enqueues it. See spec
//! §4.D. Persistence is the commitment point — it happens before the
//! queue push, and a push failure is swallowed (the retry scheduler will
//! pick the task up on its next sweep) rather than surfaced to the
//! caller. This ordering is, per spec §9, "the single most important
//! decision" behind the at-least-once guarantee.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{NewTask, Task, TaskStatus};
use crate::queue::Queue;
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

pub struct IntakeService {
    task_store: Arc<dyn TaskStore>,
    queue: Arc<dyn Queue>,
}

impl IntakeService {
    pub fn new(task_store: Arc<dyn TaskStore>, queue: Arc<dyn Queue>) -> Self {
        Self { task_store, queue }
    }

    /// Persist `new_task`, then best-effort enqueue it. A `StoreError`
    /// here is surfaced to the caller with no queue write attempted. A
    /// queue push failure is logged and swallowed: the caller still
    /// receives success, since the record has already been committed.
    pub async fn create_task(&self, new_task: NewTask) -> Result<CreatedTask, StoreError> {
        let task = Task::new(new_task, Utc::now());
        let task_id = task.task_id;

        self.task_store.insert(task).await?;
        metrics::counter!("notification_tasks_created_total").increment(1);

        if let Err(error) = self.queue.push(task_id).await {
            warn!(
                task_id = %task_id,
                error = %error,
                "failed to enqueue task after persisting it; the retry scheduler will pick it up"
            );
        }

        Ok(CreatedTask {
            task_id,
            status: TaskStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpMethod;
    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryTaskStore;
    use std::collections::HashMap;

    fn new_task() -> NewTask {
        NewTask {
            source_system: "billing".to_owned(),
            target_url: "https://example.com/hook".to_owned(),
            http_method: HttpMethod::Post,
            headers: HashMap::new(),
            body: serde_json::json!({"a": 1}),
            max_retries: 5,
        }
    }

    #[tokio::test]
    async fn create_task_persists_pending_task_and_enqueues_it() {
        let task_store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let intake = IntakeService::new(task_store.clone(), queue.clone());

        let created = intake.create_task(new_task()).await.unwrap();

        assert_eq!(created.status, TaskStatus::Pending);

        let stored = task_store
            .find_by_task_id(created.task_id)
            .await
            .unwrap()
            .expect("task should be persisted");
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.completed_at.is_none());

        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_store_failure_surfaces_to_caller_without_enqueue() {
        let task_store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());

        // Pre-seed a task with a known id by constructing it directly and
        // inserting it, then trying to create "the same" task through the
        // store's duplicate-detection path via a second raw insert.
        let existing = Task::new(new_task(), Utc::now());
        task_store.insert(existing.clone()).await.unwrap();

        let err = task_store.insert(existing).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTaskId(_)));
        assert_eq!(queue.size().await.unwrap(), 0);
    }
}
