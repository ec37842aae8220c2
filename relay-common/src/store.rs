//! # Task Store
//!
//! The durable mapping of `taskId -> Task`, and the single primitive
//! (`compare_and_set_status`) that the whole system relies on for
//! exclusive dispatch. See spec §4.A.
//!
//! The trait is intentionally the only thing worker/scheduler code
//! depends on: "Any store that provides optimistic-concurrency updates
//! on a single row suffices" (spec §9). `InMemoryTaskStore` backs tests;
//! `PgTaskStore` is the production implementation, modeled on
//! `hook_common::pgqueue::PgQueue`'s use of a conditional `UPDATE`
//! instead of row-level locks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Task, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with `StoreError::DuplicateTaskId` if `task.task_id` is
    /// already present (spec invariant 5).
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Option<Task>, StoreError>;

    /// The only primitive used to claim a task. Returns `true` iff the
    /// row's current status equaled `expected`, in which case it is now
    /// `new` and `updated_at` is `now`. A `false` return is a normal
    /// outcome (lost the race), not an error.
    async fn compare_and_set_status(
        &self,
        task_id: Uuid,
        expected: TaskStatus,
        new: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Unconditional update of all mutable fields. Only safe to call
    /// after the caller holds a claim (a successful CAS) or is the
    /// recovery sweeper forcing a reset of a stuck row.
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// Tasks with `status = PENDING` and `next_retry_at` null or past,
    /// ordered by `created_at` ascending, capped at `limit`.
    async fn find_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError>;

    /// Tasks with `status = PROCESSING` whose `updated_at` predates
    /// `threshold`.
    async fn find_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;

    async fn count_by_status(&self, status: TaskStatus) -> Result<i64, StoreError>;
}

/// An in-process `TaskStore` backed by a `HashMap` behind a single
/// `RwLock`. Suffices for tests and for single-process deployments; the
/// lock itself is what makes `compare_and_set_status` atomic here, the
/// same way `FOR UPDATE`/a conditional `UPDATE` makes it atomic in
/// Postgres.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::DuplicateTaskId(task.task_id));
        }
        tasks.insert(task.task_id, task);
        Ok(())
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&task_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        task_id: Uuid,
        expected: TaskStatus,
        new: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task_id) {
            Some(task) if task.status == expected => {
                task.status = new;
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn find_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut dispatchable: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.next_retry_at.map(|at| at <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        dispatchable.sort_by_key(|t| t.created_at);
        dispatchable.truncate(limit.max(0) as usize);
        Ok(dispatchable)
    }

    async fn find_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Processing && t.updated_at < threshold)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<i64, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| t.status == status).count() as i64)
    }
}

/// A `TaskStore` backed by a `notification_tasks` table in PostgreSQL.
/// Claims use a conditional `UPDATE ... WHERE status = $expected`, the
/// same CAS-via-SQL approach `PgQueue::dequeue`'s `FOR UPDATE SKIP
/// LOCKED` achieves by different means: here a single row is targeted by
/// primary key, so no explicit row lock is needed beyond the implicit
/// one `UPDATE` takes.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
INSERT INTO notification_tasks
    (task_id, source_system, target_url, http_method, headers, body, status,
     retry_count, max_retries, next_retry_at, last_http_status, last_error,
     created_at, updated_at, completed_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(task.task_id)
        .bind(&task.source_system)
        .bind(&task.target_url)
        .bind(task.http_method.to_string())
        .bind(sqlx::types::Json(&task.headers))
        .bind(sqlx::types::Json(&task.body))
        .bind(task.status)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(task.next_retry_at)
        .bind(task.last_http_status)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateTaskId(task.task_id))
            }
            Err(error) => Err(StoreError::Database(error)),
        }
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let task = sqlx::query_as::<_, Task>(
            r#"SELECT * FROM notification_tasks WHERE task_id = $1"#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    async fn compare_and_set_status(
        &self,
        task_id: Uuid,
        expected: TaskStatus,
        new: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE notification_tasks
SET status = $1, updated_at = $2
WHERE task_id = $3 AND status = $4
            "#,
        )
        .bind(new)
        .bind(now)
        .bind(task_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
UPDATE notification_tasks
SET
    status = $1,
    retry_count = $2,
    next_retry_at = $3,
    last_http_status = $4,
    last_error = $5,
    updated_at = $6,
    completed_at = $7
WHERE task_id = $8
            "#,
        )
        .bind(task.status)
        .bind(task.retry_count)
        .bind(task.next_retry_at)
        .bind(task.last_http_status)
        .bind(&task.last_error)
        .bind(task.updated_at)
        .bind(task.completed_at)
        .bind(task.task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
SELECT * FROM notification_tasks
WHERE status = $1 AND (next_retry_at IS NULL OR next_retry_at <= $2)
ORDER BY created_at ASC
LIMIT $3
            "#,
        )
        .bind(TaskStatus::Pending)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn find_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
SELECT * FROM notification_tasks
WHERE status = $1 AND updated_at < $2
            "#,
        )
        .bind(TaskStatus::Processing)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM notification_tasks WHERE status = $1"#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMethod, NewTask};
    use std::collections::HashMap as Map;

    fn sample_task(now: DateTime<Utc>) -> Task {
        Task::new(
            NewTask {
                source_system: "billing".to_owned(),
                target_url: "https://example.com/hook".to_owned(),
                http_method: HttpMethod::Post,
                headers: Map::new(),
                body: serde_json::json!({"ok": true}),
                max_retries: 5,
            },
            now,
        )
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_task_id() {
        let store = InMemoryTaskStore::new();
        let task = sample_task(Utc::now());

        store.insert(task.clone()).await.unwrap();
        let err = store.insert(task.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTaskId(id) if id == task.task_id));
    }

    #[tokio::test]
    async fn cas_succeeds_exactly_once_under_contention() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = sample_task(Utc::now());
        let task_id = task.task_id;
        store.insert(task).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set_status(
                        task_id,
                        TaskStatus::Pending,
                        TaskStatus::Processing,
                        Utc::now(),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn find_dispatchable_orders_by_created_at_and_skips_future_retries() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        let mut older = sample_task(now - chrono::Duration::seconds(10));
        older.source_system = "older".to_owned();
        let mut newer = sample_task(now);
        newer.source_system = "newer".to_owned();
        let mut future_retry = sample_task(now);
        future_retry.source_system = "future".to_owned();
        future_retry.next_retry_at = Some(now + chrono::Duration::seconds(60));

        store.insert(older.clone()).await.unwrap();
        store.insert(newer.clone()).await.unwrap();
        store.insert(future_retry).await.unwrap();

        let dispatchable = store.find_dispatchable(now, 100).await.unwrap();

        assert_eq!(dispatchable.len(), 2);
        assert_eq!(dispatchable[0].source_system, "older");
        assert_eq!(dispatchable[1].source_system, "newer");
    }

    #[tokio::test]
    async fn find_stuck_returns_only_processing_past_threshold() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        let mut stuck = sample_task(now);
        stuck.status = TaskStatus::Processing;
        stuck.updated_at = now - chrono::Duration::minutes(10);
        let mut fresh = sample_task(now);
        fresh.status = TaskStatus::Processing;
        fresh.updated_at = now;

        store.insert(stuck.clone()).await.unwrap();
        store.insert(fresh).await.unwrap();

        let threshold = now - chrono::Duration::minutes(5);
        let found = store.find_stuck(threshold).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].task_id, stuck.task_id);
    }
}
