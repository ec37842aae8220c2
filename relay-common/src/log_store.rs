//! # Log Store
//!
//! An append-only per-attempt log, keyed by `taskId`. See spec §4.B.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::AttemptLog;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append-only write. Truncation of `response_body`/`error_message`
    /// is already applied by `AttemptLog::new`, matching spec's framing
    /// of truncation as "the store's responsibility".
    async fn append(&self, entry: AttemptLog) -> Result<(), StoreError>;

    /// Entries ordered by `attempt_number` ascending.
    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Vec<AttemptLog>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    entries: Arc<RwLock<HashMap<Uuid, Vec<AttemptLog>>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: AttemptLog) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.entry(entry.task_id).or_default().push(entry);
        Ok(())
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Vec<AttemptLog>, StoreError> {
        let entries = self.entries.read().await;
        let mut found = entries.get(&task_id).cloned().unwrap_or_default();
        found.sort_by_key(|entry| entry.attempt_number);
        Ok(found)
    }
}

pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn append(&self, entry: AttemptLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO notification_logs
    (task_id, attempt_number, http_status, response_body, error_message,
     latency_ms, success, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.task_id)
        .bind(entry.attempt_number)
        .bind(entry.http_status)
        .bind(&entry.response_body)
        .bind(&entry.error_message)
        .bind(entry.latency_ms)
        .bind(entry.success)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> Result<Vec<AttemptLog>, StoreError> {
        let entries = sqlx::query_as::<_, AttemptLog>(
            r#"
SELECT * FROM notification_logs
WHERE task_id = $1
ORDER BY attempt_number ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn entries_are_returned_ascending_by_attempt_number() {
        let store = InMemoryLogStore::new();
        let task_id = Uuid::new_v4();

        store
            .append(AttemptLog::new(
                task_id,
                2,
                Some(500),
                None,
                Some("boom".to_owned()),
                12,
                false,
                Utc::now(),
            ))
            .await
            .unwrap();
        store
            .append(AttemptLog::new(
                task_id, 1, Some(503), None, None, 8, false, Utc::now(),
            ))
            .await
            .unwrap();

        let entries = store.find_by_task_id(task_id).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt_number, 1);
        assert_eq!(entries[1].attempt_number, 2);
    }

    #[tokio::test]
    async fn unknown_task_id_returns_empty() {
        let store = InMemoryLogStore::new();
        let entries = store.find_by_task_id(Uuid::new_v4()).await.unwrap();
        assert!(entries.is_empty());
    }
}
