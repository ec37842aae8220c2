//! # Queue
//!
//! A best-effort FIFO of task-ids with a blocking pop. See spec §4.C: the
//! queue is deliberately dumb and is never the source of truth — losing
//! entries is tolerated because the retry scheduler (§4.H) and recovery
//! sweeper (§4.I) rediscover work from the `TaskStore`, and duplicate
//! pops are tolerated because claiming is CAS-gated.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::QueueError;

#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue at the head. No deduplication: pushing a `task_id` that is
    /// already queued is harmless, since claims are CAS-gated.
    async fn push(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// Remove from the tail, waiting up to `timeout` for an entry to
    /// become available. Returns `None` on timeout, never an error for
    /// "nothing there" — only genuine unavailability of the queue itself
    /// is an `Err`.
    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError>;

    async fn size(&self) -> Result<usize, QueueError>;
}

/// An in-process FIFO guarded by a single lock, with a `Notify` used to
/// wake up blocked poppers without busy-waiting. This is the queue
/// implementation the design explicitly allows ("in-memory list"); it
/// never loses entries on its own, but a process crash loses everything
/// in it, which is the loss mode the rest of the system is built to
/// tolerate.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<VecDeque<Uuid>>>,
    notify: Arc<Notify>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn push(&self, task_id: Uuid) -> Result<(), QueueError> {
        let mut queue = self.inner.lock().await;
        queue.push_front(task_id);
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(task_id) = queue.pop_back() {
                    return Ok(Some(task_id));
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let remaining = deadline - now;
            // A notification can race with another popper draining the
            // queue first; looping re-checks rather than trusting a
            // single wakeup to mean "an item is mine".
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn size(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().await.len())
    }
}

/// A `Queue` backed by its own `queue_entries` table in PostgreSQL,
/// deliberately separate from `notification_tasks` — matching spec
/// §4.C's framing of the queue as "not the source of truth" and
/// replaceable independently of the store. Dequeuing uses the same `FOR
/// UPDATE SKIP LOCKED` idiom `hook_common::pgqueue::PgQueue::dequeue`
/// uses to let concurrent pollers avoid contending on the same row; the
/// blocking wait is a plain poll loop rather than `LISTEN`/`NOTIFY`,
/// trading a little latency for simplicity.
pub struct PgQueue {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn push(&self, task_id: Uuid) -> Result<(), QueueError> {
        sqlx::query(r#"INSERT INTO queue_entries (task_id, enqueued_at) VALUES ($1, NOW())"#)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueueUnavailable(error.to_string()))?;
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let popped: Option<(i64, Uuid)> = sqlx::query_as(
                r#"
DELETE FROM queue_entries
WHERE id = (
    SELECT id FROM queue_entries
    ORDER BY id ASC
    FOR UPDATE SKIP LOCKED
    LIMIT 1
)
RETURNING id, task_id
                "#,
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| QueueError::QueueUnavailable(error.to_string()))?;

            if let Some((_, task_id)) = popped {
                return Ok(Some(task_id));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn size(&self) -> Result<usize, QueueError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM queue_entries"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| QueueError::QueueUnavailable(error.to_string()))?;
        Ok(count.max(0) as usize)
    }
}
