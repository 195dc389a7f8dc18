//! Launch queue repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::records::{QueueEntryRecord, QueueFilter};
use crate::{DbError, DbResult};

#[async_trait]
pub trait QueueRepo: Send + Sync {
    /// Add a manual (schedule-less) or scheduled entry to the launch queue.
    async fn enqueue(
        &self,
        project_id: Uuid,
        schedule_id: Option<Uuid>,
        launch_config_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<QueueEntryRecord>;
    async fn get(&self, id: Uuid) -> DbResult<QueueEntryRecord>;
    async fn list(&self, filter: QueueFilter) -> DbResult<Vec<QueueEntryRecord>>;
    /// Undispatched entries, oldest first.
    async fn pending_fifo(&self) -> DbResult<Vec<QueueEntryRecord>>;
    /// Atomically claim an entry for a launched pipeline. Returns false if
    /// another dispatcher got there first.
    async fn mark_dispatched(
        &self,
        id: Uuid,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;
    async fn delete(&self, id: Uuid) -> DbResult<()>;
    /// Remove dispatched entries older than `cutoff`. Returns how many rows
    /// were deleted.
    async fn purge_dispatched(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

/// PostgreSQL implementation of QueueRepo.
pub struct PgQueueRepo {
    pool: PgPool,
}

impl PgQueueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepo for PgQueueRepo {
    async fn enqueue(
        &self,
        project_id: Uuid,
        schedule_id: Option<Uuid>,
        launch_config_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<QueueEntryRecord> {
        let entry = sqlx::query_as::<_, QueueEntryRecord>(
            r#"
            INSERT INTO queue_entries (id, created_at, project_id, schedule_id, launch_config_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(now)
        .bind(project_id)
        .bind(schedule_id)
        .bind(launch_config_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> DbResult<QueueEntryRecord> {
        let entry =
            sqlx::query_as::<_, QueueEntryRecord>("SELECT * FROM queue_entries WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("queue entry {}", id)))?;
        Ok(entry)
    }

    async fn list(&self, filter: QueueFilter) -> DbResult<Vec<QueueEntryRecord>> {
        let limit = filter.limit.unwrap_or(i64::MAX);
        let entries = if filter.only_pending {
            sqlx::query_as::<_, QueueEntryRecord>(
                "SELECT * FROM queue_entries WHERE NOT dispatched ORDER BY created_at, id LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, QueueEntryRecord>(
                "SELECT * FROM queue_entries ORDER BY created_at, id LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(entries)
    }

    async fn pending_fifo(&self) -> DbResult<Vec<QueueEntryRecord>> {
        let entries = sqlx::query_as::<_, QueueEntryRecord>(
            "SELECT * FROM queue_entries WHERE NOT dispatched ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET dispatched = TRUE, dispatched_at = $2, pipeline_id = $3
            WHERE id = $1 AND NOT dispatched
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(pipeline_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM queue_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_dispatched(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM queue_entries WHERE dispatched AND dispatched_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
