//! Schedule repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::records::{NewSchedule, QueueEntryRecord, ScheduleRecord};
use crate::{DbError, DbResult};

#[async_trait]
pub trait ScheduleRepo: Send + Sync {
    /// Create a schedule for a launch config, or replace the existing one.
    async fn upsert(&self, schedule: NewSchedule) -> DbResult<ScheduleRecord>;
    async fn get(&self, id: Uuid) -> DbResult<ScheduleRecord>;
    async fn get_by_launch_config(&self, launch_config_id: Uuid) -> DbResult<ScheduleRecord>;
    async fn list(&self) -> DbResult<Vec<ScheduleRecord>>;
    async fn list_enabled(&self) -> DbResult<Vec<ScheduleRecord>>;
    async fn set_enabled(&self, id: Uuid, enabled: bool) -> DbResult<ScheduleRecord>;
    /// Disable every schedule at once. Returns how many rows changed.
    async fn disable_all(&self) -> DbResult<u64>;
    async fn delete(&self, id: Uuid) -> DbResult<()>;

    /// Record a firing for `due` and enqueue exactly one entry, under a row
    /// lock on the schedule. Returns `None` when the schedule is disabled,
    /// gone, or a concurrent ticker already fired this tick.
    async fn fire_if_due(
        &self,
        id: Uuid,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Option<QueueEntryRecord>>;
}

/// PostgreSQL implementation of ScheduleRepo.
pub struct PgScheduleRepo {
    pool: PgPool,
}

impl PgScheduleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepo for PgScheduleRepo {
    async fn upsert(&self, schedule: NewSchedule) -> DbResult<ScheduleRecord> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            r#"
            INSERT INTO schedules (id, launch_config_id, cron_expression, enabled, concurrency_cap)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (launch_config_id) DO UPDATE
                SET cron_expression = EXCLUDED.cron_expression,
                    enabled = EXCLUDED.enabled,
                    concurrency_cap = EXCLUDED.concurrency_cap
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(schedule.launch_config_id)
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(schedule.concurrency_cap)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<ScheduleRecord> {
        let record = sqlx::query_as::<_, ScheduleRecord>("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Ok(record)
    }

    async fn get_by_launch_config(&self, launch_config_id: Uuid) -> DbResult<ScheduleRecord> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM schedules WHERE launch_config_id = $1",
        )
        .bind(launch_config_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule for launch config {}", launch_config_id)))?;
        Ok(record)
    }

    async fn list(&self) -> DbResult<Vec<ScheduleRecord>> {
        let records =
            sqlx::query_as::<_, ScheduleRecord>("SELECT * FROM schedules ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(records)
    }

    async fn list_enabled(&self) -> DbResult<Vec<ScheduleRecord>> {
        let records = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM schedules WHERE enabled ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> DbResult<ScheduleRecord> {
        let record = sqlx::query_as::<_, ScheduleRecord>(
            "UPDATE schedules SET enabled = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        Ok(record)
    }

    async fn disable_all(&self) -> DbResult<u64> {
        let result = sqlx::query("UPDATE schedules SET enabled = FALSE WHERE enabled")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fire_if_due(
        &self,
        id: Uuid,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Option<QueueEntryRecord>> {
        let mut tx = self.pool.begin().await?;

        let schedule = sqlx::query_as::<_, ScheduleRecord>(
            "SELECT * FROM schedules WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let schedule = match schedule {
            Some(s) if s.enabled => s,
            _ => return Ok(None),
        };
        // Another ticker already covered this tick.
        if schedule.last_fired_at.is_some_and(|fired| fired >= due) {
            return Ok(None);
        }

        let project_id: Uuid =
            sqlx::query_scalar("SELECT project_id FROM launch_configs WHERE id = $1")
                .bind(schedule.launch_config_id)
                .fetch_one(&mut *tx)
                .await?;

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
        .bind(schedule.id)
        .bind(schedule.launch_config_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE schedules SET last_fired_at = $2 WHERE id = $1")
            .bind(schedule.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(entry))
    }
}
