//! Pipeline repository.
//!
//! Pipelines are created in terminal state before launch; `begin_run` is the
//! only path out of it and takes a row lock on the project version so that at
//! most one pipeline per version is ever active.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use scanforge_core::PipelineStatus;

use crate::records::{PipelineRecord, StatusChange};
use crate::{DbError, DbResult};

#[async_trait]
pub trait PipelineRepo: Send + Sync {
    /// Create a pre-launch pipeline row. Fails with `AlreadyRunning` if the
    /// project version already has an active pipeline.
    async fn create(
        &self,
        project_id: Uuid,
        project_version_id: Uuid,
        launch_data: Value,
        now: DateTime<Utc>,
    ) -> DbResult<PipelineRecord>;
    async fn get(&self, id: Uuid) -> DbResult<PipelineRecord>;
    async fn list(&self, project_id: Option<Uuid>) -> DbResult<Vec<PipelineRecord>>;

    /// Move a pre-launch pipeline into `launched`, guarding against any other
    /// active pipeline on the same project version.
    async fn begin_run(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<PipelineRecord>;

    /// Apply a forward status transition under a row lock. Returns `None`
    /// when the pipeline already has the requested status (no-op, no event).
    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Option<StatusChange>>;

    /// Drive a pipeline to `finished` from any state.
    async fn force_finish(&self, id: Uuid, now: DateTime<Utc>)
        -> DbResult<Option<StatusChange>>;

    async fn update_launch_data(&self, id: Uuid, launch_data: Value) -> DbResult<()>;
    async fn set_run_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()>;
    async fn set_watch_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()>;
    async fn clear_tasks(&self, id: Uuid) -> DbResult<()>;

    /// Delete a pipeline. Only terminal pipelines may be deleted.
    async fn delete(&self, id: Uuid) -> DbResult<()>;
    async fn has_active_for_version(&self, project_version_id: Uuid) -> DbResult<bool>;
}

/// PostgreSQL implementation of PipelineRepo.
pub struct PgPipelineRepo {
    pool: PgPool,
}

impl PgPipelineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    async fn create(
        &self,
        project_id: Uuid,
        project_version_id: Uuid,
        launch_data: Value,
        now: DateTime<Utc>,
    ) -> DbResult<PipelineRecord> {
        let mut tx = self.pool.begin().await?;

        // Serialize creations against launches on the same version.
        sqlx::query("SELECT id FROM project_versions WHERE id = $1 FOR UPDATE")
            .bind(project_version_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project version {}", project_version_id)))?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pipelines WHERE project_version_id = $1 AND status <> 'finished'",
        )
        .bind(project_version_id)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Err(DbError::AlreadyRunning(project_version_id.to_string()));
        }

        let record = sqlx::query_as::<_, PipelineRecord>(
            r#"
            INSERT INTO pipelines (id, project_id, project_version_id, status, created_at, updated_at, launch_data)
            VALUES ($1, $2, $3, 'finished', $4, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(project_id)
        .bind(project_version_id)
        .bind(now)
        .bind(launch_data)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<PipelineRecord> {
        let record = sqlx::query_as::<_, PipelineRecord>("SELECT * FROM pipelines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;
        Ok(record)
    }

    async fn list(&self, project_id: Option<Uuid>) -> DbResult<Vec<PipelineRecord>> {
        let records = match project_id {
            Some(project_id) => {
                sqlx::query_as::<_, PipelineRecord>(
                    "SELECT * FROM pipelines WHERE project_id = $1 ORDER BY created_at DESC",
                )
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PipelineRecord>(
                    "SELECT * FROM pipelines ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(records)
    }

    async fn begin_run(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<PipelineRecord> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, PipelineRecord>(
            "SELECT * FROM pipelines WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        sqlx::query("SELECT id FROM project_versions WHERE id = $1 FOR UPDATE")
            .bind(record.project_version_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!("project version {}", record.project_version_id))
            })?;

        // Only a pre-launch row may start: terminal status, never started.
        if record.status() != PipelineStatus::Finished || record.started_at.is_some() {
            return Err(DbError::Conflict(format!(
                "pipeline {} is not ready to launch",
                id
            )));
        }

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM pipelines
            WHERE project_version_id = $1 AND status <> 'finished' AND id <> $2
            "#,
        )
        .bind(record.project_version_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Err(DbError::AlreadyRunning(record.project_version_id.to_string()));
        }

        let record = sqlx::query_as::<_, PipelineRecord>(
            r#"
            UPDATE pipelines
            SET status = $2, started_at = $3, updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(PipelineStatus::Launched.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, PipelineRecord>(
            "SELECT * FROM pipelines WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        let old = record.status();
        if old == status {
            return Ok(None);
        }
        if !old.allows(status) {
            return Err(DbError::InvalidTransition(format!(
                "pipeline {} cannot move from {} to {}",
                id, old, status
            )));
        }

        sqlx::query("UPDATE pipelines SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(StatusChange {
            pipeline_id: id,
            old,
            new: status,
        }))
    }

    async fn force_finish(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, PipelineRecord>(
            "SELECT * FROM pipelines WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        let old = record.status();
        if old == PipelineStatus::Finished {
            return Ok(None);
        }

        sqlx::query("UPDATE pipelines SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(PipelineStatus::Finished.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(StatusChange {
            pipeline_id: id,
            old,
            new: PipelineStatus::Finished,
        }))
    }

    async fn update_launch_data(&self, id: Uuid, launch_data: Value) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE pipelines SET launch_data = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(launch_data)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("pipeline {}", id)));
        }
        Ok(())
    }

    async fn set_run_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()> {
        sqlx::query("UPDATE pipelines SET run_task_id = $2 WHERE id = $1")
            .bind(id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_watch_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()> {
        sqlx::query("UPDATE pipelines SET watch_task_id = $2 WHERE id = $1")
            .bind(id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_tasks(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("UPDATE pipelines SET run_task_id = NULL, watch_task_id = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let record = self.get(id).await?;
        if !record.status().is_terminal() {
            return Err(DbError::Conflict(format!(
                "pipeline {} is still active",
                id
            )));
        }
        sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn has_active_for_version(&self, project_version_id: Uuid) -> DbResult<bool> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pipelines WHERE project_version_id = $1 AND status <> 'finished'",
        )
        .bind(project_version_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(active > 0)
    }
}
