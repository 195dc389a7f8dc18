//! Project, project version, and launch configuration repository.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::records::{LaunchConfigRecord, NewLaunchConfig, ProjectRecord, ProjectVersionRecord};
use crate::{DbError, DbResult};

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(
        &self,
        name: &str,
        supported_languages: Vec<String>,
        compilable: bool,
        profile: Value,
    ) -> DbResult<ProjectRecord>;
    async fn get(&self, id: Uuid) -> DbResult<ProjectRecord>;
    async fn list(&self) -> DbResult<Vec<ProjectRecord>>;

    async fn add_version(&self, project_id: Uuid, version: &str)
        -> DbResult<ProjectVersionRecord>;
    async fn get_version(&self, id: Uuid) -> DbResult<ProjectVersionRecord>;
    async fn latest_version(&self, project_id: Uuid) -> DbResult<ProjectVersionRecord>;

    async fn create_launch_config(&self, config: NewLaunchConfig)
        -> DbResult<LaunchConfigRecord>;
    async fn get_launch_config(&self, id: Uuid) -> DbResult<LaunchConfigRecord>;
    async fn list_launch_configs(&self, project_id: Uuid) -> DbResult<Vec<LaunchConfigRecord>>;
    async fn delete_launch_config(&self, id: Uuid) -> DbResult<()>;
}

/// PostgreSQL implementation of ProjectRepo.
pub struct PgProjectRepo {
    pool: PgPool,
}

impl PgProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn create(
        &self,
        name: &str,
        supported_languages: Vec<String>,
        compilable: bool,
        profile: Value,
    ) -> DbResult<ProjectRecord> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            INSERT INTO projects (id, name, supported_languages, compilable, profile, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(serde_json::json!(supported_languages))
        .bind(compilable)
        .bind(profile)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<ProjectRecord> {
        let record = sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("project {}", id)))?;
        Ok(record)
    }

    async fn list(&self) -> DbResult<Vec<ProjectRecord>> {
        let records =
            sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(records)
    }

    async fn add_version(
        &self,
        project_id: Uuid,
        version: &str,
    ) -> DbResult<ProjectVersionRecord> {
        let record = sqlx::query_as::<_, ProjectVersionRecord>(
            r#"
            INSERT INTO project_versions (id, project_id, version, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(project_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_version(&self, id: Uuid) -> DbResult<ProjectVersionRecord> {
        let record = sqlx::query_as::<_, ProjectVersionRecord>(
            "SELECT * FROM project_versions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("project version {}", id)))?;
        Ok(record)
    }

    async fn latest_version(&self, project_id: Uuid) -> DbResult<ProjectVersionRecord> {
        let record = sqlx::query_as::<_, ProjectVersionRecord>(
            "SELECT * FROM project_versions WHERE project_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("versions for project {}", project_id)))?;
        Ok(record)
    }

    async fn create_launch_config(
        &self,
        config: NewLaunchConfig,
    ) -> DbResult<LaunchConfigRecord> {
        let record = sqlx::query_as::<_, LaunchConfigRecord>(
            r#"
            INSERT INTO launch_configs
                (id, project_id, name, analyzers, languages, source_ref, ai_mode, ai_filter, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(config.project_id)
        .bind(&config.name)
        .bind(serde_json::json!(config.analyzers))
        .bind(serde_json::json!(config.languages))
        .bind(&config.source_ref)
        .bind(&config.ai_mode)
        .bind(&config.ai_filter)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_launch_config(&self, id: Uuid) -> DbResult<LaunchConfigRecord> {
        let record = sqlx::query_as::<_, LaunchConfigRecord>(
            "SELECT * FROM launch_configs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("launch config {}", id)))?;
        Ok(record)
    }

    async fn list_launch_configs(&self, project_id: Uuid) -> DbResult<Vec<LaunchConfigRecord>> {
        let records = sqlx::query_as::<_, LaunchConfigRecord>(
            "SELECT * FROM launch_configs WHERE project_id = $1 ORDER BY name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn delete_launch_config(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM launch_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
