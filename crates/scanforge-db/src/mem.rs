//! In-memory store implementing every repository trait.
//!
//! A single mutex serializes all operations, which gives the same
//! exactly-once and exclusion guarantees the row-locked PostgreSQL
//! implementations provide. Used by tests and by components that want a
//! storage-agnostic seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use scanforge_core::PipelineStatus;

use crate::records::{
    LaunchConfigRecord, NewLaunchConfig, NewSchedule, PipelineRecord, ProjectRecord,
    ProjectVersionRecord, QueueEntryRecord, QueueFilter, ScheduleRecord, StatusChange,
};
use crate::repo::{PipelineRepo, ProjectRepo, QueueRepo, ScheduleRepo};
use crate::{DbError, DbResult};

#[derive(Default)]
struct Inner {
    projects: Vec<ProjectRecord>,
    versions: Vec<ProjectVersionRecord>,
    launch_configs: Vec<LaunchConfigRecord>,
    schedules: Vec<ScheduleRecord>,
    queue: Vec<QueueEntryRecord>,
    pipelines: Vec<PipelineRecord>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepo for MemStore {
    async fn upsert(&self, schedule: NewSchedule) -> DbResult<ScheduleRecord> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .schedules
            .iter_mut()
            .find(|s| s.launch_config_id == schedule.launch_config_id)
        {
            existing.cron_expression = schedule.cron_expression;
            existing.enabled = schedule.enabled;
            existing.concurrency_cap = schedule.concurrency_cap;
            return Ok(existing.clone());
        }
        let record = ScheduleRecord {
            id: Uuid::now_v7(),
            launch_config_id: schedule.launch_config_id,
            cron_expression: schedule.cron_expression,
            enabled: schedule.enabled,
            concurrency_cap: schedule.concurrency_cap,
            last_fired_at: None,
        };
        inner.schedules.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<ScheduleRecord> {
        let inner = self.inner.lock().await;
        inner
            .schedules
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))
    }

    async fn get_by_launch_config(&self, launch_config_id: Uuid) -> DbResult<ScheduleRecord> {
        let inner = self.inner.lock().await;
        inner
            .schedules
            .iter()
            .find(|s| s.launch_config_id == launch_config_id)
            .cloned()
            .ok_or_else(|| {
                DbError::NotFound(format!("schedule for launch config {}", launch_config_id))
            })
    }

    async fn list(&self) -> DbResult<Vec<ScheduleRecord>> {
        Ok(self.inner.lock().await.schedules.clone())
    }

    async fn list_enabled(&self) -> DbResult<Vec<ScheduleRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .schedules
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn set_enabled(&self, id: Uuid, enabled: bool) -> DbResult<ScheduleRecord> {
        let mut inner = self.inner.lock().await;
        let schedule = inner
            .schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        schedule.enabled = enabled;
        Ok(schedule.clone())
    }

    async fn disable_all(&self) -> DbResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut changed = 0;
        for schedule in inner.schedules.iter_mut().filter(|s| s.enabled) {
            schedule.enabled = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.schedules.retain(|s| s.id != id);
        Ok(())
    }

    async fn fire_if_due(
        &self,
        id: Uuid,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<Option<QueueEntryRecord>> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.schedules.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        if !inner.schedules[idx].enabled {
            return Ok(None);
        }
        if inner.schedules[idx]
            .last_fired_at
            .is_some_and(|fired| fired >= due)
        {
            return Ok(None);
        }
        let launch_config_id = inner.schedules[idx].launch_config_id;
        let project_id = inner
            .launch_configs
            .iter()
            .find(|c| c.id == launch_config_id)
            .map(|c| c.project_id)
            .ok_or_else(|| DbError::NotFound(format!("launch config {}", launch_config_id)))?;

        let entry = QueueEntryRecord {
            id: Uuid::now_v7(),
            created_at: now,
            project_id,
            schedule_id: Some(id),
            launch_config_id,
            dispatched: false,
            dispatched_at: None,
            pipeline_id: None,
        };
        inner.queue.push(entry.clone());
        inner.schedules[idx].last_fired_at = Some(now);
        Ok(Some(entry))
    }
}

#[async_trait]
impl QueueRepo for MemStore {
    async fn enqueue(
        &self,
        project_id: Uuid,
        schedule_id: Option<Uuid>,
        launch_config_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<QueueEntryRecord> {
        let mut inner = self.inner.lock().await;
        let entry = QueueEntryRecord {
            id: Uuid::now_v7(),
            created_at: now,
            project_id,
            schedule_id,
            launch_config_id,
            dispatched: false,
            dispatched_at: None,
            pipeline_id: None,
        };
        inner.queue.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> DbResult<QueueEntryRecord> {
        let inner = self.inner.lock().await;
        inner
            .queue
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("queue entry {}", id)))
    }

    async fn list(&self, filter: QueueFilter) -> DbResult<Vec<QueueEntryRecord>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<_> = inner
            .queue
            .iter()
            .filter(|e| !filter.only_pending || !e.dispatched)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        if let Some(limit) = filter.limit {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }

    async fn pending_fifo(&self) -> DbResult<Vec<QueueEntryRecord>> {
        QueueRepo::list(
            self,
            QueueFilter {
                only_pending: true,
                limit: None,
            },
        )
        .await
    }

    async fn mark_dispatched(
        &self,
        id: Uuid,
        pipeline_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.queue.iter_mut().find(|e| e.id == id && !e.dispatched) {
            Some(entry) => {
                entry.dispatched = true;
                entry.dispatched_at = Some(now);
                entry.pipeline_id = Some(pipeline_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.queue.retain(|e| e.id != id);
        Ok(())
    }

    async fn purge_dispatched(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner
            .queue
            .retain(|e| !(e.dispatched && e.dispatched_at.is_some_and(|at| at < cutoff)));
        Ok((before - inner.queue.len()) as u64)
    }
}

#[async_trait]
impl PipelineRepo for MemStore {
    async fn create(
        &self,
        project_id: Uuid,
        project_version_id: Uuid,
        launch_data: Value,
        now: DateTime<Utc>,
    ) -> DbResult<PipelineRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.versions.iter().any(|v| v.id == project_version_id) {
            return Err(DbError::NotFound(format!(
                "project version {}",
                project_version_id
            )));
        }
        if inner
            .pipelines
            .iter()
            .any(|p| p.project_version_id == project_version_id && !p.status().is_terminal())
        {
            return Err(DbError::AlreadyRunning(project_version_id.to_string()));
        }
        let record = PipelineRecord {
            id: Uuid::now_v7(),
            project_id,
            project_version_id,
            status: PipelineStatus::Finished.as_str().to_string(),
            created_at: now,
            updated_at: now,
            started_at: None,
            run_task_id: None,
            watch_task_id: None,
            launch_data,
        };
        inner.pipelines.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<PipelineRecord> {
        let inner = self.inner.lock().await;
        inner
            .pipelines
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))
    }

    async fn list(&self, project_id: Option<Uuid>) -> DbResult<Vec<PipelineRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<_> = inner
            .pipelines
            .iter()
            .filter(|p| project_id.map_or(true, |id| p.project_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn begin_run(&self, id: Uuid, now: DateTime<Utc>) -> DbResult<PipelineRecord> {
        let mut inner = self.inner.lock().await;
        let idx = inner
            .pipelines
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        let version_id = inner.pipelines[idx].project_version_id;
        if inner.pipelines[idx].status() != PipelineStatus::Finished
            || inner.pipelines[idx].started_at.is_some()
        {
            return Err(DbError::Conflict(format!(
                "pipeline {} is not ready to launch",
                id
            )));
        }
        if inner
            .pipelines
            .iter()
            .any(|p| p.project_version_id == version_id && p.id != id && !p.status().is_terminal())
        {
            return Err(DbError::AlreadyRunning(version_id.to_string()));
        }

        let pipeline = &mut inner.pipelines[idx];
        pipeline.status = PipelineStatus::Launched.as_str().to_string();
        pipeline.started_at = Some(now);
        pipeline.updated_at = now;
        Ok(pipeline.clone())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: PipelineStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Option<StatusChange>> {
        let mut inner = self.inner.lock().await;
        let pipeline = inner
            .pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        let old = pipeline.status();
        if old == status {
            return Ok(None);
        }
        if !old.allows(status) {
            return Err(DbError::InvalidTransition(format!(
                "pipeline {} cannot move from {} to {}",
                id, old, status
            )));
        }
        pipeline.status = status.as_str().to_string();
        pipeline.updated_at = now;
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
        let mut inner = self.inner.lock().await;
        let pipeline = inner
            .pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

        let old = pipeline.status();
        if old == PipelineStatus::Finished {
            return Ok(None);
        }
        pipeline.status = PipelineStatus::Finished.as_str().to_string();
        pipeline.updated_at = now;
        Ok(Some(StatusChange {
            pipeline_id: id,
            old,
            new: PipelineStatus::Finished,
        }))
    }

    async fn update_launch_data(&self, id: Uuid, launch_data: Value) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let pipeline = inner
            .pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;
        pipeline.launch_data = launch_data;
        Ok(())
    }

    async fn set_run_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(pipeline) = inner.pipelines.iter_mut().find(|p| p.id == id) {
            pipeline.run_task_id = task_id;
        }
        Ok(())
    }

    async fn set_watch_task(&self, id: Uuid, task_id: Option<Uuid>) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(pipeline) = inner.pipelines.iter_mut().find(|p| p.id == id) {
            pipeline.watch_task_id = task_id;
        }
        Ok(())
    }

    async fn clear_tasks(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(pipeline) = inner.pipelines.iter_mut().find(|p| p.id == id) {
            pipeline.run_task_id = None;
            pipeline.watch_task_id = None;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let pipeline = inner
            .pipelines
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;
        if !pipeline.status().is_terminal() {
            return Err(DbError::Conflict(format!("pipeline {} is still active", id)));
        }
        inner.pipelines.retain(|p| p.id != id);
        Ok(())
    }

    async fn has_active_for_version(&self, project_version_id: Uuid) -> DbResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pipelines
            .iter()
            .any(|p| p.project_version_id == project_version_id && !p.status().is_terminal()))
    }
}

#[async_trait]
impl ProjectRepo for MemStore {
    async fn create(
        &self,
        name: &str,
        supported_languages: Vec<String>,
        compilable: bool,
        profile: Value,
    ) -> DbResult<ProjectRecord> {
        let mut inner = self.inner.lock().await;
        if inner.projects.iter().any(|p| p.name == name) {
            return Err(DbError::Conflict(format!("project '{}' exists", name)));
        }
        let record = ProjectRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            supported_languages: serde_json::json!(supported_languages),
            compilable,
            profile,
            created_at: Utc::now(),
        };
        inner.projects.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> DbResult<ProjectRecord> {
        let inner = self.inner.lock().await;
        inner
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("project {}", id)))
    }

    async fn list(&self) -> DbResult<Vec<ProjectRecord>> {
        let mut records = self.inner.lock().await.projects.clone();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn add_version(
        &self,
        project_id: Uuid,
        version: &str,
    ) -> DbResult<ProjectVersionRecord> {
        let mut inner = self.inner.lock().await;
        if inner
            .versions
            .iter()
            .any(|v| v.project_id == project_id && v.version == version)
        {
            return Err(DbError::Conflict(format!(
                "version '{}' exists for project {}",
                version, project_id
            )));
        }
        let record = ProjectVersionRecord {
            id: Uuid::now_v7(),
            project_id,
            version: version.to_string(),
            created_at: Utc::now(),
        };
        inner.versions.push(record.clone());
        Ok(record)
    }

    async fn get_version(&self, id: Uuid) -> DbResult<ProjectVersionRecord> {
        let inner = self.inner.lock().await;
        inner
            .versions
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("project version {}", id)))
    }

    async fn latest_version(&self, project_id: Uuid) -> DbResult<ProjectVersionRecord> {
        let inner = self.inner.lock().await;
        inner
            .versions
            .iter()
            .filter(|v| v.project_id == project_id)
            .max_by_key(|v| (v.created_at, v.id))
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("versions for project {}", project_id)))
    }

    async fn create_launch_config(
        &self,
        config: NewLaunchConfig,
    ) -> DbResult<LaunchConfigRecord> {
        let mut inner = self.inner.lock().await;
        let record = LaunchConfigRecord {
            id: Uuid::now_v7(),
            project_id: config.project_id,
            name: config.name,
            analyzers: serde_json::json!(config.analyzers),
            languages: serde_json::json!(config.languages),
            source_ref: config.source_ref,
            ai_mode: config.ai_mode,
            ai_filter: config.ai_filter,
            created_at: Utc::now(),
        };
        inner.launch_configs.push(record.clone());
        Ok(record)
    }

    async fn get_launch_config(&self, id: Uuid) -> DbResult<LaunchConfigRecord> {
        let inner = self.inner.lock().await;
        inner
            .launch_configs
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("launch config {}", id)))
    }

    async fn list_launch_configs(&self, project_id: Uuid) -> DbResult<Vec<LaunchConfigRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<_> = inner
            .launch_configs
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn delete_launch_config(&self, id: Uuid) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.launch_configs.retain(|c| c.id != id);
        // Cascade like the SQL schema: schedules and queue entries follow
        // their launch config.
        inner.schedules.retain(|s| s.launch_config_id != id);
        inner.queue.retain(|q| q.launch_config_id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seed(store: &MemStore) -> (Uuid, Uuid, Uuid) {
        let project = ProjectRepo::create(
            store,
            "gateway",
            vec!["python".into()],
            true,
            serde_json::json!({}),
        )
        .await
        .unwrap();
        let version = store.add_version(project.id, "1.4.0").await.unwrap();
        let config = store
            .create_launch_config(NewLaunchConfig {
                project_id: project.id,
                name: "default".into(),
                analyzers: vec!["bandit".into()],
                languages: vec![],
                source_ref: None,
                ai_mode: "DISABLED".into(),
                ai_filter: None,
            })
            .await
            .unwrap();
        (project.id, version.id, config.id)
    }

    #[tokio::test]
    async fn fire_if_due_is_exactly_once_per_tick() {
        let store = MemStore::new();
        let (_, _, config_id) = seed(&store).await;
        let schedule = store
            .upsert(NewSchedule {
                launch_config_id: config_id,
                cron_expression: "*/5 * * * *".into(),
                enabled: true,
                concurrency_cap: 1,
            })
            .await
            .unwrap();

        let due = Utc::now() - Duration::seconds(30);
        let now = Utc::now();
        let first = store.fire_if_due(schedule.id, due, now).await.unwrap();
        assert!(first.is_some());
        let second = store.fire_if_due(schedule.id, due, now).await.unwrap();
        assert!(second.is_none());
        assert_eq!(store.pending_fifo().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fire_if_due_skips_disabled_schedules() {
        let store = MemStore::new();
        let (_, _, config_id) = seed(&store).await;
        let schedule = store
            .upsert(NewSchedule {
                launch_config_id: config_id,
                cron_expression: "* * * * *".into(),
                enabled: false,
                concurrency_cap: 1,
            })
            .await
            .unwrap();
        let fired = store
            .fire_if_due(schedule.id, Utc::now(), Utc::now())
            .await
            .unwrap();
        assert!(fired.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_schedule() {
        let store = MemStore::new();
        let (_, _, config_id) = seed(&store).await;
        let first = store
            .upsert(NewSchedule {
                launch_config_id: config_id,
                cron_expression: "0 * * * *".into(),
                enabled: true,
                concurrency_cap: 1,
            })
            .await
            .unwrap();
        let second = store
            .upsert(NewSchedule {
                launch_config_id: config_id,
                cron_expression: "*/10 * * * *".into(),
                enabled: true,
                concurrency_cap: 3,
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.cron_expression, "*/10 * * * *");
        assert_eq!(second.concurrency_cap, 3);
        assert_eq!(ScheduleRepo::list(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_dispatched_claims_an_entry_once() {
        let store = MemStore::new();
        let (project_id, _, config_id) = seed(&store).await;
        let entry = store
            .enqueue(project_id, None, config_id, Utc::now())
            .await
            .unwrap();
        let pipeline_id = Uuid::now_v7();
        assert!(store
            .mark_dispatched(entry.id, pipeline_id, Utc::now())
            .await
            .unwrap());
        assert!(!store
            .mark_dispatched(entry.id, pipeline_id, Utc::now())
            .await
            .unwrap());
        assert!(store.pending_fifo().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_fifo_is_oldest_first() {
        let store = MemStore::new();
        let (project_id, _, config_id) = seed(&store).await;
        let base = Utc::now();
        let newer = store
            .enqueue(project_id, None, config_id, base + Duration::seconds(5))
            .await
            .unwrap();
        let older = store
            .enqueue(project_id, None, config_id, base)
            .await
            .unwrap();
        let pending = store.pending_fifo().await.unwrap();
        assert_eq!(pending[0].id, older.id);
        assert_eq!(pending[1].id, newer.id);
    }

    #[tokio::test]
    async fn purge_removes_only_old_dispatched_entries() {
        let store = MemStore::new();
        let (project_id, _, config_id) = seed(&store).await;
        let now = Utc::now();
        let old = store
            .enqueue(project_id, None, config_id, now - Duration::days(10))
            .await
            .unwrap();
        store
            .mark_dispatched(old.id, Uuid::now_v7(), now - Duration::days(10))
            .await
            .unwrap();
        let pending = store.enqueue(project_id, None, config_id, now).await.unwrap();

        let purged = store
            .purge_dispatched(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        let remaining = QueueRepo::list(&store, QueueFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending.id);
    }

    #[tokio::test]
    async fn begin_run_launches_a_pre_launch_pipeline() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let pipeline = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Finished);
        assert!(pipeline.started_at.is_none());

        let launched = store.begin_run(pipeline.id, Utc::now()).await.unwrap();
        assert_eq!(launched.status(), PipelineStatus::Launched);
        assert!(launched.started_at.is_some());
    }

    #[tokio::test]
    async fn begin_run_rejects_a_second_launch_for_the_same_version() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let first = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        store.begin_run(first.id, Utc::now()).await.unwrap();

        // The version is busy: no new pre-launch row, no launch.
        let err = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::AlreadyRunning(_)));

        // A row that already started never launches again.
        let err = store.begin_run(first.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn finished_pipeline_that_ran_cannot_relaunch() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let pipeline = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        store.begin_run(pipeline.id, Utc::now()).await.unwrap();
        store.force_finish(pipeline.id, Utc::now()).await.unwrap();

        let err = store.begin_run(pipeline.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_status_is_idempotent_and_forward_only() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let pipeline = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        store.begin_run(pipeline.id, Utc::now()).await.unwrap();

        let change = store
            .set_status(pipeline.id, PipelineStatus::FindingPostprocessing, Utc::now())
            .await
            .unwrap();
        assert_eq!(
            change.map(|c| (c.old, c.new)),
            Some((
                PipelineStatus::Launched,
                PipelineStatus::FindingPostprocessing
            ))
        );

        // Same status again: no-op, no change reported.
        let change = store
            .set_status(pipeline.id, PipelineStatus::FindingPostprocessing, Utc::now())
            .await
            .unwrap();
        assert!(change.is_none());

        // Backwards is rejected.
        let err = store
            .set_status(pipeline.id, PipelineStatus::Launched, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn force_finish_works_from_any_state() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let pipeline = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        store.begin_run(pipeline.id, Utc::now()).await.unwrap();
        store
            .set_status(pipeline.id, PipelineStatus::UploadingResults, Utc::now())
            .await
            .unwrap();

        let change = store.force_finish(pipeline.id, Utc::now()).await.unwrap();
        assert_eq!(change.map(|c| c.new), Some(PipelineStatus::Finished));
        // Already terminal: nothing to report.
        let change = store.force_finish(pipeline.id, Utc::now()).await.unwrap();
        assert!(change.is_none());
    }

    #[tokio::test]
    async fn delete_requires_terminal_status() {
        let store = MemStore::new();
        let (project_id, version_id, _) = seed(&store).await;
        let pipeline = PipelineRepo::create(
            &store,
            project_id,
            version_id,
            serde_json::json!({}),
            Utc::now(),
        )
        .await
        .unwrap();
        store.begin_run(pipeline.id, Utc::now()).await.unwrap();

        let err = PipelineRepo::delete(&store, pipeline.id).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        store.force_finish(pipeline.id, Utc::now()).await.unwrap();
        PipelineRepo::delete(&store, pipeline.id).await.unwrap();
        assert!(PipelineRepo::get(&store, pipeline.id).await.is_err());
    }
}
