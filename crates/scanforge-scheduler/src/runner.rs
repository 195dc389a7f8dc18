//! Pipeline run orchestration.
//!
//! One orchestration task per run drives the lifecycle: begin-run guard,
//! external build/scan, upload, fan-out enrichment with fan-in, AI triage
//! policy, terminal state. Whatever happens — success, stop, error — the
//! run ends in the terminal state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use scanforge_core::{
    AiMode, ArtifactInfo, ConfigSnapshot, EnrichmentProgress, Error, LaunchData, LaunchOverrides,
    PipelineStatus, ProjectProfile, ResolvedParams, ResourceId, Result, RunContext,
};
use scanforge_core::{AiClient, FindingEnricher, ScanRunner};
use scanforge_db::{
    DbError, LaunchConfigRecord, PipelineRecord, PipelineRepo, ProjectRecord, ProjectRepo,
    QueueEntryRecord, StatusChange,
};

use crate::dispatcher::Launcher;
use crate::events::{PipelineEvent, StatusBus};
use crate::registry::WorkerRegistry;

/// Live enrichment counters for in-flight runs. Persisted launch data only
/// carries the final numbers; this is what the progress endpoint reads while
/// the fan-out is running.
#[derive(Default, Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<HashMap<Uuid, (u64, Arc<AtomicU64>)>>>,
}

impl ProgressTracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, (u64, Arc<AtomicU64>)>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn start(&self, pipeline_id: Uuid, total: u64) -> Arc<AtomicU64> {
        let done = Arc::new(AtomicU64::new(0));
        self.lock().insert(pipeline_id, (total, done.clone()));
        done
    }

    fn clear(&self, pipeline_id: Uuid) {
        self.lock().remove(&pipeline_id);
    }

    pub fn snapshot(&self, pipeline_id: Uuid) -> Option<(u64, u64)> {
        self.lock()
            .get(&pipeline_id)
            .map(|(total, done)| (*total, done.load(Ordering::SeqCst)))
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    pipelines: Arc<dyn PipelineRepo>,
    projects: Arc<dyn ProjectRepo>,
    scan: Arc<dyn ScanRunner>,
    enricher: Arc<dyn FindingEnricher>,
    ai: Arc<dyn AiClient>,
    registry: Arc<WorkerRegistry>,
    bus: StatusBus,
    progress: ProgressTracker,
}

impl PipelineRunner {
    pub fn new(
        pipelines: Arc<dyn PipelineRepo>,
        projects: Arc<dyn ProjectRepo>,
        scan: Arc<dyn ScanRunner>,
        enricher: Arc<dyn FindingEnricher>,
        ai: Arc<dyn AiClient>,
        registry: Arc<WorkerRegistry>,
        bus: StatusBus,
    ) -> Self {
        Self {
            pipelines,
            projects,
            scan,
            enricher,
            ai,
            registry,
            bus,
            progress: ProgressTracker::default(),
        }
    }

    pub fn bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Least-loaded worker slot, for starts that bypass the dispatcher.
    pub fn default_worker(&self) -> String {
        use scanforge_core::WorkerInspector;
        let workers = self.registry.workers();
        match self.registry.active_counts() {
            Ok(counts) => counts
                .into_iter()
                .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
                .map(|(worker, _)| worker)
                .unwrap_or_else(|| workers[0].clone()),
            Err(_) => workers[0].clone(),
        }
    }

    /// Create a guarded pipeline for a launch config and start its
    /// orchestration task on `worker`.
    ///
    /// The config is resolved fresh here (never from a stale snapshot);
    /// `version_id` defaults to the project's latest version. Fails with
    /// `AlreadyRunning` when the version already has a non-terminal run.
    pub async fn start(
        &self,
        launch_config_id: Uuid,
        version_id: Option<Uuid>,
        overrides: &LaunchOverrides,
        worker: &str,
    ) -> Result<PipelineRecord> {
        let config = self.projects.get_launch_config(launch_config_id).await?;
        let project = self.projects.get(config.project_id).await?;
        let version = match version_id {
            Some(id) => self.projects.get_version(id).await?,
            None => self.projects.latest_version(project.id).await?,
        };
        if version.project_id != project.id {
            return Err(Error::InvalidInput(
                "project version does not belong to the launch config's project".into(),
            ));
        }

        let params = resolve_params(&config, &project, overrides)?;
        let data = LaunchData {
            params: Some(params),
            ..Default::default()
        };

        let pipeline = self
            .pipelines
            .create(project.id, version.id, data.to_value(), Utc::now())
            .await?;
        info!(pipeline_id = %pipeline.id, project = %project.name,
            version = %version.version, worker = %worker, "Created pipeline");

        let this = self.clone();
        let pipeline_id = pipeline.id;
        let handle = tokio::spawn(async move {
            this.drive(pipeline_id).await;
        });
        let task_id = self.registry.register_run(pipeline_id, worker, handle);
        self.pipelines
            .set_run_task(pipeline_id, Some(task_id))
            .await?;
        Ok(pipeline)
    }

    async fn drive(&self, pipeline_id: Uuid) {
        if let Err(e) = self.execute(pipeline_id).await {
            error!(pipeline_id = %pipeline_id, error = %e, "Pipeline run failed");
            self.fail(pipeline_id).await;
        }
    }

    /// The main orchestration path up to the enrichment fan-out handoff.
    async fn execute(&self, pipeline_id: Uuid) -> Result<()> {
        let record = match self.pipelines.begin_run(pipeline_id, Utc::now()).await {
            Ok(record) => record,
            Err(DbError::Conflict(_)) | Err(DbError::AlreadyRunning(_)) => {
                // Another trigger won the race; abort cleanly, never double-run.
                info!(pipeline_id = %pipeline_id, "Pipeline already advanced, aborting launch");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.bus.publish_change(StatusChange {
            pipeline_id,
            old: PipelineStatus::Finished,
            new: PipelineStatus::Launched,
        });

        let mut data = LaunchData::from_value(&record.launch_data);
        let params = data
            .params
            .clone()
            .ok_or_else(|| Error::Internal("pipeline is missing resolved parameters".into()))?;
        let project = self.projects.get(record.project_id).await?;
        let version = self.projects.get_version(record.project_version_id).await?;
        let ctx = RunContext {
            pipeline_id: ResourceId::from_uuid(pipeline_id),
            project_name: project.name,
            project_version: version.version,
        };

        let scan = self.scan.run_build(&ctx, &params).await?;
        data.artifacts = Some(ArtifactInfo {
            build_dir: scan.build_dir.clone(),
            revision: scan.revision.clone(),
            reports: scan.reports.clone(),
        });
        self.pipelines
            .update_launch_data(pipeline_id, data.to_value())
            .await?;

        let upload = self.scan.upload(&ctx, &scan).await?;
        data.finding_ids = upload.finding_ids;

        if data.finding_ids.is_empty() {
            info!(pipeline_id = %pipeline_id, "No findings produced, finishing");
            self.pipelines
                .update_launch_data(pipeline_id, data.to_value())
                .await?;
            return self.finish(pipeline_id).await;
        }

        let total = data.finding_ids.len() as u64;
        data.enrichment = Some(EnrichmentProgress { total, done: 0 });
        self.pipelines
            .update_launch_data(pipeline_id, data.to_value())
            .await?;
        self.transition(pipeline_id, PipelineStatus::FindingPostprocessing)
            .await?;

        // The fan-out continues on its own watch task so a stop request can
        // revoke it independently of this run task.
        let this = self.clone();
        let finding_ids = data.finding_ids.clone();
        let ai_mode = params.ai_mode;
        let ai_filter = params.ai_filter.clone();
        let watch = tokio::spawn(async move {
            if let Err(e) = this
                .enrich_and_triage(pipeline_id, finding_ids, ai_mode, ai_filter)
                .await
            {
                error!(pipeline_id = %pipeline_id, error = %e, "Enrichment phase failed");
                this.fail(pipeline_id).await;
            }
        });
        let watch_id = self.registry.register_watch(pipeline_id, watch);
        self.pipelines
            .set_watch_task(pipeline_id, Some(watch_id))
            .await?;
        Ok(())
    }

    /// Fan-out one enrichment task per finding, fan back in, then apply the
    /// AI triage policy.
    async fn enrich_and_triage(
        &self,
        pipeline_id: Uuid,
        finding_ids: Vec<ResourceId>,
        ai_mode: AiMode,
        ai_filter: Option<serde_json::Value>,
    ) -> Result<()> {
        let total = finding_ids.len() as u64;
        let done = self.progress.start(pipeline_id, total);

        let mut set = JoinSet::new();
        for finding_id in finding_ids.iter().copied() {
            let enricher = self.enricher.clone();
            let done = done.clone();
            let run_id = ResourceId::from_uuid(pipeline_id);
            set.spawn(async move {
                if let Err(e) = enricher.enrich(run_id, finding_id).await {
                    warn!(pipeline_id = %run_id, finding_id = %finding_id, error = %e,
                        "Enrichment task failed");
                }
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        while set.join_next().await.is_some() {}

        let record = self.pipelines.get(pipeline_id).await?;
        let mut data = LaunchData::from_value(&record.launch_data);
        data.enrichment = Some(EnrichmentProgress {
            total,
            done: done.load(Ordering::SeqCst),
        });
        self.pipelines
            .update_launch_data(pipeline_id, data.to_value())
            .await?;

        self.transition(pipeline_id, PipelineStatus::UploadingResults)
            .await?;
        self.bus
            .publish(PipelineEvent::EnrichmentCompleted { pipeline_id });

        match ai_mode {
            AiMode::Disabled => self.finish(pipeline_id).await,
            AiMode::Manual => {
                // Parked until an operator hits the confirm endpoint.
                self.transition(pipeline_id, PipelineStatus::WaitingAiConfirmation)
                    .await
            }
            AiMode::AutoDefault => {
                self.transition(pipeline_id, PipelineStatus::PushToAi).await?;
                self.ai
                    .push(
                        ResourceId::from_uuid(pipeline_id),
                        &finding_ids,
                        ai_filter.as_ref(),
                    )
                    .await?;
                self.transition(pipeline_id, PipelineStatus::WaitingAiResult)
                    .await
            }
        }
    }

    /// Operator confirmation for a run parked in manual AI mode.
    pub async fn confirm_ai(&self, pipeline_id: Uuid) -> Result<()> {
        let record = self.pipelines.get(pipeline_id).await?;
        if record.status() != PipelineStatus::WaitingAiConfirmation {
            return Err(Error::Conflict(format!(
                "pipeline {} is not waiting for AI confirmation",
                pipeline_id
            )));
        }
        let data = LaunchData::from_value(&record.launch_data);
        self.transition(pipeline_id, PipelineStatus::PushToAi).await?;
        // Manual mode never carries a filter snapshot.
        self.ai
            .push(ResourceId::from_uuid(pipeline_id), &data.finding_ids, None)
            .await?;
        self.transition(pipeline_id, PipelineStatus::WaitingAiResult)
            .await
    }

    /// AI backend callback: the triage result arrived, the run is done.
    pub async fn ai_result(&self, pipeline_id: Uuid) -> Result<()> {
        let record = self.pipelines.get(pipeline_id).await?;
        if !matches!(
            record.status(),
            PipelineStatus::PushToAi | PipelineStatus::WaitingAiResult
        ) {
            return Err(Error::Conflict(format!(
                "pipeline {} is not waiting for an AI result",
                pipeline_id
            )));
        }
        self.finish(pipeline_id).await
    }

    /// Revoke in-flight tasks and force the run to the terminal state.
    /// A no-op on an already-finished run.
    pub async fn stop(&self, pipeline_id: Uuid) -> Result<()> {
        let record = self.pipelines.get(pipeline_id).await?;
        if record.status().is_terminal() {
            return Ok(());
        }
        self.registry.revoke(pipeline_id);
        if let Err(e) = self.scan.cleanup(ResourceId::from_uuid(pipeline_id)).await {
            warn!(pipeline_id = %pipeline_id, error = %e, "Run cleanup failed during stop");
        }
        self.pipelines.clear_tasks(pipeline_id).await?;
        if let Some(change) = self.pipelines.force_finish(pipeline_id, Utc::now()).await? {
            self.bus.publish_change(change);
        }
        self.progress.clear(pipeline_id);
        info!(pipeline_id = %pipeline_id, "Pipeline stopped");
        Ok(())
    }

    /// Enrichment progress as `(total, done, percent)`. Live counters win
    /// over the persisted snapshot.
    pub async fn progress(&self, pipeline_id: Uuid) -> Result<(u64, u64, f64)> {
        if let Some((total, done)) = self.progress.snapshot(pipeline_id) {
            return Ok(with_percent(total, done));
        }
        let record = self.pipelines.get(pipeline_id).await?;
        let data = LaunchData::from_value(&record.launch_data);
        let (total, done) = data
            .enrichment
            .map(|p| (p.total, p.done))
            .unwrap_or((0, 0));
        Ok(with_percent(total, done))
    }

    async fn transition(&self, pipeline_id: Uuid, status: PipelineStatus) -> Result<()> {
        if let Some(change) = self
            .pipelines
            .set_status(pipeline_id, status, Utc::now())
            .await?
        {
            info!(pipeline_id = %pipeline_id, from = %change.old, to = %change.new,
                "Pipeline status changed");
            self.bus.publish_change(change);
        }
        Ok(())
    }

    async fn finish(&self, pipeline_id: Uuid) -> Result<()> {
        self.transition(pipeline_id, PipelineStatus::Finished).await?;
        if let Err(e) = self.scan.cleanup(ResourceId::from_uuid(pipeline_id)).await {
            warn!(pipeline_id = %pipeline_id, error = %e, "Run cleanup failed");
        }
        self.pipelines.clear_tasks(pipeline_id).await?;
        self.registry.release(pipeline_id);
        self.progress.clear(pipeline_id);
        Ok(())
    }

    /// Best-effort terminal path for failed runs. Never leaves a run in a
    /// non-terminal state.
    async fn fail(&self, pipeline_id: Uuid) {
        match self.pipelines.force_finish(pipeline_id, Utc::now()).await {
            Ok(Some(change)) => self.bus.publish_change(change),
            Ok(None) => {}
            Err(e) => {
                error!(pipeline_id = %pipeline_id, error = %e,
                    "Failed to force-finish pipeline");
            }
        }
        if let Err(e) = self.scan.cleanup(ResourceId::from_uuid(pipeline_id)).await {
            warn!(pipeline_id = %pipeline_id, error = %e, "Run cleanup failed");
        }
        if let Err(e) = self.pipelines.clear_tasks(pipeline_id).await {
            warn!(pipeline_id = %pipeline_id, error = %e, "Failed to clear task handles");
        }
        self.registry.release(pipeline_id);
        self.progress.clear(pipeline_id);
    }
}

#[async_trait]
impl Launcher for PipelineRunner {
    async fn launch(&self, entry: &QueueEntryRecord, worker: &str) -> Result<Uuid> {
        let pipeline = self
            .start(
                entry.launch_config_id,
                None,
                &LaunchOverrides::default(),
                worker,
            )
            .await?;
        Ok(pipeline.id)
    }
}

fn with_percent(total: u64, done: u64) -> (u64, u64, f64) {
    let percent = if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    };
    (total, done, percent)
}

/// Build the effective run parameters from a launch config row, the owning
/// project, and request-time overrides.
pub fn resolve_params(
    config: &LaunchConfigRecord,
    project: &ProjectRecord,
    overrides: &LaunchOverrides,
) -> Result<ResolvedParams> {
    let snapshot = ConfigSnapshot {
        analyzers: serde_json::from_value(config.analyzers.clone()).unwrap_or_default(),
        languages: serde_json::from_value(config.languages.clone()).unwrap_or_default(),
        source_ref: config.source_ref.clone(),
        ai_mode: config.ai_mode.parse()?,
        ai_filter: config.ai_filter.clone(),
    };
    let profile = ProjectProfile {
        supported_languages: serde_json::from_value(project.supported_languages.clone())
            .unwrap_or_default(),
        profile: project.profile.clone(),
    };
    ResolvedParams::resolve(&snapshot, &profile, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use scanforge_core::{ScanOutput, UploadOutput};
    use scanforge_db::{MemStore, NewLaunchConfig};

    struct FakeScan {
        fail_build: bool,
        hang_build: bool,
        finding_count: usize,
        cleanups: Mutex<Vec<Uuid>>,
    }

    impl FakeScan {
        fn new(finding_count: usize) -> Self {
            Self {
                fail_build: false,
                hang_build: false,
                finding_count,
                cleanups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScanRunner for FakeScan {
        async fn run_build(
            &self,
            _ctx: &RunContext,
            _params: &ResolvedParams,
        ) -> Result<ScanOutput> {
            if self.hang_build {
                std::future::pending::<()>().await;
            }
            if self.fail_build {
                return Err(Error::ExecutionFailed("scanner crashed".into()));
            }
            Ok(ScanOutput {
                build_dir: "/var/scans/build".into(),
                revision: Some("deadbeef".into()),
                reports: vec!["bandit.json".into()],
            })
        }

        async fn upload(&self, _ctx: &RunContext, _output: &ScanOutput) -> Result<UploadOutput> {
            Ok(UploadOutput {
                finding_ids: (0..self.finding_count).map(|_| ResourceId::new()).collect(),
            })
        }

        async fn cleanup(&self, pipeline_id: ResourceId) -> Result<()> {
            self.cleanups.lock().unwrap().push(*pipeline_id.as_uuid());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEnricher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FindingEnricher for FakeEnricher {
        async fn enrich(&self, _pipeline_id: ResourceId, _finding_id: ResourceId) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAi {
        pushes: Mutex<Vec<(Uuid, usize, bool)>>,
    }

    #[async_trait]
    impl AiClient for FakeAi {
        async fn push(
            &self,
            pipeline_id: ResourceId,
            finding_ids: &[ResourceId],
            filter_snapshot: Option<&serde_json::Value>,
        ) -> Result<()> {
            self.pushes.lock().unwrap().push((
                *pipeline_id.as_uuid(),
                finding_ids.len(),
                filter_snapshot.is_some(),
            ));
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemStore>,
        scan: Arc<FakeScan>,
        enricher: Arc<FakeEnricher>,
        ai: Arc<FakeAi>,
        runner: PipelineRunner,
        config_id: Uuid,
    }

    async fn harness(scan: FakeScan, ai_mode: &str, ai_filter: Option<serde_json::Value>) -> Harness {
        let store = Arc::new(MemStore::new());
        let project = ProjectRepo::create(
            store.as_ref(),
            "gateway",
            vec!["python".into()],
            true,
            serde_json::json!({}),
        )
        .await
        .unwrap();
        store.add_version(project.id, "2.1.0").await.unwrap();
        let config = store
            .create_launch_config(NewLaunchConfig {
                project_id: project.id,
                name: "default".into(),
                analyzers: vec!["bandit".into()],
                languages: vec![],
                source_ref: Some("main".into()),
                ai_mode: ai_mode.into(),
                ai_filter,
            })
            .await
            .unwrap();

        let scan = Arc::new(scan);
        let enricher = Arc::new(FakeEnricher::default());
        let ai = Arc::new(FakeAi::default());
        let runner = PipelineRunner::new(
            store.clone(),
            store.clone(),
            scan.clone(),
            enricher.clone(),
            ai.clone(),
            Arc::new(WorkerRegistry::new(vec![])),
            StatusBus::new(64),
        );
        Harness {
            store,
            scan,
            enricher,
            ai,
            runner,
            config_id: config.id,
        }
    }

    async fn wait_for_status(store: &MemStore, pipeline_id: Uuid, status: PipelineStatus) {
        for _ in 0..200 {
            let record = PipelineRepo::get(store, pipeline_id).await.unwrap();
            if record.status() == status && record.started_at.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline never reached {status}");
    }

    #[tokio::test]
    async fn successful_run_walks_the_lifecycle_in_order() {
        let h = harness(FakeScan::new(3), "DISABLED", None).await;
        let mut rx = h.runner.bus().subscribe();

        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::Finished).await;
        // let the post-terminal cleanup and event publishing settle
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StatusChanged(change) = event {
                seen.push(change.new);
            }
        }
        assert_eq!(
            seen,
            vec![
                PipelineStatus::Launched,
                PipelineStatus::FindingPostprocessing,
                PipelineStatus::UploadingResults,
                PipelineStatus::Finished,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].rank() < w[1].rank()));

        assert_eq!(h.enricher.calls.load(Ordering::SeqCst), 3);
        let record = PipelineRepo::get(h.store.as_ref(), pipeline.id)
            .await
            .unwrap();
        let data = LaunchData::from_value(&record.launch_data);
        assert_eq!(data.finding_ids.len(), 3);
        let progress = data.enrichment.unwrap();
        assert_eq!((progress.total, progress.done), (3, 3));
        assert!(data.artifacts.unwrap().revision.is_some());
        assert_eq!(h.scan.cleanups.lock().unwrap().len(), 1);
        assert!(record.run_task_id.is_none() && record.watch_task_id.is_none());
    }

    #[tokio::test]
    async fn no_findings_finishes_directly() {
        let h = harness(FakeScan::new(0), "DISABLED", None).await;
        let mut rx = h.runner.bus().subscribe();
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::Finished).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StatusChanged(change) = event {
                seen.push(change.new);
            }
        }
        assert_eq!(
            seen,
            vec![PipelineStatus::Launched, PipelineStatus::Finished]
        );
        assert_eq!(h.enricher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn build_failure_still_terminates_and_stop_is_then_a_noop() {
        let h = harness(
            FakeScan {
                fail_build: true,
                ..FakeScan::new(0)
            },
            "DISABLED",
            None,
        )
        .await;
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::Finished).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Cleanup ran even though the run failed.
        assert_eq!(h.scan.cleanups.lock().unwrap().len(), 1);
        h.runner.stop(pipeline.id).await.unwrap();
        assert_eq!(h.scan.cleanups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_revokes_a_hung_run_and_forces_terminal() {
        let h = harness(
            FakeScan {
                hang_build: true,
                ..FakeScan::new(0)
            },
            "DISABLED",
            None,
        )
        .await;
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::Launched).await;

        h.runner.stop(pipeline.id).await.unwrap();
        let record = PipelineRepo::get(h.store.as_ref(), pipeline.id)
            .await
            .unwrap();
        assert_eq!(record.status(), PipelineStatus::Finished);
        assert!(record.run_task_id.is_none());
        assert_eq!(h.scan.cleanups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_ai_mode_parks_until_confirmation() {
        let h = harness(FakeScan::new(2), "MANUAL", None).await;
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::WaitingAiConfirmation).await;
        assert!(h.ai.pushes.lock().unwrap().is_empty());

        h.runner.confirm_ai(pipeline.id).await.unwrap();
        let record = PipelineRepo::get(h.store.as_ref(), pipeline.id)
            .await
            .unwrap();
        assert_eq!(record.status(), PipelineStatus::WaitingAiResult);
        // Manual pushes never carry a filter snapshot.
        let pushes = h.ai.pushes.lock().unwrap().clone();
        assert_eq!(pushes, vec![(pipeline.id, 2, false)]);

        h.runner.ai_result(pipeline.id).await.unwrap();
        let record = PipelineRepo::get(h.store.as_ref(), pipeline.id)
            .await
            .unwrap();
        assert_eq!(record.status(), PipelineStatus::Finished);
    }

    #[tokio::test]
    async fn auto_ai_mode_pushes_with_the_saved_snapshot() {
        let filter = serde_json::json!({
            "limit": 50,
            "severity": [{"comparison": "EQUALS", "value": "HIGH"}]
        });
        let h = harness(FakeScan::new(1), "AUTO_DEFAULT", Some(filter)).await;
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::WaitingAiResult).await;

        let pushes = h.ai.pushes.lock().unwrap().clone();
        assert_eq!(pushes, vec![(pipeline.id, 1, true)]);
        assert!(h.runner.confirm_ai(pipeline.id).await.is_err());
    }

    #[tokio::test]
    async fn second_start_for_the_same_version_conflicts() {
        let h = harness(
            FakeScan {
                hang_build: true,
                ..FakeScan::new(0)
            },
            "DISABLED",
            None,
        )
        .await;
        let first = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, first.id, PipelineStatus::Launched).await;

        let err = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(_)));
        h.runner.stop(first.id).await.unwrap();
    }

    #[tokio::test]
    async fn progress_reports_complete_after_the_run() {
        let h = harness(FakeScan::new(4), "DISABLED", None).await;
        let pipeline = h
            .runner
            .start(h.config_id, None, &LaunchOverrides::default(), "worker-0")
            .await
            .unwrap();
        wait_for_status(&h.store, pipeline.id, PipelineStatus::Finished).await;

        let (total, done, percent) = h.runner.progress(pipeline.id).await.unwrap();
        assert_eq!((total, done), (4, 4));
        assert!((percent - 100.0).abs() < f64::EPSILON);
    }
}
