//! Dispatcher tick: admits queued launches against live worker load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use scanforge_core::WorkerInspector;
use scanforge_db::{QueueEntryRecord, QueueRepo, ScheduleRepo};

/// Starts a pipeline for an admitted queue entry on a chosen worker.
/// Implemented by the pipeline runner; faked in tests.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, entry: &QueueEntryRecord, worker: &str)
        -> scanforge_core::Result<Uuid>;
}

pub struct Dispatcher {
    queue: Arc<dyn QueueRepo>,
    schedules: Arc<dyn ScheduleRepo>,
    inspector: Arc<dyn WorkerInspector>,
    launcher: Arc<dyn Launcher>,
    workers: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueRepo>,
        schedules: Arc<dyn ScheduleRepo>,
        inspector: Arc<dyn WorkerInspector>,
        launcher: Arc<dyn Launcher>,
        workers: Vec<String>,
    ) -> Self {
        let workers = if workers.is_empty() {
            vec!["worker-0".to_string()]
        } else {
            workers
        };
        Self {
            queue,
            schedules,
            inspector,
            launcher,
            workers,
        }
    }

    /// One dispatch pass over the pending queue in FIFO order. Returns how
    /// many entries were admitted.
    ///
    /// The worker-load snapshot is taken once per tick and bumped
    /// optimistically after each admission; it is a deliberate approximation,
    /// never re-derived mid-tick. A capacity wall stops the whole pass so
    /// FIFO order is preserved instead of skipping ahead.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut counts = match self.inspector.active_counts() {
            Ok(mut counts) => {
                for worker in &self.workers {
                    counts.entry(worker.clone()).or_insert(0);
                }
                Some(counts)
            }
            Err(e) => {
                // Unknown capacity is not zero capacity.
                warn!(error = %e,
                    "Worker introspection unavailable, dispatching without capacity checks");
                None
            }
        };

        let pending = match self.queue.pending_fifo().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to read the launch queue, skipping tick");
                return 0;
            }
        };

        let mut admitted = 0;
        for entry in pending {
            // Manual run-once entries carry no schedule and are cap-exempt.
            let cap = match entry.schedule_id {
                None => None,
                Some(schedule_id) => match self.schedules.get(schedule_id).await {
                    Ok(schedule) => Some(schedule.concurrency_cap as usize),
                    Err(e) => {
                        warn!(entry_id = %entry.id, schedule_id = %schedule_id, error = %e,
                            "Failed to resolve schedule for queue entry, leaving it pending");
                        continue;
                    }
                },
            };

            let worker = match self.pick_worker(counts.as_ref(), cap) {
                Some(worker) => worker,
                None => {
                    info!(entry_id = %entry.id,
                        "No worker below the concurrency cap, stopping dispatch for this tick");
                    break;
                }
            };

            let pipeline_id = match self.launcher.launch(&entry, &worker).await {
                Ok(pipeline_id) => pipeline_id,
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e,
                        "Failed to launch queue entry, leaving it pending");
                    continue;
                }
            };

            match self.queue.mark_dispatched(entry.id, pipeline_id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(entry_id = %entry.id, "Queue entry was already claimed");
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e,
                        "Failed to mark queue entry dispatched");
                }
            }
            if let Some(counts) = counts.as_mut() {
                *counts.entry(worker).or_insert(0) += 1;
            }
            info!(entry_id = %entry.id, pipeline_id = %pipeline_id, "Dispatched queue entry");
            admitted += 1;
        }
        admitted
    }

    /// Least-loaded worker under the cap, if any. Without a load snapshot or
    /// a cap the first/least-loaded worker is used unconditionally.
    fn pick_worker(
        &self,
        counts: Option<&HashMap<String, usize>>,
        cap: Option<usize>,
    ) -> Option<String> {
        let Some(counts) = counts else {
            return self.workers.first().cloned();
        };
        let candidates = counts
            .iter()
            .filter(|(_, &count)| cap.map_or(true, |cap| count < cap));
        candidates
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(worker, _)| worker.clone())
    }

    /// Periodic loop driving `tick`.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(Utc::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use scanforge_core::{Error, Result};
    use scanforge_db::{MemStore, NewLaunchConfig, NewSchedule, ProjectRepo, QueueFilter};

    struct FakeLauncher {
        launched: Mutex<Vec<(Uuid, String)>>,
        fail_for: Mutex<Vec<Uuid>>,
    }

    impl FakeLauncher {
        fn new() -> Self {
            Self {
                launched: Mutex::new(Vec::new()),
                fail_for: Mutex::new(Vec::new()),
            }
        }

        fn launched(&self) -> Vec<(Uuid, String)> {
            self.launched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn launch(&self, entry: &QueueEntryRecord, worker: &str) -> Result<Uuid> {
            if self.fail_for.lock().unwrap().contains(&entry.id) {
                return Err(Error::NotFound("launch config vanished".into()));
            }
            self.launched
                .lock()
                .unwrap()
                .push((entry.id, worker.to_string()));
            Ok(Uuid::now_v7())
        }
    }

    struct FixedInspector(Result<HashMap<String, usize>>);

    impl WorkerInspector for FixedInspector {
        fn active_counts(&self) -> Result<HashMap<String, usize>> {
            match &self.0 {
                Ok(map) => Ok(map.clone()),
                Err(_) => Err(Error::Internal("introspection down".into())),
            }
        }
    }

    fn busy(workers: &[(&str, usize)]) -> Arc<FixedInspector> {
        Arc::new(FixedInspector(Ok(workers
            .iter()
            .map(|(w, c)| (w.to_string(), *c))
            .collect())))
    }

    async fn seed(store: &MemStore, cap: i32) -> (Uuid, Uuid, Uuid) {
        let project = ProjectRepo::create(
            store,
            "gateway",
            vec![],
            true,
            serde_json::json!({}),
        )
        .await
        .unwrap();
        store.add_version(project.id, "1.0.0").await.unwrap();
        let config = store
            .create_launch_config(NewLaunchConfig {
                project_id: project.id,
                name: "default".into(),
                analyzers: vec![],
                languages: vec![],
                source_ref: None,
                ai_mode: "DISABLED".into(),
                ai_filter: None,
            })
            .await
            .unwrap();
        let schedule = store
            .upsert(NewSchedule {
                launch_config_id: config.id,
                cron_expression: "* * * * *".into(),
                enabled: true,
                concurrency_cap: cap,
            })
            .await
            .unwrap();
        (project.id, config.id, schedule.id)
    }

    fn dispatcher(
        store: &Arc<MemStore>,
        inspector: Arc<dyn WorkerInspector>,
        launcher: Arc<FakeLauncher>,
        workers: &[&str],
    ) -> Dispatcher {
        Dispatcher::new(
            store.clone(),
            store.clone(),
            inspector,
            launcher,
            workers.iter().map(|w| w.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn admits_fifo_until_the_capacity_wall() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, schedule_id) = seed(&store, 1).await;
        let now = Utc::now();
        // Two scheduled entries behind one cap=1 schedule, worker busy.
        let first = store
            .enqueue(project_id, Some(schedule_id), config_id, now)
            .await
            .unwrap();
        let second = store
            .enqueue(
                project_id,
                Some(schedule_id),
                config_id,
                now + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        let d = dispatcher(&store, busy(&[("w0", 1)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 0);
        assert!(launcher.launched().is_empty());

        // Load drained: the next tick admits exactly the oldest entry. The
        // optimistic in-tick bump then walls the second entry at cap=1.
        let d = dispatcher(&store, busy(&[("w0", 0)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 1);
        assert_eq!(launcher.launched(), vec![(first.id, "w0".to_string())]);
        let pending = store.pending_fifo().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);

        // Another drained snapshot admits the remaining entry.
        let d = dispatcher(&store, busy(&[("w0", 0)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 1);
        assert!(store.pending_fifo().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_wall_stops_the_whole_tick() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, schedule_id) = seed(&store, 1).await;
        let now = Utc::now();
        store
            .enqueue(project_id, Some(schedule_id), config_id, now)
            .await
            .unwrap();
        // A manual entry behind the wall is not skipped ahead.
        store
            .enqueue(
                project_id,
                None,
                config_id,
                now + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        let d = dispatcher(&store, busy(&[("w0", 1)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 0);
        assert_eq!(store.pending_fifo().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn manual_entries_are_cap_exempt() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, _) = seed(&store, 1).await;
        let now = Utc::now();
        store
            .enqueue(project_id, None, config_id, now)
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        // Worker over any cap, but the manual entry still goes out.
        let d = dispatcher(&store, busy(&[("w0", 5)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 1);
        assert_eq!(launcher.launched().len(), 1);
    }

    #[tokio::test]
    async fn introspection_outage_admits_with_a_warning() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, schedule_id) = seed(&store, 1).await;
        let now = Utc::now();
        store
            .enqueue(project_id, Some(schedule_id), config_id, now)
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        let inspector = Arc::new(FixedInspector(Err(Error::Internal("down".into()))));
        let d = dispatcher(&store, inspector, launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 1);
    }

    #[tokio::test]
    async fn launch_failure_leaves_the_entry_pending_and_continues() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, schedule_id) = seed(&store, 4).await;
        let now = Utc::now();
        let bad = store
            .enqueue(project_id, Some(schedule_id), config_id, now)
            .await
            .unwrap();
        let good = store
            .enqueue(
                project_id,
                Some(schedule_id),
                config_id,
                now + chrono::Duration::seconds(1),
            )
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        launcher.fail_for.lock().unwrap().push(bad.id);
        let d = dispatcher(&store, busy(&[("w0", 0)]), launcher.clone(), &["w0"]);
        assert_eq!(d.tick(now).await, 1);

        let pending = QueueRepo::list(
            store.as_ref(),
            QueueFilter {
                only_pending: true,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, bad.id);
        assert_eq!(launcher.launched()[0].0, good.id);
    }

    #[tokio::test]
    async fn picks_the_least_loaded_worker() {
        let store = Arc::new(MemStore::new());
        let (project_id, config_id, schedule_id) = seed(&store, 3).await;
        let now = Utc::now();
        store
            .enqueue(project_id, Some(schedule_id), config_id, now)
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        let d = dispatcher(
            &store,
            busy(&[("w0", 2), ("w1", 0)]),
            launcher.clone(),
            &["w0", "w1"],
        );
        assert_eq!(d.tick(now).await, 1);
        assert_eq!(launcher.launched()[0].1, "w1");
    }
}
