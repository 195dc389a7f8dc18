//! Task registry with named worker slots.
//!
//! Spawned run and watch tasks are registered per pipeline under a worker
//! slot; stop revokes them by aborting unfinished handles. The registry is
//! also the live-load view the dispatcher consults.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use uuid::Uuid;

use scanforge_core::{Error, Result, WorkerInspector};

struct TaskEntry {
    worker: String,
    run: Option<JoinHandle<()>>,
    watch: Option<JoinHandle<()>>,
}

pub struct WorkerRegistry {
    workers: Vec<String>,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
}

impl WorkerRegistry {
    pub fn new(workers: Vec<String>) -> Self {
        let workers = if workers.is_empty() {
            vec!["worker-0".to_string()]
        } else {
            workers
        };
        Self {
            workers,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TaskEntry>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register the primary run task for a pipeline. Returns the task id the
    /// caller stores on the pipeline row.
    pub fn register_run(&self, pipeline_id: Uuid, worker: &str, handle: JoinHandle<()>) -> Uuid {
        let mut tasks = self.lock();
        let entry = tasks.entry(pipeline_id).or_insert_with(|| TaskEntry {
            worker: worker.to_string(),
            run: None,
            watch: None,
        });
        entry.worker = worker.to_string();
        entry.run = Some(handle);
        Uuid::now_v7()
    }

    /// Register the secondary watch task for a pipeline.
    pub fn register_watch(&self, pipeline_id: Uuid, handle: JoinHandle<()>) -> Uuid {
        let mut tasks = self.lock();
        let entry = tasks.entry(pipeline_id).or_insert_with(|| TaskEntry {
            worker: self.workers[0].clone(),
            run: None,
            watch: None,
        });
        entry.watch = Some(handle);
        Uuid::now_v7()
    }

    /// Abort any unfinished tasks for a pipeline and drop the entry.
    /// Already-finished handles are ignored.
    pub fn revoke(&self, pipeline_id: Uuid) -> bool {
        let mut tasks = self.lock();
        match tasks.remove(&pipeline_id) {
            Some(entry) => {
                let mut revoked = false;
                for handle in entry.run.iter().chain(entry.watch.iter()) {
                    if !handle.is_finished() {
                        handle.abort();
                        revoked = true;
                    }
                }
                revoked
            }
            None => false,
        }
    }

    /// Drop the entry for a pipeline that completed on its own.
    pub fn release(&self, pipeline_id: Uuid) {
        self.lock().remove(&pipeline_id);
    }
}

impl WorkerInspector for WorkerRegistry {
    fn active_counts(&self) -> Result<HashMap<String, usize>> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| Error::Internal("task registry lock poisoned".into()))?;
        // Drop entries whose run completed without an explicit release.
        tasks.retain(|_, entry| {
            entry
                .run
                .iter()
                .chain(entry.watch.iter())
                .any(|h| !h.is_finished())
        });
        let mut counts: HashMap<String, usize> =
            self.workers.iter().map(|w| (w.clone(), 0)).collect();
        for entry in tasks.values() {
            *counts.entry(entry.worker.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn counts_unfinished_tasks_per_worker() {
        let registry = WorkerRegistry::new(vec!["w0".into(), "w1".into()]);
        let p1 = Uuid::now_v7();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry.register_run(p1, "w0", handle);

        let counts = registry.active_counts().unwrap();
        assert_eq!(counts["w0"], 1);
        assert_eq!(counts["w1"], 0);

        assert!(registry.revoke(p1));
        let counts = registry.active_counts().unwrap();
        assert_eq!(counts["w0"], 0);
    }

    #[tokio::test]
    async fn finished_tasks_do_not_count() {
        let registry = WorkerRegistry::new(vec!["w0".into()]);
        let p1 = Uuid::now_v7();
        let handle = tokio::spawn(async {});
        registry.register_run(p1, "w0", handle);
        // give the empty task a chance to finish
        tokio::time::sleep(Duration::from_millis(20)).await;
        let counts = registry.active_counts().unwrap();
        assert_eq!(counts["w0"], 0);
    }

    #[tokio::test]
    async fn revoke_on_unknown_pipeline_is_a_noop() {
        let registry = WorkerRegistry::new(vec![]);
        assert!(!registry.revoke(Uuid::now_v7()));
        assert_eq!(registry.workers(), ["worker-0".to_string()]);
    }
}
