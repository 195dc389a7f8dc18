//! Status event bus.
//!
//! Every effective status transition is published here after the repository
//! write returns, never before. Enrichment fan-in completion is its own
//! first-class event rather than something listeners infer.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use scanforge_core::{LaunchData, PipelineStatus};
use scanforge_db::{PipelineRepo, StatusChange};

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StatusChanged(StatusChange),
    EnrichmentCompleted { pipeline_id: Uuid },
    Finished { pipeline_id: Uuid },
}

/// Broadcast bus carrying pipeline events to any number of subscribers
/// (SSE streams, the one-off action listener, tests).
#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Publish a committed status change, plus the terminal event when the
    /// run just reached its final state.
    pub fn publish_change(&self, change: StatusChange) {
        let pipeline_id = change.pipeline_id;
        let terminal = change.new == PipelineStatus::Finished;
        self.publish(PipelineEvent::StatusChanged(change));
        if terminal {
            self.publish(PipelineEvent::Finished { pipeline_id });
        }
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Subscriber that fires one-off post-run actions when a pipeline reaches
/// their trigger status. Each action fires at most once; fired ids are
/// recorded back into the pipeline's launch data.
pub fn spawn_action_listener(
    pipelines: Arc<dyn PipelineRepo>,
    bus: StatusBus,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let change = match rx.recv().await {
                Ok(PipelineEvent::StatusChanged(change)) => change,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Action listener lagged behind the event bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if let Err(e) = fire_actions(pipelines.as_ref(), &change).await {
                warn!(pipeline_id = %change.pipeline_id, error = %e,
                    "Failed to run one-off actions");
            }
        }
    })
}

async fn fire_actions(
    pipelines: &dyn PipelineRepo,
    change: &StatusChange,
) -> scanforge_core::Result<()> {
    let record = pipelines.get(change.pipeline_id).await?;
    let mut data = LaunchData::from_value(&record.launch_data);
    let pending: Vec<String> = data
        .pending_actions(change.new)
        .iter()
        .map(|a| a.id.clone())
        .collect();
    if pending.is_empty() {
        return Ok(());
    }
    for id in &pending {
        if let Some(action) = data.one_off_actions.iter().find(|a| &a.id == id) {
            info!(pipeline_id = %change.pipeline_id, action_id = %action.id,
                action_type = %action.action_type, status = %change.new,
                "Firing one-off action");
        }
        data.mark_action_done(id);
    }
    pipelines
        .update_launch_data(change.pipeline_id, data.to_value())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminal_change_emits_two_events() {
        let bus = StatusBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish_change(StatusChange {
            pipeline_id: Uuid::now_v7(),
            old: PipelineStatus::WaitingAiResult,
            new: PipelineStatus::Finished,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::StatusChanged(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::Finished { .. }
        ));
    }

    #[tokio::test]
    async fn non_terminal_change_emits_one_event() {
        let bus = StatusBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish_change(StatusChange {
            pipeline_id: Uuid::now_v7(),
            old: PipelineStatus::Launched,
            new: PipelineStatus::FindingPostprocessing,
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::StatusChanged(_)
        ));
        assert!(rx.try_recv().is_err());
    }
}
