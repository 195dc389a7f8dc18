//! Scheduler tick: turns due cron schedules into launch-queue entries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use scanforge_core::CronSpec;
use scanforge_db::ScheduleRepo;

/// Evaluates every enabled schedule once per tick. Each schedule is
/// independent: one bad cron expression or repo failure never aborts the
/// rest of the tick.
pub struct ScheduleTicker {
    schedules: Arc<dyn ScheduleRepo>,
}

impl ScheduleTicker {
    pub fn new(schedules: Arc<dyn ScheduleRepo>) -> Self {
        Self { schedules }
    }

    /// One evaluation pass. Returns how many queue entries were created.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let schedules = match self.schedules.list_enabled().await {
            Ok(schedules) => schedules,
            Err(e) => {
                warn!(error = %e, "Failed to list schedules, skipping tick");
                return 0;
            }
        };

        let mut fired = 0;
        for schedule in schedules {
            let spec = match CronSpec::parse(&schedule.cron_expression) {
                Ok(spec) => spec,
                Err(e) => {
                    // An operator has to fix the expression; never auto-disable.
                    warn!(schedule_id = %schedule.id, error = %e,
                        "Skipping schedule with invalid cron expression");
                    continue;
                }
            };
            let Some(due) = spec.due_tick(now) else {
                continue;
            };
            if schedule.last_fired_at.is_some_and(|fired_at| due <= fired_at) {
                continue;
            }
            match self.schedules.fire_if_due(schedule.id, due, now).await {
                Ok(Some(entry)) => {
                    info!(schedule_id = %schedule.id, entry_id = %entry.id, due = %due,
                        "Enqueued scheduled launch");
                    fired += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Failed to fire schedule");
                }
            }
        }
        fired
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
