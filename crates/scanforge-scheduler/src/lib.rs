//! Scheduling and run orchestration for scanforge.
//!
//! A periodic scheduler tick turns due cron schedules into launch-queue
//! entries; a periodic dispatcher tick admits queued launches against live
//! worker load; a per-run orchestration task drives each pipeline through its
//! lifecycle to the terminal state.

pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod runner;
pub mod schedule_tick;

pub use dispatcher::{Dispatcher, Launcher};
pub use events::{spawn_action_listener, PipelineEvent, StatusBus};
pub use registry::WorkerRegistry;
pub use runner::PipelineRunner;
pub use schedule_tick::ScheduleTicker;
