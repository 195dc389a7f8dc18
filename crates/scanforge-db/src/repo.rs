//! Repository traits and their PostgreSQL implementations.

mod pipeline;
mod project;
mod queue;
mod schedule;

pub use pipeline::{PgPipelineRepo, PipelineRepo};
pub use project::{PgProjectRepo, ProjectRepo};
pub use queue::{PgQueueRepo, QueueRepo};
pub use schedule::{PgScheduleRepo, ScheduleRepo};
