//! API server for scanforge.
//!
//! REST endpoints over the schedule, queue and pipeline repositories, an SSE
//! status feed, and the server binary wiring the scheduler and dispatcher
//! ticks.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;
