//! Core library for a remotely-controlled cron task scheduler.
//!
//! `schedulerd_core` owns the scheduling and execution subsystem: the
//! cron-driven dispatcher, the per-task execution state machine, the
//! cancellation/timeout machinery, the event fan-out bus and the persistent
//! task registry. Everything here is transport-agnostic — `transport.rs`
//! (an `axum` HTTP binding) is one possible adapter over the [`service::TaskManager`]
//! trait, not part of the core itself.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod run_state;
pub mod scheduler;
pub mod service;
pub mod task;
pub mod transport;

pub use config::Config;
pub use error::{ServiceError, StatusCode};
pub use events::{Event, EventKind};
pub use service::{Core, TaskManager};
pub use task::Task;
