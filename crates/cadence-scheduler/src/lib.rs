//! The Cadence scheduling engine.
//!
//! [`Scheduler`] owns both lifecycle state machines and every write to the
//! store. [`Horizon`] is the periodic job that keeps each active series
//! materialized a few occurrences ahead, collects installments, and sends
//! reminders. The remaining modules are in-process implementations of the
//! collaborator traits from `cadence-core`.

pub mod availability;
pub mod config;
pub mod error;
pub mod horizon;
mod lease;
pub mod notify;
pub mod outbox;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use horizon::{Horizon, HorizonHandle, TickReport};
pub use scheduler::{Collaborators, Scheduler, Wiring};
