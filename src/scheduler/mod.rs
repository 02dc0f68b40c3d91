//! Recurring per-subscription jobs.
//!
//! - [`cron`] - Five-field cron expressions and next-occurrence search
//! - [`runner`] - The [`JobScheduler`] seam and its tokio implementation

pub mod cron;
pub mod runner;

pub use cron::{CronError, CronExpr};
pub use runner::{CancelToken, FireFn, JobKey, JobScheduler, TokioScheduler};
