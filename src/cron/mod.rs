//! Periodic HTTP callbacks, independent of the message bus.
//!
//! The subscriber reads a flat cron source once at startup (see
//! [`SchedulerConfig`](crate::config::SchedulerConfig)), one job per line:
//!
//! ```text
//! # m  h  dom mon dow  url
//! */5 *  *   *   *    http://localhost:8080/jobs/poll
//! 0   3  *   *   *    http://localhost:8080/jobs/nightly
//! ```
//!
//! An absent or unreadable source means no scheduler; a malformed one stops the subscriber
//! from starting. Changes are picked up by restarting.

pub mod schedule;
pub mod scheduler;

pub use schedule::{ScheduleEntry, load, parse_source};
pub use scheduler::{CronScheduler, SchedulerHandle, deliver_callback};
