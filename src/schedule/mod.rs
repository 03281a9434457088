//! Scheduler module
//!
//! Per-dataset cron triggers. Interval shorthand codes stored on datasets are
//! converted to cron when the schedule is written.

mod expression;
mod interval;
mod scheduler;

pub use expression::CronSchedule;
pub use interval::to_cron;
pub use scheduler::{Scheduler, TickOutcome};

#[cfg(test)]
mod tests;
