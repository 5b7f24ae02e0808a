//! Pipeline entry points for the tender monitor.
//!
//! - `Monitor::tick`: one fetch, dedupe and notify cycle
//! - `Scheduler::run`: repeat ticks on a cron schedule
//! - `run_test`: connectivity message followed by one tick

pub mod monitor;
pub mod schedule;

pub use monitor::{Monitor, MonitorSettings, TickReport, TickState};
pub use schedule::{Scheduler, run_test};
