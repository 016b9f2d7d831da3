//! Wall-clock driver for backup runs.
//!
//! Each tick picks the archive label for the current day of month, hands the
//! blocking run to the tokio blocking pool and then sleeps for the configured
//! interval. A failed run is logged and retried on the next tick; only the
//! shutdown token ends the loop, and never in the middle of a run.

pub mod runner;

use crate::config::ScheduleConfig;
use crate::executor::ArchiveLabel;
use chrono::{Datelike, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use runner::BackupRunner;

/// Archive label for a day of month.
///
/// `full_day` wins; otherwise days divisible by `inc_interval` are `inc`
/// and every other day is `daily`.
pub fn plan_for(day: u32, schedule: &ScheduleConfig) -> ArchiveLabel {
    if day == schedule.full_day {
        ArchiveLabel::Full
    } else if schedule.inc_interval > 0 && day % schedule.inc_interval == 0 {
        ArchiveLabel::Inc
    } else {
        ArchiveLabel::Daily
    }
}

pub struct Scheduler {
    runner: Arc<BackupRunner>,
    schedule: ScheduleConfig,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: Arc<BackupRunner>, schedule: ScheduleConfig, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            schedule,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled.
    /// Returns the number of runs attempted.
    pub async fn run(&self) -> usize {
        let interval = Duration::from_secs(self.schedule.interval_secs);
        let mut runs = 0usize;

        info!(
            "Scheduler started: every {}s, full on day {}, inc every {} days",
            self.schedule.interval_secs, self.schedule.full_day, self.schedule.inc_interval
        );

        loop {
            let now = Local::now();
            let label = plan_for(now.day(), &self.schedule);
            let runner = Arc::clone(&self.runner);

            runs += 1;
            match tokio::task::spawn_blocking(move || runner.run_once(label, now.naive_local())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(
                        kind = %label.kind(),
                        label = label.prefix(),
                        error = %e,
                        environmental = e.is_environmental(),
                        "Backup run failed, retrying at next tick"
                    );
                }
                Err(e) => error!("Backup task panicked: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler stopping after {} run(s)", runs);
                    break;
                }
            }
        }

        runs
    }
}
