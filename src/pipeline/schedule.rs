// src/pipeline/schedule.rs

//! Cron-driven repetition of monitor ticks.

use std::future::Future;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::monitor::{Monitor, TickReport};
use crate::error::{AppError, Result};
use crate::models::ScheduleConfig;

/// Fires ticks at the configured wall-clock times.
///
/// Ticks never overlap: the next fire time is computed only after the
/// previous tick returned, so a slot missed during a long tick is skipped.
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: Schedule,
    timezone: Tz,
}

impl Scheduler {
    pub fn new(schedule: Schedule, timezone: Tz) -> Self {
        Self { schedule, timezone }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self::new(config.parsed()?, config.tz()?))
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// Tick immediately, then on every fire time until Ctrl-C.
    pub async fn run(&self, monitor: &Monitor) -> Result<()> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.run_until(monitor, shutdown).await
    }

    /// As [`run`](Self::run), stopping when `shutdown` resolves.
    ///
    /// Shutdown is only observed between ticks; a tick in progress finishes.
    pub async fn run_until<F>(&self, monitor: &Monitor, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        log::info!("Running initial check");
        monitor.tick().await;

        loop {
            let next = self.next_after(Utc::now()).ok_or_else(|| {
                AppError::schedule("schedule has no upcoming fire time")
            })?;
            log::info!(
                "Next check at {}",
                next.with_timezone(&self.timezone).format("%d.%m.%Y %H:%M:%S %Z")
            );
            let wait = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, stopping scheduler");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {
                    monitor.tick().await;
                }
            }
        }
    }
}

/// One-shot mode: send the connectivity message, then run a single tick.
pub async fn run_test(monitor: &Monitor) -> TickReport {
    log::info!("Test mode: sending test message");
    monitor.send_test_message().await;
    monitor.tick().await
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    use super::*;
    use crate::models::{FilterConfig, RegistryConfig};
    use crate::pipeline::MonitorSettings;
    use crate::services::{RegistryClient, TenderFilter};
    use crate::storage::{LocalProcessedStore, ProcessedStore};
    use crate::testing::{FakeNotifier, FakeRegistry, summary};

    fn daily_nine_kyiv() -> Scheduler {
        Scheduler::new(
            Schedule::from_str("0 0 9 * * *").unwrap(),
            chrono_tz::Europe::Kyiv,
        )
    }

    #[test]
    fn test_next_after_uses_local_wall_clock() {
        let scheduler = daily_nine_kyiv();
        // 05:00 UTC on a February day is 07:00 in Kyiv
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 5, 0, 0).unwrap();

        let next = scheduler.next_after(now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 3, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_rolls_to_tomorrow() {
        let scheduler = daily_nine_kyiv();
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 7, 0, 0).unwrap();

        let next = scheduler.next_after(now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 4, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_follows_summer_time() {
        let scheduler = daily_nine_kyiv();
        // Kyiv is UTC+3 in July
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();

        let next = scheduler.next_after(now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_from_config_rejects_bad_cron() {
        let config = ScheduleConfig {
            cron: "every morning".into(),
            ..ScheduleConfig::default()
        };
        assert!(matches!(
            Scheduler::from_config(&config),
            Err(AppError::Schedule(_))
        ));
    }

    fn monitor(tmp: &TempDir, notifier: &FakeNotifier) -> Monitor {
        let api = FakeRegistry::new(vec![vec![summary(
            "a",
            Utc::now() - Duration::hours(1),
            "aboveThreshold",
            "Послуги письмового перекладу",
        )]]);
        let filter = TenderFilter::new(&FilterConfig::default()).unwrap();
        Monitor::new(
            RegistryClient::new(Box::new(api), filter, &RegistryConfig::default()),
            Box::new(LocalProcessedStore::new(tmp.path().join("processed.json"))),
            Box::new(notifier.clone()),
            MonitorSettings {
                lookback: Duration::hours(48),
                retention: Duration::days(90),
                send_delay: std::time::Duration::ZERO,
                timezone: chrono_tz::Europe::Kyiv,
            },
        )
    }

    #[tokio::test]
    async fn test_run_until_ticks_once_before_shutdown() {
        let tmp = TempDir::new().unwrap();
        let notifier = FakeNotifier::new();
        let monitor = monitor(&tmp, &notifier);

        daily_nine_kyiv()
            .run_until(&monitor, std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(notifier.sent(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_run_test_sends_message_then_ticks() {
        let tmp = TempDir::new().unwrap();
        let notifier = FakeNotifier::new();
        let monitor = monitor(&tmp, &notifier);

        let report = run_test(&monitor).await;

        assert_eq!(notifier.texts().len(), 1);
        assert_eq!(report.notified, 1);
        let store = LocalProcessedStore::new(tmp.path().join("processed.json"));
        assert!(store.is_processed("a").await.unwrap());
    }
}
