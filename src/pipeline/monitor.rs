// src/pipeline/monitor.rs

//! One check-and-notify cycle.
//!
//! A tick evicts expired processed entries, fetches candidates, drops those
//! already notified, then notifies the rest one by one. An id is marked
//! processed only after its notification was accepted, so an interrupted
//! tick leaves unsent tenders to be picked up by the next one.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::models::{Config, Tender};
use crate::services::{Notifier, RegistryClient, TelegramNotifier};
use crate::storage::{EvictionReport, LocalProcessedStore, ProcessedStore};
use crate::utils::log;

/// Where a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickState {
    /// All stages ran
    #[default]
    Done,
    /// Fetching (or another stage) failed; nothing further was attempted
    Failed,
}

/// Counts reported at the end of a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub state: TickState,
    /// Matching candidates returned by the registry
    pub fetched: usize,
    pub already_processed: usize,
    pub notified: usize,
    /// Sends that failed; these stay unmarked
    pub failed: usize,
    pub evicted: EvictionReport,
    /// Size of the processed record after the tick, if it could be read
    pub total_processed: Option<usize>,
    pub error: Option<String>,
}

impl TickReport {
    fn failed(error: impl ToString) -> Self {
        Self {
            state: TickState::Failed,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Timing knobs for [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// How far back each fetch looks
    pub lookback: Duration,
    /// Age after which processed entries are evicted
    pub retention: Duration,
    /// Pause between two notifications
    pub send_delay: StdDuration,
    /// Zone used for times shown in the log
    pub timezone: Tz,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            lookback: config.schedule.lookback(),
            retention: config.storage.retention(),
            send_delay: StdDuration::from_millis(config.telegram.send_delay_ms),
            timezone: config.schedule.tz()?,
        })
    }
}

/// Orchestrates registry, processed record and notifier.
pub struct Monitor {
    registry: RegistryClient,
    store: Box<dyn ProcessedStore>,
    notifier: Box<dyn Notifier>,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        registry: RegistryClient,
        store: Box<dyn ProcessedStore>,
        notifier: Box<dyn Notifier>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            settings,
        }
    }

    /// Wire the production collaborators.
    ///
    /// Credentials are checked first so a misconfigured deployment fails
    /// before touching the network or the disk.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let notifier = TelegramNotifier::from_config(config)?;
        let registry = RegistryClient::from_config(config)?;
        let store = LocalProcessedStore::open(&config.storage.data_file).await?;
        Ok(Self::new(
            registry,
            Box::new(store),
            Box::new(notifier),
            MonitorSettings::from_config(config)?,
        ))
    }

    /// Send the connectivity message. Failures are logged, not returned.
    pub async fn send_test_message(&self) -> bool {
        match self.notifier.send_test_message().await {
            Ok(()) => {
                ::log::info!("Test message sent");
                true
            }
            Err(e) => {
                ::log::error!("Test message failed: {}", e);
                false
            }
        }
    }

    /// Run one tick. Never fails; problems are logged and reported.
    pub async fn tick(&self) -> TickReport {
        log::header(&self.start_banner(Utc::now()));

        let report = match self.run_tick().await {
            Ok(report) => report,
            Err(e) => {
                ::log::error!("Tender check aborted: {}", e);
                TickReport::failed(e)
            }
        };

        log::summary(
            "Tender check",
            &[
                ("state", format!("{:?}", report.state)),
                ("fetched", report.fetched.to_string()),
                ("already processed", report.already_processed.to_string()),
                ("notified", report.notified.to_string()),
                ("failed", report.failed.to_string()),
                ("evicted", report.evicted.removed.to_string()),
                (
                    "total processed",
                    report
                        .total_processed
                        .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
                ),
            ],
        );
        report
    }

    fn start_banner(&self, now: DateTime<Utc>) -> String {
        format!(
            "Tender check started at {}",
            now.with_timezone(&self.settings.timezone)
                .format("%d.%m.%Y %H:%M:%S %Z")
        )
    }

    async fn run_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        match self.store.evict_older_than(self.settings.retention).await {
            Ok(evicted) => report.evicted = evicted,
            Err(e) => ::log::warn!("Eviction pass failed: {}", e),
        }

        // FETCHING
        let candidates = match self.registry.try_fetch_candidates(self.settings.lookback).await {
            Ok(candidates) => candidates,
            Err(e) => {
                ::log::error!("Registry fetch failed, retrying next tick: {}", e);
                return Ok(TickReport {
                    evicted: report.evicted,
                    ..TickReport::failed(e)
                });
            }
        };
        report.fetched = candidates.len();

        // FILTERING
        let fresh = self.unprocessed(candidates, &mut report).await?;
        if fresh.is_empty() {
            ::log::info!(
                "No new tenders ({} found, all notified earlier)",
                report.fetched
            );
        } else {
            ::log::info!("New tenders to notify: {}", fresh.len());
        }

        // NOTIFYING
        for (i, tender) in fresh.iter().enumerate() {
            if i > 0 && !self.settings.send_delay.is_zero() {
                tokio::time::sleep(self.settings.send_delay).await;
            }
            self.notify(tender, &mut report).await;
        }

        report.total_processed = self.store.count().await.ok();
        Ok(report)
    }

    async fn unprocessed(
        &self,
        candidates: Vec<Tender>,
        report: &mut TickReport,
    ) -> Result<Vec<Tender>> {
        let mut fresh = Vec::with_capacity(candidates.len());
        for tender in candidates {
            if self.store.is_processed(&tender.internal_id).await? {
                report.already_processed += 1;
            } else {
                fresh.push(tender);
            }
        }
        Ok(fresh)
    }

    async fn notify(&self, tender: &Tender, report: &mut TickReport) {
        if let Err(e) = self.notifier.send_tender(tender).await {
            report.failed += 1;
            ::log::warn!(
                "Notification for {} failed, will retry next tick: {}",
                tender.display_id(),
                e
            );
            return;
        }

        report.notified += 1;
        if let Err(e) = self.store.mark_processed(&tender.internal_id).await {
            ::log::error!(
                "Notified {} but could not record it; it may be sent again: {}",
                tender.display_id(),
                e
            );
        }
    }
}
