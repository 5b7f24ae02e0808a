// src/services/registry.rs

//! Registry client.
//!
//! Walks the newest-first tender listing back to a cutoff, applies the
//! procedure-type and title predicates and fills in details for the matches.

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{Config, DetailResponse, ListingPage, RegistryConfig, Tender, TenderRecord};
use crate::services::TenderFilter;
use crate::utils::{http, parse_timestamp};

/// Raw access to the registry endpoints.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Fetch one listing page; `offset` is empty for the first page.
    async fn fetch_page(&self, offset: &str) -> Result<ListingPage>;

    /// Fetch the full record of one tender.
    async fn fetch_detail(&self, id: &str) -> Result<TenderRecord>;
}

/// HTTP implementation of [`RegistryApi`].
pub struct HttpRegistryApi {
    client: Client,
    config: RegistryConfig,
}

impl HttpRegistryApi {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_async_client(config)?,
            config: config.clone(),
        })
    }

    /// Listing request for the page at `offset`; the first page sends an
    /// empty offset.
    fn listing_request(&self, offset: &str) -> reqwest::RequestBuilder {
        let mut query: Vec<(&str, String)> = vec![
            ("offset", offset.to_string()),
            ("limit", self.config.page_limit.to_string()),
            ("mode", self.config.feed_mode.clone()),
            ("descending", "1".to_string()),
        ];
        if !self.config.opt_fields.is_empty() {
            query.push(("opt_fields", self.config.opt_fields.join(",")));
        }
        self.client.get(&self.config.api_url).query(&query)
    }

    fn detail_request(&self, id: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), id);
        self.client.get(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::registry(
                context,
                format!("status {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
            ));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn fetch_page(&self, offset: &str) -> Result<ListingPage> {
        self.get_json(self.listing_request(offset), "listing").await
    }

    async fn fetch_detail(&self, id: &str) -> Result<TenderRecord> {
        let detail: DetailResponse = self.get_json(self.detail_request(id), id).await?;
        Ok(detail.data)
    }
}

/// Counters gathered during one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub pages: usize,
    pub listed: usize,
    pub malformed: usize,
    pub in_window: usize,
    pub competitive: usize,
    pub matched: usize,
    pub enrichment_failures: usize,
    pub hit_page_cap: bool,
}

/// Paginating, filtering registry client.
pub struct RegistryClient {
    api: Box<dyn RegistryApi>,
    filter: TenderFilter,
    max_pages: usize,
    stale_run_threshold: usize,
    detail_delay: StdDuration,
}

impl RegistryClient {
    /// Create a client over any [`RegistryApi`].
    pub fn new(api: Box<dyn RegistryApi>, filter: TenderFilter, config: &RegistryConfig) -> Self {
        Self {
            api,
            filter,
            max_pages: config.max_pages.max(1),
            stale_run_threshold: config.stale_run_threshold.max(1),
            detail_delay: StdDuration::from_millis(config.detail_delay_ms),
        }
    }

    /// Create an HTTP-backed client from the application config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = HttpRegistryApi::new(&config.registry)?;
        let filter = TenderFilter::new(&config.filter)?;
        Ok(Self::new(Box::new(api), filter, &config.registry))
    }

    /// Matching tenders modified within `lookback`, newest first.
    ///
    /// Any page failure is logged and yields an empty list.
    pub async fn fetch_candidates(&self, lookback: Duration) -> Vec<Tender> {
        match self.try_fetch_candidates(lookback).await {
            Ok(tenders) => tenders,
            Err(e) => {
                log::error!("Registry fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`fetch_candidates`](Self::fetch_candidates) but reports page
    /// failures to the caller. Partial results are discarded on failure.
    pub async fn try_fetch_candidates(&self, lookback: Duration) -> Result<Vec<Tender>> {
        let cutoff = Utc::now()
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        log::info!(
            "Searching tenders modified since {}",
            cutoff.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let (tenders, stats) = self.fetch_since(cutoff).await?;
        log::info!(
            "Fetched {} page(s): {} listed, {} in window, {} competitive, {} matched",
            stats.pages,
            stats.listed,
            stats.in_window,
            stats.competitive,
            stats.matched
        );
        Ok(tenders)
    }

    /// Full fetch against an explicit cutoff.
    pub async fn fetch_since(&self, cutoff: DateTime<Utc>) -> Result<(Vec<Tender>, FetchStats)> {
        let mut stats = FetchStats::default();
        let window = self.collect_window(cutoff, &mut stats).await?;
        stats.in_window = window.len();

        let mut matched = self.select(window, &mut stats).await;
        matched.sort_by(|a, b| b.last_modified_at.cmp(&a.last_modified_at));
        stats.matched = matched.len();
        Ok((matched, stats))
    }

    /// Page through the listing until the cutoff, the end of the feed or the
    /// page cap.
    async fn collect_window(
        &self,
        cutoff: DateTime<Utc>,
        stats: &mut FetchStats,
    ) -> Result<Vec<Tender>> {
        let mut window = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = String::new();
        let mut stale_run = 0usize;

        for page_no in 1..=self.max_pages {
            let page = self
                .api
                .fetch_page(&offset)
                .await
                .map_err(|e| AppError::registry(format!("listing page {page_no}"), e))?;
            stats.pages += 1;

            if page.data.is_empty() {
                return Ok(window);
            }
            let next = page.next_offset().map(str::to_string);

            for summary in page.data {
                stats.listed += 1;

                let modified = summary.date_modified.as_deref().and_then(parse_timestamp);
                let Some(modified) = modified.filter(|_| !summary.id.is_empty()) else {
                    stats.malformed += 1;
                    log::debug!(
                        "Skipping listing entry {:?} with date {:?}",
                        summary.id,
                        summary.date_modified
                    );
                    continue;
                };

                // One stray old entry is not the end of the window; a run is.
                if modified < cutoff {
                    stale_run += 1;
                    if stale_run >= self.stale_run_threshold {
                        log::debug!("Reached cutoff on page {}", page_no);
                        return Ok(window);
                    }
                    continue;
                }
                stale_run = 0;

                if seen.insert(summary.id.clone()) {
                    window.push(Tender::from_summary(summary, modified));
                }
            }

            match next {
                Some(next) => offset = next,
                None => return Ok(window),
            }
        }

        stats.hit_page_cap = true;
        log::warn!(
            "Stopped after {} pages without reaching the cutoff; older tenders were not checked",
            self.max_pages
        );
        Ok(window)
    }

    /// Apply both predicates and enrich the survivors.
    async fn select(&self, window: Vec<Tender>, stats: &mut FetchStats) -> Vec<Tender> {
        let mut matched = Vec::new();

        for mut tender in window {
            if !tender.has_predicate_fields() {
                // Listing without opt_fields: the record is needed to decide.
                if !self.enrich(&mut tender, stats).await {
                    continue;
                }
            }

            if !self.filter.is_competitive(&tender.category_type) {
                continue;
            }
            stats.competitive += 1;

            if !self.filter.is_translation_candidate(Some(&tender.title)) {
                continue;
            }

            if tender.details.is_none() {
                self.enrich(&mut tender, stats).await;
            }
            log::info!(
                "Found {}: {}",
                tender.display_id(),
                crate::utils::truncate_graphemes(&tender.title, 70)
            );
            matched.push(tender);
        }

        matched
    }

    /// Fetch and merge the detail record. Returns whether it succeeded.
    async fn enrich(&self, tender: &mut Tender, stats: &mut FetchStats) -> bool {
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        match self.api.fetch_detail(&tender.internal_id).await {
            Ok(record) => {
                tender.enrich(record);
                true
            }
            Err(e) => {
                stats.enrichment_failures += 1;
                log::warn!("Detail fetch failed for {}: {}", tender.internal_id, e);
                false
            }
        }
    }
}
