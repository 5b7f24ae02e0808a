//! In-memory stand-ins for the registry and the notification transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{ListingPage, NextPage, Tender, TenderRecord, TenderSummary};
use crate::services::{Notifier, RegistryApi};

pub fn summary(id: &str, modified: DateTime<Utc>, kind: &str, title: &str) -> TenderSummary {
    TenderSummary {
        id: id.to_string(),
        date_modified: Some(modified.to_rfc3339()),
        tender_id: Some(format!("UA-{id}")),
        title: Some(title.to_string()),
        procurement_method_type: Some(kind.to_string()),
    }
}

/// Listing entry as returned without `opt_fields`.
pub fn untyped_summary(id: &str, modified: DateTime<Utc>) -> TenderSummary {
    TenderSummary {
        id: id.to_string(),
        date_modified: Some(modified.to_rfc3339()),
        ..TenderSummary::default()
    }
}

pub fn record(id: &str, kind: &str, title: &str) -> TenderRecord {
    TenderRecord {
        id: id.to_string(),
        tender_id: Some(format!("UA-{id}")),
        title: Some(title.to_string()),
        procurement_method_type: Some(kind.to_string()),
        ..TenderRecord::default()
    }
}

#[derive(Default)]
struct RegistryState {
    pages: Vec<Vec<TenderSummary>>,
    details: HashMap<String, TenderRecord>,
    failing_page: Option<usize>,
    failing_details: HashSet<String>,
    page_calls: Vec<String>,
    detail_calls: Vec<String>,
}

/// Registry serving fixed pages chained by `p<N>` cursors.
#[derive(Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    pub fn new(pages: Vec<Vec<TenderSummary>>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().pages = pages;
        fake
    }

    pub fn with_detail(self, record: TenderRecord) -> Self {
        self.state
            .lock()
            .unwrap()
            .details
            .insert(record.id.clone(), record);
        self
    }

    /// Make the page at `index` (0-based) fail.
    pub fn failing_page(self, index: usize) -> Self {
        self.state.lock().unwrap().failing_page = Some(index);
        self
    }

    pub fn failing_detail(self, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_details
            .insert(id.to_string());
        self
    }

    pub fn page_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().page_calls.clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().detail_calls.clone()
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn fetch_page(&self, offset: &str) -> Result<ListingPage> {
        let mut state = self.state.lock().unwrap();
        state.page_calls.push(offset.to_string());

        let index = if offset.is_empty() {
            0
        } else {
            offset
                .trim_start_matches('p')
                .parse::<usize>()
                .map_err(|e| AppError::registry("fake", e))?
        };
        if state.failing_page == Some(index) {
            return Err(AppError::registry("fake", "connection refused"));
        }

        let data = state.pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < state.pages.len()).then(|| NextPage {
            offset: Some(format!("p{}", index + 1)),
        });
        Ok(ListingPage { data, next_page })
    }

    async fn fetch_detail(&self, id: &str) -> Result<TenderRecord> {
        let mut state = self.state.lock().unwrap();
        state.detail_calls.push(id.to_string());
        if state.failing_details.contains(id) {
            return Err(AppError::registry(id, "timeout"));
        }
        Ok(state.details.get(id).cloned().unwrap_or_else(|| TenderRecord {
            id: id.to_string(),
            ..TenderRecord::default()
        }))
    }
}

#[derive(Default)]
struct NotifierState {
    failing: HashSet<String>,
    sent: Vec<String>,
    attempts: Vec<String>,
    texts: Vec<String>,
}

/// Notifier that records deliveries and can refuse chosen tenders.
#[derive(Clone, Default)]
pub struct FakeNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(self, id: &str) -> Self {
        self.state.lock().unwrap().failing.insert(id.to_string());
        self
    }

    pub fn recover(&self, id: &str) {
        self.state.lock().unwrap().failing.remove(id);
    }

    /// Ids delivered successfully, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Ids attempted, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.state.lock().unwrap().texts.clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_tender(&self, tender: &Tender) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(tender.internal_id.clone());
        if state.failing.contains(&tender.internal_id) {
            return Err(AppError::notify("chat not found"));
        }
        state.sent.push(tender.internal_id.clone());
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.state.lock().unwrap().texts.push(text.to_string());
        Ok(())
    }
}
