//! Tender data structures.
//!
//! `ListingPage` / `TenderSummary` / `TenderRecord` mirror the registry's
//! JSON; `Tender` is the normalized candidate the rest of the crate works
//! with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of the registry listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub data: Vec<TenderSummary>,

    #[serde(default)]
    pub next_page: Option<NextPage>,
}

impl ListingPage {
    /// Cursor for the following page, `None` at the end of the feed.
    pub fn next_offset(&self) -> Option<&str> {
        self.next_page
            .as_ref()
            .and_then(|p| p.offset.as_deref())
            .filter(|o| !o.is_empty())
    }
}

/// Pagination cursor returned with a listing page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextPage {
    /// Opaque cursor; the registry sends either a string or a number
    #[serde(default, deserialize_with = "de::opt_string_or_number")]
    pub offset: Option<String>,
}

/// A listing entry as returned by the registry.
///
/// Only `id` and `dateModified` are guaranteed; the rest appear when asked
/// for through `opt_fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderSummary {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub date_modified: Option<String>,

    #[serde(default, rename = "tenderID")]
    pub tender_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub procurement_method_type: Option<String>,
}

/// Envelope of the detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DetailResponse {
    pub data: TenderRecord,
}

/// Full tender record from the detail endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderRecord {
    #[serde(default)]
    pub id: String,

    #[serde(default, rename = "tenderID")]
    pub tender_id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub procurement_method_type: Option<String>,

    #[serde(default)]
    pub date_modified: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub value: Option<Money>,

    #[serde(default)]
    pub tender_period: Option<Period>,

    #[serde(default)]
    pub procuring_entity: Option<Organization>,
}

/// Monetary amount.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    #[serde(default)]
    pub amount: f64,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub value_added_tax_included: Option<bool>,
}

/// Start/end period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    #[serde(default)]
    pub start_date: Option<String>,

    #[serde(default)]
    pub end_date: Option<String>,
}

/// Procuring entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Organization {
    #[serde(default)]
    pub name: Option<String>,
}

/// Fields only available from the detail endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenderDetails {
    pub value: Option<Money>,
    /// Submission deadline
    pub deadline: Option<DateTime<Utc>>,
    pub procuring_entity: Option<String>,
    pub description: Option<String>,
}

/// A candidate tender.
#[derive(Debug, Clone, PartialEq)]
pub struct Tender {
    /// Registry id; the only deduplication key
    pub internal_id: String,

    /// Human-facing id such as `UA-2026-01-01-000001-a`
    pub public_id: Option<String>,

    /// Procurement method type
    pub category_type: String,

    pub title: String,

    pub last_modified_at: DateTime<Utc>,

    /// Present once the detail fetch succeeded
    pub details: Option<TenderDetails>,
}

impl Tender {
    /// Build a candidate from a listing entry with an already parsed timestamp.
    pub fn from_summary(summary: TenderSummary, last_modified_at: DateTime<Utc>) -> Self {
        Self {
            internal_id: summary.id,
            public_id: summary.tender_id.filter(|s| !s.is_empty()),
            category_type: summary.procurement_method_type.unwrap_or_default(),
            title: summary.title.unwrap_or_default(),
            last_modified_at,
            details: None,
        }
    }

    /// Whether the listing carried what the predicates need.
    pub fn has_predicate_fields(&self) -> bool {
        !self.category_type.is_empty() && !self.title.is_empty()
    }

    /// Merge a detail record, keeping listing values the record lacks.
    pub fn enrich(&mut self, record: TenderRecord) {
        if let Some(id) = record.tender_id.filter(|s| !s.is_empty()) {
            self.public_id = Some(id);
        }
        if let Some(kind) = record.procurement_method_type.filter(|s| !s.is_empty()) {
            self.category_type = kind;
        }
        if let Some(title) = record.title.filter(|s| !s.is_empty()) {
            self.title = title;
        }

        let deadline = record
            .tender_period
            .and_then(|p| p.end_date)
            .and_then(|raw| crate::utils::parse_timestamp(&raw));

        self.details = Some(TenderDetails {
            value: record.value,
            deadline,
            procuring_entity: record.procuring_entity.and_then(|o| o.name),
            description: record.description,
        });
    }

    /// Human-facing id, falling back to the registry id.
    pub fn display_id(&self) -> &str {
        self.public_id.as_deref().unwrap_or(&self.internal_id)
    }

    /// Render a link template.
    ///
    /// Supported placeholders: `{id}`, `{public_id}`.
    pub fn format(&self, template: &str) -> String {
        template
            .replace("{id}", &self.internal_id)
            .replace("{public_id}", self.display_id())
    }
}

mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        S(String),
        N(serde_json::Number),
    }

    pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<StringOrNumber>::deserialize(deserializer)?;
        Ok(value.map(|v| match v {
            StringOrNumber::S(s) => s,
            StringOrNumber::N(n) => n.to_string(),
        }))
    }
}
