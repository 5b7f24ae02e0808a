// src/services/filter.rs

//! Tender matching predicates.
//!
//! The subject-matter check runs on the free-text title: either every
//! configured keyword occurs, or the numeric part of the CPV code does. The
//! registry listing offers no reliable server-side CPV filter, so the title
//! is the only signal available before a detail fetch.

use std::collections::HashSet;

use crate::error::Result;
use crate::models::FilterConfig;

/// Compiled form of [`FilterConfig`].
#[derive(Debug, Clone)]
pub struct TenderFilter {
    competitive_types: HashSet<String>,
    keywords: Vec<String>,
    cpv_prefix: String,
}

impl TenderFilter {
    /// Build a filter, rejecting a malformed CPV code.
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let cpv_prefix = config.cpv_prefix()?.to_string();
        Ok(Self {
            competitive_types: config.competitive_types.iter().cloned().collect(),
            keywords: config
                .title_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            cpv_prefix,
        })
    }

    /// Whether `kind` is one of the configured competitive procedure types.
    pub fn is_competitive(&self, kind: &str) -> bool {
        !kind.is_empty() && self.competitive_types.contains(kind)
    }

    /// Whether a title looks like a written-translation tender.
    pub fn is_translation_candidate(&self, title: Option<&str>) -> bool {
        let Some(title) = title.filter(|t| !t.is_empty()) else {
            return false;
        };
        let lowered = title.to_lowercase();

        let all_keywords =
            !self.keywords.is_empty() && self.keywords.iter().all(|k| lowered.contains(k));
        all_keywords || lowered.contains(&self.cpv_prefix)
    }
}
