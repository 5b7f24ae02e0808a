// src/models/mod.rs

//! Domain models for the tender monitor.

pub mod config;
mod tender;

// Re-export all public types
pub use config::{
    Config, FilterConfig, LinkTemplate, LoggingConfig, RegistryConfig, ScheduleConfig,
    StorageConfig, TelegramConfig,
};
pub use tender::{
    DetailResponse, ListingPage, Money, NextPage, Organization, Period, Tender, TenderDetails,
    TenderRecord, TenderSummary,
};
