//! Service layer for the tender monitor.
//!
//! This module contains the collaborators the monitor drives:
//! - Registry access and candidate selection (`RegistryClient`)
//! - Matching predicates (`TenderFilter`)
//! - Message rendering and delivery (`Notifier`, `TelegramNotifier`)

mod filter;
mod notifier;
mod registry;

pub use filter::TenderFilter;
pub use notifier::{MessageFormatter, Notifier, TelegramNotifier};
pub use registry::{FetchStats, HttpRegistryApi, RegistryApi, RegistryClient};
