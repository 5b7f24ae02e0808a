//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable names recognised by [`Config::apply_env_with`].
pub mod env {
    pub const API_URL: &str = "PROZORRO_API_URL";
    pub const CPV_CODE: &str = "CPV_CODE";
    pub const BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
    pub const CHAT_ID: &str = "TELEGRAM_CHAT_ID";
    pub const TIMEZONE: &str = "TIMEZONE";
    pub const RETENTION_DAYS: &str = "RETENTION_DAYS";
    pub const LOOKBACK_HOURS: &str = "LOOKBACK_HOURS";
    pub const CHECK_SCHEDULE: &str = "CHECK_SCHEDULE";
    pub const DATA_FILE: &str = "DATA_FILE";
    pub const COMPETITIVE_TYPES: &str = "COMPETITIVE_TYPES";
}

/// Largest accepted `lookback_hours` (one year).
pub const MAX_LOOKBACK_HOURS: i64 = 8_760;

/// Largest accepted `retention_days` (a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry API access and pagination limits
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Which tenders count as a match
    #[serde(default)]
    pub filter: FilterConfig,

    /// Notification transport settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Check cadence and lookback
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Processed record location and retention
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("Config load failed from {:?}: {}. Using defaults.", path, e);
            Self::default()
        })
    }

    /// Load the file layer and then overlay the process environment.
    pub fn from_sources(path: impl AsRef<Path>) -> Self {
        let mut config = Self::load_or_default(path);
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from an environment lookup.
    ///
    /// Empty values are ignored. Numeric values that fail to parse are logged
    /// and ignored so one typo does not take the monitor down.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(env::API_URL) {
            self.registry.api_url = v;
        }
        if let Some(v) = get(env::CPV_CODE) {
            self.filter.cpv_code = v;
        }
        if let Some(v) = get(env::BOT_TOKEN) {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get(env::CHAT_ID) {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = get(env::TIMEZONE) {
            self.schedule.timezone = v;
        }
        if let Some(v) = get(env::CHECK_SCHEDULE) {
            self.schedule.cron = v;
        }
        if let Some(v) = get(env::DATA_FILE) {
            self.storage.data_file = v;
        }
        if let Some(v) = get(env::COMPETITIVE_TYPES) {
            self.filter.competitive_types = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get(env::RETENTION_DAYS) {
            match v.parse() {
                Ok(days) => self.storage.retention_days = days,
                Err(_) => log::warn!("Ignoring {}={:?}: not a number", env::RETENTION_DAYS, v),
            }
        }
        if let Some(v) = get(env::LOOKBACK_HOURS) {
            match v.parse() {
                Ok(hours) => self.schedule.lookback_hours = hours,
                Err(_) => log::warn!("Ignoring {}={:?}: not a number", env::LOOKBACK_HOURS, v),
            }
        }
    }

    /// Fail unless both notification credentials are present.
    pub fn require_credentials(&self) -> Result<(String, String)> {
        let token = self
            .telegram
            .bot_token
            .clone()
            .ok_or_else(|| AppError::config(format!("{} is not set", env::BOT_TOKEN)))?;
        let chat_id = self
            .telegram
            .chat_id
            .clone()
            .ok_or_else(|| AppError::config(format!("{} is not set", env::CHAT_ID)))?;
        Ok((token, chat_id))
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.registry.api_url)?;
        if self.registry.user_agent.trim().is_empty() {
            return Err(AppError::validation("registry.user_agent is empty"));
        }
        if self.registry.timeout_secs == 0 {
            return Err(AppError::validation("registry.timeout_secs must be > 0"));
        }
        if self.registry.page_limit == 0 {
            return Err(AppError::validation("registry.page_limit must be > 0"));
        }
        if self.registry.max_pages == 0 {
            return Err(AppError::validation("registry.max_pages must be > 0"));
        }
        if self.registry.stale_run_threshold == 0 {
            return Err(AppError::validation(
                "registry.stale_run_threshold must be > 0",
            ));
        }
        self.filter.cpv_prefix()?;
        if self.filter.competitive_types.is_empty() {
            return Err(AppError::validation("filter.competitive_types is empty"));
        }
        if self.filter.title_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(AppError::validation("filter.title_keywords is empty"));
        }

        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.schedule.lookback_hours) {
            return Err(AppError::validation(format!(
                "{} (schedule.lookback_hours) must be between 1 and {}, got {}",
                env::LOOKBACK_HOURS,
                MAX_LOOKBACK_HOURS,
                self.schedule.lookback_hours
            )));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.storage.retention_days) {
            return Err(AppError::validation(format!(
                "{} (storage.retention_days) must be between 1 and {}, got {}",
                env::RETENTION_DAYS,
                MAX_RETENTION_DAYS,
                self.storage.retention_days
            )));
        }

        self.schedule.tz()?;
        let interval = self.schedule.interval()?;
        let lookback = self.schedule.lookback();
        if lookback <= interval {
            return Err(AppError::validation(format!(
                "schedule.lookback_hours ({}) must exceed the check interval ({}h)",
                self.schedule.lookback_hours,
                interval.num_hours()
            )));
        }
        if lookback < interval * 2 {
            log::warn!(
                "Lookback of {}h leaves little margin over the {}h check interval",
                self.schedule.lookback_hours,
                interval.num_hours()
            );
        }

        if self.storage.data_file.trim().is_empty() {
            return Err(AppError::validation("storage.data_file is empty"));
        }
        if self.storage.retention() <= lookback {
            return Err(AppError::validation(format!(
                "storage.retention_days ({}) must exceed the lookback window",
                self.storage.retention_days
            )));
        }
        Ok(())
    }
}

/// Registry API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Tender listing endpoint; detail requests append `/{id}`
    #[serde(default = "defaults::api_url")]
    pub api_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Page size requested from the listing
    #[serde(default = "defaults::page_limit")]
    pub page_limit: u32,

    /// Hard cap on pages fetched in one tick
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Feed selector sent as `mode`
    #[serde(default = "defaults::feed_mode")]
    pub feed_mode: String,

    /// Extra fields requested with each listing entry
    #[serde(default = "defaults::opt_fields")]
    pub opt_fields: Vec<String>,

    /// Consecutive entries older than the cutoff that end pagination
    #[serde(default = "defaults::stale_run_threshold")]
    pub stale_run_threshold: usize,

    /// Pause between detail requests in milliseconds
    #[serde(default = "defaults::detail_delay")]
    pub detail_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_url: defaults::api_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            page_limit: defaults::page_limit(),
            max_pages: defaults::max_pages(),
            feed_mode: defaults::feed_mode(),
            opt_fields: defaults::opt_fields(),
            stale_run_threshold: defaults::stale_run_threshold(),
            detail_delay_ms: defaults::detail_delay(),
        }
    }
}

/// Tender matching rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// CPV classification code of interest, e.g. `79530000-8`
    #[serde(default = "defaults::cpv_code")]
    pub cpv_code: String,

    /// Substrings that must all occur in a title (case-insensitive)
    #[serde(default = "defaults::title_keywords")]
    pub title_keywords: Vec<String>,

    /// Procurement method types treated as competitive procedures
    #[serde(default = "defaults::competitive_types")]
    pub competitive_types: Vec<String>,
}

impl FilterConfig {
    /// Numeric part of the CPV code, matched anywhere in a title.
    pub fn cpv_prefix(&self) -> Result<&str> {
        let re = Regex::new(r"^(\d{8})(?:-\d)?$").map_err(|e| AppError::config(e.to_string()))?;
        let code = self.cpv_code.trim();
        re.captures(code)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                AppError::validation(format!(
                    "filter.cpv_code {:?} is not an 8-digit CPV code",
                    self.cpv_code
                ))
            })
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cpv_code: defaults::cpv_code(),
            title_keywords: defaults::title_keywords(),
            competitive_types: defaults::competitive_types(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL
    #[serde(default = "defaults::telegram_api_base")]
    pub api_base: String,

    /// Bot token; required at startup
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Destination chat; required at startup
    #[serde(default)]
    pub chat_id: Option<String>,

    /// Pause between two notifications in milliseconds
    #[serde(default = "defaults::send_delay")]
    pub send_delay_ms: u64,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Links appended to each message.
    ///
    /// Supported placeholders: `{id}` (registry id) and `{public_id}`
    /// (human-facing tender id, falling back to the registry id).
    #[serde(default = "defaults::link_templates")]
    pub link_templates: Vec<LinkTemplate>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::telegram_api_base(),
            bot_token: None,
            chat_id: None,
            send_delay_ms: defaults::send_delay(),
            timeout_secs: defaults::timeout(),
            link_templates: defaults::link_templates(),
        }
    }
}

/// A labelled link rendered under each notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkTemplate {
    pub label: String,
    pub url: String,
}

/// Check cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression with a seconds field, e.g. `0 0 9 * * *`
    #[serde(default = "defaults::cron")]
    pub cron: String,

    /// IANA timezone for the schedule and for displayed dates
    #[serde(default = "defaults::timezone")]
    pub timezone: String,

    /// How far back each check looks, in hours
    #[serde(default = "defaults::lookback_hours")]
    pub lookback_hours: i64,
}

impl ScheduleConfig {
    /// Parsed cron schedule.
    pub fn parsed(&self) -> Result<Schedule> {
        Schedule::from_str(&self.cron)
            .map_err(|e| AppError::schedule(format!("invalid cron {:?}: {}", self.cron, e)))
    }

    /// Parsed display/schedule timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| AppError::schedule(format!("unknown timezone {:?}: {}", self.timezone, e)))
    }

    /// Longest gap between two consecutive fire times over the next week.
    pub fn interval(&self) -> Result<Duration> {
        let schedule = self.parsed()?;
        let tz = self.tz()?;
        let now = Utc::now().with_timezone(&tz);
        let horizon = now + Duration::days(7);

        let mut upcoming = schedule.after(&now);
        let mut prev = upcoming
            .next()
            .ok_or_else(|| AppError::schedule(format!("cron {:?} never fires", self.cron)))?;
        let mut widest = Duration::zero();
        for next in upcoming {
            widest = widest.max(next.clone() - prev.clone());
            if next > horizon {
                break;
            }
            prev = next;
        }
        if widest.is_zero() {
            return Err(AppError::schedule(format!(
                "cron {:?} fires fewer than twice a week",
                self.cron
            )));
        }
        Ok(widest)
    }

    /// Lookback window. Saturates instead of overflowing on absurd values.
    pub fn lookback(&self) -> Duration {
        Duration::try_hours(self.lookback_hours).unwrap_or(Duration::MAX)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: defaults::cron(),
            timezone: defaults::timezone(),
            lookback_hours: defaults::lookback_hours(),
        }
    }
}

/// Processed record settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding processed tender ids
    #[serde(default = "defaults::data_file")]
    pub data_file: String,

    /// Entries older than this many days are evicted before each tick
    #[serde(default = "defaults::retention_days")]
    pub retention_days: i64,
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::try_days(self.retention_days).unwrap_or(Duration::MAX)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: defaults::data_file(),
            retention_days: defaults::retention_days(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use super::LinkTemplate;

    // Registry defaults
    pub fn api_url() -> String {
        "https://api.prozorro.gov.ua/api/2.5/tenders".into()
    }
    pub fn user_agent() -> String {
        "Prozorro Tender Monitor Bot/1.0".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn page_limit() -> u32 {
        100
    }
    pub fn max_pages() -> usize {
        20
    }
    pub fn feed_mode() -> String {
        "_all_".into()
    }
    pub fn opt_fields() -> Vec<String> {
        vec![
            "tenderID".into(),
            "title".into(),
            "procurementMethodType".into(),
        ]
    }
    pub fn stale_run_threshold() -> usize {
        3
    }
    pub fn detail_delay() -> u64 {
        0
    }

    // Filter defaults
    pub fn cpv_code() -> String {
        "79530000-8".into()
    }
    pub fn title_keywords() -> Vec<String> {
        vec!["письмов".into(), "переклад".into()]
    }
    pub fn competitive_types() -> Vec<String> {
        vec![
            "aboveThreshold".into(),
            "aboveThresholdUA".into(),
            "aboveThresholdEU".into(),
            "aboveThreshold.defense".into(),
            "aboveThresholdUA.defense".into(),
            "competitiveDialogueUA".into(),
            "competitiveDialogueEU".into(),
            "competitiveOrdering".into(),
        ]
    }

    // Telegram defaults
    pub fn telegram_api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn send_delay() -> u64 {
        2000
    }
    pub fn link_templates() -> Vec<LinkTemplate> {
        vec![
            LinkTemplate {
                label: "Переглянути на Prozorro".into(),
                url: "https://prozorro.gov.ua/tender/{public_id}".into(),
            },
            LinkTemplate {
                label: "Майданчик UUB".into(),
                url: "https://tender.uub.com.ua/tender/{id}/".into(),
            },
        ]
    }

    // Schedule defaults
    pub fn cron() -> String {
        "0 0 9 * * *".into()
    }
    pub fn timezone() -> String {
        "Europe/Kyiv".into()
    }
    pub fn lookback_hours() -> i64 {
        48
    }

    // Storage defaults
    pub fn data_file() -> String {
        "data/processed_tenders.json".into()
    }
    pub fn retention_days() -> i64 {
        90
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_lookback_covers_daily_schedule() {
        let config = Config::default();
        let interval = config.schedule.interval().unwrap();
        // a DST switch inside the week stretches one day to 25h
        assert!(interval >= Duration::hours(23) && interval <= Duration::hours(25));
        assert!(config.schedule.lookback() > interval);
    }

    #[test]
    fn validate_rejects_lookback_shorter_than_interval() {
        let mut config = Config::default();
        config.schedule.lookback_hours = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_hourly_schedule_with_margin() {
        let mut config = Config::default();
        config.schedule.cron = "0 0 * * * *".into();
        config.schedule.timezone = "UTC".into();
        config.schedule.lookback_hours = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_retention_inside_lookback() {
        let mut config = Config::default();
        config.storage.retention_days = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_timezone_and_cron() {
        let mut config = Config::default();
        config.schedule.timezone = "Mars/Olympus".into();
        assert!(matches!(config.validate(), Err(AppError::Schedule(_))));

        let mut config = Config::default();
        config.schedule.cron = "every morning".into();
        assert!(matches!(config.validate(), Err(AppError::Schedule(_))));
    }

    #[test]
    fn validate_rejects_empty_competitive_list() {
        let mut config = Config::default();
        config.filter.competitive_types.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cpv_prefix_extracts_digits() {
        let filter = FilterConfig::default();
        assert_eq!(filter.cpv_prefix().unwrap(), "79530000");

        let filter = FilterConfig {
            cpv_code: "7953".into(),
            ..FilterConfig::default()
        };
        assert!(filter.cpv_prefix().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config.apply_env_with(lookup(&[
            (env::API_URL, "http://localhost:9000/tenders"),
            (env::BOT_TOKEN, "123:abc"),
            (env::CHAT_ID, "-100500"),
            (env::TIMEZONE, "UTC"),
            (env::RETENTION_DAYS, "120"),
            (env::COMPETITIVE_TYPES, "aboveThreshold, aboveThresholdUA ,"),
        ]));

        assert_eq!(config.registry.api_url, "http://localhost:9000/tenders");
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.telegram.chat_id.as_deref(), Some("-100500"));
        assert_eq!(config.schedule.timezone, "UTC");
        assert_eq!(config.storage.retention_days, 120);
        assert_eq!(
            config.filter.competitive_types,
            vec!["aboveThreshold".to_string(), "aboveThresholdUA".to_string()]
        );
    }

    #[test]
    fn env_ignores_empty_and_malformed_values() {
        let mut config = Config::default();
        config.apply_env_with(lookup(&[
            (env::CPV_CODE, "   "),
            (env::RETENTION_DAYS, "ninety"),
        ]));
        assert_eq!(config.filter.cpv_code, "79530000-8");
        assert_eq!(config.storage.retention_days, 90);
    }

    #[test]
    fn validate_rejects_huge_retention_from_env() {
        let mut config = Config::default();
        config.apply_env_with(lookup(&[(env::RETENTION_DAYS, "99999999")]));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains(env::RETENTION_DAYS));
        assert!(config.storage.retention() > Duration::days(MAX_RETENTION_DAYS));
    }

    #[test]
    fn validate_rejects_huge_lookback_from_env() {
        let mut config = Config::default();
        config.apply_env_with(lookup(&[(env::LOOKBACK_HOURS, "9999999999999999")]));

        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains(env::LOOKBACK_HOURS));
        assert_eq!(config.schedule.lookback(), Duration::MAX);
    }

    #[test]
    fn validate_accepts_bounds() {
        let mut config = Config::default();
        config.schedule.lookback_hours = MAX_LOOKBACK_HOURS;
        config.storage.retention_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());

        config.schedule.lookback_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_credentials_name_the_variable() {
        let config = Config::default();
        let err = config.require_credentials().unwrap_err();
        assert!(err.to_string().contains(env::BOT_TOKEN));

        let mut config = Config::default();
        config.telegram.bot_token = Some("token".into());
        let err = config.require_credentials().unwrap_err();
        assert!(err.to_string().contains(env::CHAT_ID));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [filter]
            competitive_types = ["aboveThreshold"]

            [schedule]
            lookback_hours = 72
            "#,
        )
        .unwrap();
        assert_eq!(config.filter.competitive_types.len(), 1);
        assert_eq!(config.filter.cpv_code, "79530000-8");
        assert_eq!(config.schedule.lookback_hours, 72);
        assert_eq!(config.registry.page_limit, 100);
    }
}
