// src/services/notifier.rs

//! Notification rendering and delivery.

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Config, LinkTemplate, Tender};
use crate::utils::{escape_html, format_amount, http, truncate_graphemes};

const NOT_SPECIFIED: &str = "Не вказано";
const DESCRIPTION_LIMIT: usize = 200;
const TEST_MESSAGE: &str = "✅ Prozorro Tender Monitor працює!\nТестове повідомлення від бота.";

/// Delivery of rendered messages to one fixed destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Render and send a notification for `tender`.
    async fn send_tender(&self, tender: &Tender) -> Result<()>;

    /// Send an arbitrary plain-text message.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Connectivity check.
    async fn send_test_message(&self) -> Result<()> {
        self.send_text(TEST_MESSAGE).await
    }
}

/// Renders a tender as an HTML-mode chat message.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    timezone: Tz,
    links: Vec<LinkTemplate>,
}

impl MessageFormatter {
    pub fn new(timezone: Tz, links: Vec<LinkTemplate>) -> Self {
        Self { timezone, links }
    }

    pub fn format(&self, tender: &Tender) -> String {
        let details = tender.details.as_ref();

        let budget = details
            .and_then(|d| d.value.as_ref())
            .map(|value| {
                let currency = value.currency.as_deref().unwrap_or("UAH");
                let vat = match value.value_added_tax_included {
                    Some(true) => " (з ПДВ)",
                    Some(false) => " (без ПДВ)",
                    None => "",
                };
                format!("{} {}{}", format_amount(value.amount), currency, vat)
            })
            .unwrap_or_else(|| NOT_SPECIFIED.to_string());

        let deadline = details
            .and_then(|d| d.deadline)
            .map(|dt| {
                dt.with_timezone(&self.timezone)
                    .format("%d.%m.%Y %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| NOT_SPECIFIED.to_string());

        let customer = details
            .and_then(|d| d.procuring_entity.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(NOT_SPECIFIED);

        let description = details
            .and_then(|d| d.description.as_deref())
            .filter(|s| !s.trim().is_empty())
            .map(|s| truncate_graphemes(s.trim(), DESCRIPTION_LIMIT))
            .unwrap_or_else(|| "Опис відсутній".to_string());

        let title = if tender.title.is_empty() {
            "Без назви"
        } else {
            tender.title.as_str()
        };

        let mut message = format!(
            "🔔 <b>Новий тендер на переклад</b>\n\n\
             📋 Назва: {}\n\
             🆔 Номер: {}\n\
             💰 Бюджет: {}\n\
             📅 Дедлайн подачі: {}\n\
             🏢 Замовник: {}\n\
             📝 Опис: {}\n",
            escape_html(title),
            escape_html(tender.display_id()),
            escape_html(&budget),
            deadline,
            escape_html(customer),
            escape_html(&description),
        );

        for link in &self.links {
            message.push_str(&format!(
                "\n🔗 {}:\n{}\n",
                escape_html(&link.label),
                escape_html(&tender.format(&link.url))
            ));
        }

        message
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
    formatter: MessageFormatter,
}

impl TelegramNotifier {
    pub fn new(
        api_base: &str,
        token: &str,
        chat_id: &str,
        timeout_secs: u64,
        formatter: MessageFormatter,
    ) -> Result<Self> {
        Ok(Self {
            client: http::create_notify_client(timeout_secs)?,
            endpoint: format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
            formatter,
        })
    }

    /// Build from config; fails when a credential is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (token, chat_id) = config.require_credentials()?;
        let formatter = MessageFormatter::new(
            config.schedule.tz()?,
            config.telegram.link_templates.clone(),
        );
        Self::new(
            &config.telegram.api_base,
            &token,
            &chat_id,
            config.telegram.timeout_secs,
            formatter,
        )
    }

    async fn post(&self, payload: serde_json::Value) -> Result<()> {
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        check_response(status, &body)
    }
}

/// Map a Bot API reply to success only when both the status and `ok` agree.
fn check_response(status: StatusCode, body: &[u8]) -> Result<()> {
    match serde_json::from_slice::<TelegramResponse>(body).ok() {
        Some(TelegramResponse { ok: true, .. }) if status.is_success() => Ok(()),
        Some(TelegramResponse { description, .. }) => Err(AppError::notify(format!(
            "status {}: {}",
            status.as_u16(),
            description.unwrap_or_else(|| "no description".to_string())
        ))),
        None => Err(AppError::notify(format!(
            "status {} with unreadable body",
            status.as_u16()
        ))),
    }
}

/// Body of a `sendMessage` call.
fn message_payload(chat_id: &str, text: &str, html: bool) -> serde_json::Value {
    let mut payload = json!({
        "chat_id": chat_id,
        "text": text,
        "disable_web_page_preview": true,
    });
    if html {
        payload["parse_mode"] = json!("HTML");
    }
    payload
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_tender(&self, tender: &Tender) -> Result<()> {
        let text = self.formatter.format(tender);
        self.post(message_payload(&self.chat_id, &text, true)).await?;
        log::info!("Sent notification for tender {}", tender.display_id());
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.post(message_payload(&self.chat_id, text, false)).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{Money, TenderDetails};

    fn formatter() -> MessageFormatter {
        MessageFormatter::new(
            chrono_tz::Europe::Kyiv,
            vec![LinkTemplate {
                label: "Prozorro".into(),
                url: "https://prozorro.gov.ua/tender/{public_id}".into(),
            }],
        )
    }

    fn tender() -> Tender {
        Tender {
            internal_id: "abc123".into(),
            public_id: Some("UA-2026-02-03-000123-a".into()),
            category_type: "aboveThreshold".into(),
            title: "Послуги письмового перекладу <терміново>".into(),
            last_modified_at: Utc.with_ymd_and_hms(2026, 2, 3, 8, 0, 0).unwrap(),
            details: Some(TenderDetails {
                value: Some(Money {
                    amount: 1_250_000.0,
                    currency: Some("UAH".into()),
                    value_added_tax_included: Some(true),
                }),
                deadline: Some(Utc.with_ymd_and_hms(2026, 2, 20, 16, 0, 0).unwrap()),
                procuring_entity: Some("ДП \"Документ\"".into()),
                description: Some("а".repeat(250)),
            }),
        }
    }

    #[test]
    fn test_format_full_message() {
        let text = formatter().format(&tender());

        assert!(text.contains("Послуги письмового перекладу &lt;терміново&gt;"));
        assert!(text.contains("💰 Бюджет: 1 250 000 UAH (з ПДВ)"));
        // 16:00 UTC is 18:00 in Kyiv in February
        assert!(text.contains("📅 Дедлайн подачі: 20.02.2026 18:00"));
        assert!(text.contains("ДП &quot;Документ&quot;"));
        assert!(text.contains(&format!("{}...", "а".repeat(200))));
        assert!(!text.contains(&"а".repeat(201)));
        assert!(text.contains("https://prozorro.gov.ua/tender/UA-2026-02-03-000123-a"));
    }

    #[test]
    fn test_format_without_details() {
        let mut t = tender();
        t.details = None;
        let text = formatter().format(&t);

        assert!(text.contains("💰 Бюджет: Не вказано"));
        assert!(text.contains("📅 Дедлайн подачі: Не вказано"));
        assert!(text.contains("📝 Опис: Опис відсутній"));
    }

    #[test]
    fn test_message_payload() {
        let html = message_payload("-100", "hi", true);
        assert_eq!(html["chat_id"], "-100");
        assert_eq!(html["parse_mode"], "HTML");
        assert_eq!(html["disable_web_page_preview"], true);

        let plain = message_payload("-100", "hi", false);
        assert!(plain.get("parse_mode").is_none());
    }

    #[test]
    fn test_check_response_accepts_ok() {
        assert!(check_response(StatusCode::OK, br#"{"ok":true,"result":{}}"#).is_ok());
    }

    #[test]
    fn test_check_response_reports_rejection() {
        let err = check_response(
            StatusCode::BAD_REQUEST,
            br#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Notify(_)));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("chat not found"));

        // ok:false wins even on a 200
        let err = check_response(StatusCode::OK, br#"{"ok":false}"#).unwrap_err();
        assert!(err.to_string().contains("no description"));
    }

    #[test]
    fn test_check_response_unreadable_body() {
        let err = check_response(StatusCode::BAD_GATEWAY, b"<html>502</html>").unwrap_err();
        assert!(matches!(err, AppError::Notify(_)));
        assert!(err.to_string().contains("502 with unreadable body"));
    }

    #[test]
    fn test_check_response_ok_body_on_error_status() {
        let err = check_response(StatusCode::INTERNAL_SERVER_ERROR, br#"{"ok":true}"#).unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = Config::default();
        assert!(matches!(
            TelegramNotifier::from_config(&config),
            Err(AppError::Config(_))
        ));
    }
}
