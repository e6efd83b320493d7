use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dealwatch_storage::HttpClient;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::env_var;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl ChannelResult {
    pub fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send(&self, address: &str, message: &str, media_url: Option<&str>) -> ChannelResult;
}

fn e164() -> Option<&'static Regex> {
    static E164: OnceLock<Option<Regex>> = OnceLock::new();
    E164.get_or_init(|| Regex::new(r"^\+[1-9]\d{6,14}$").ok()).as_ref()
}

/// Strip whitespace and any `whatsapp:` prefix; `None` unless the rest is E.164.
pub fn normalize_address(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let number = compact.strip_prefix("whatsapp:").unwrap_or(&compact);
    e164()?.is_match(number).then(|| number.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base: String,
}

impl TwilioConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: env_var("TWILIO_ACCOUNT_SID")?,
            auth_token: env_var("TWILIO_AUTH_TOKEN")?,
            from_number: env_var("TWILIO_WHATSAPP_NUMBER")?,
            api_base: env_var("TWILIO_API_BASE").unwrap_or_else(|| "https://api.twilio.com".into()),
        })
    }
}

fn whatsapp(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: Option<String>,
    message: Option<String>,
}

/// WhatsApp delivery through the Twilio messages API.
#[derive(Debug, Clone)]
pub struct WhatsAppChannel {
    http: Arc<HttpClient>,
    config: Option<TwilioConfig>,
}

impl WhatsAppChannel {
    pub fn new(http: Arc<HttpClient>, config: Option<TwilioConfig>) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl MessagingChannel for WhatsAppChannel {
    async fn send(&self, address: &str, message: &str, media_url: Option<&str>) -> ChannelResult {
        let Some(config) = &self.config else {
            return ChannelResult::failed("messaging not configured");
        };
        let Some(number) = normalize_address(address) else {
            return ChannelResult::failed(format!("invalid address {address}"));
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.api_base, config.account_sid
        );
        let mut form = vec![
            ("From", whatsapp(&config.from_number)),
            ("To", whatsapp(&number)),
            ("Body", message.to_string()),
        ];
        if let Some(media) = media_url {
            form.push(("MediaUrl", media.to_string()));
        }

        let result = self
            .http
            .execute("twilio", |client| {
                client
                    .post(&url)
                    .basic_auth(&config.account_sid, Some(&config.auth_token))
                    .form(&form)
            })
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) => return ChannelResult::failed(err.to_string()),
        };
        let parsed: Option<TwilioMessage> = response.json().ok();
        if response.is_success() {
            ChannelResult::sent(parsed.and_then(|m| m.sid))
        } else {
            let detail = parsed
                .and_then(|m| m.message)
                .unwrap_or_else(|| response.text());
            ChannelResult::failed(format!("twilio returned {}: {detail}", response.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealwatch_storage::HttpClientConfig;

    #[test]
    fn addresses_must_be_e164() {
        assert_eq!(normalize_address("+39 333 123 4567"), Some("+393331234567".into()));
        assert_eq!(normalize_address("whatsapp:+14155550100"), Some("+14155550100".into()));
        assert_eq!(normalize_address("3331234567"), None);
        assert_eq!(normalize_address("+0123456789"), None);
        assert_eq!(normalize_address("+12345"), None);
        assert_eq!(normalize_address(""), None);
    }

    #[test]
    fn whatsapp_prefix_is_added_once() {
        assert_eq!(whatsapp("+14155550100"), "whatsapp:+14155550100");
        assert_eq!(whatsapp("whatsapp:+14155550100"), "whatsapp:+14155550100");
    }

    #[tokio::test]
    async fn unconfigured_channel_reports_failure() {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).expect("client"));
        let channel = WhatsAppChannel::new(http, None);
        let result = channel.send("+14155550100", "hi", None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("messaging not configured"));
    }
}
