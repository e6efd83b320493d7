use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{EventType, Listing, TELEGRAM};
use dealwatch_storage::HttpClient;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::format::{self, MAX_ALBUM_ITEMS};
use crate::social::{call_json, id_at, PostResult, SocialPlatform};
use crate::env_var;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub channel_id: String,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            bot_token: env_var("TELEGRAM_BOT_TOKEN")?,
            channel_id: env_var("TELEGRAM_CHANNEL_ID")?,
            api_base: env_var("TELEGRAM_API_BASE")
                .unwrap_or_else(|| "https://api.telegram.org".into()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }
}

#[derive(Debug, Clone)]
pub struct TelegramPlatform {
    http: Arc<HttpClient>,
    config: Option<TelegramConfig>,
}

impl TelegramPlatform {
    pub fn new(http: Arc<HttpClient>, config: Option<TelegramConfig>) -> Self {
        Self { http, config }
    }

    async fn call(&self, config: &TelegramConfig, method: &str, body: JsonValue) -> Result<JsonValue, String> {
        let url = config.method_url(method);
        let value = call_json(&self.http, TELEGRAM, |client| client.post(&url).json(&body)).await?;
        if value.get("ok").and_then(JsonValue::as_bool) == Some(false) {
            let description = value
                .get("description")
                .and_then(JsonValue::as_str)
                .unwrap_or("telegram rejected the request");
            return Err(description.to_string());
        }
        Ok(value)
    }
}

fn buy_button(listing: &Listing) -> JsonValue {
    json!({ "inline_keyboard": [[{ "text": "🛒 Buy now", "url": listing.affiliate_link }]] })
}

pub(crate) fn album_media(listings: &[Listing]) -> Vec<JsonValue> {
    listings
        .iter()
        .filter(|l| l.image_url.is_some())
        .take(MAX_ALBUM_ITEMS)
        .enumerate()
        .map(|(i, listing)| {
            json!({
                "type": "photo",
                "media": listing.image_url,
                "caption": format::telegram_album_caption(i, listing),
                "parse_mode": "HTML",
            })
        })
        .collect()
}

#[async_trait]
impl SocialPlatform for TelegramPlatform {
    fn name(&self) -> &str {
        TELEGRAM
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(TELEGRAM);
        };
        let caption = format::telegram_caption(listing, event);
        let (method, body) = match &listing.image_url {
            Some(image) => (
                "sendPhoto",
                json!({
                    "chat_id": config.channel_id,
                    "photo": image,
                    "caption": caption,
                    "parse_mode": "HTML",
                    "reply_markup": buy_button(listing),
                }),
            ),
            None => (
                "sendMessage",
                json!({
                    "chat_id": config.channel_id,
                    "text": caption,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": false,
                    "reply_markup": buy_button(listing),
                }),
            ),
        };
        match self.call(config, method, body).await {
            Ok(value) => PostResult::posted(TELEGRAM, id_at(&value, "/result/message_id")),
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "telegram post failed");
                PostResult::failed(TELEGRAM, err)
            }
        }
    }

    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(TELEGRAM);
        };
        let intro = json!({
            "chat_id": config.channel_id,
            "text": format::digest_intro(title),
            "parse_mode": "HTML",
        });
        let intro_id = match self.call(config, "sendMessage", intro).await {
            Ok(value) => id_at(&value, "/result/message_id"),
            Err(err) => return PostResult::failed(TELEGRAM, err),
        };

        let media = album_media(listings);
        if media.is_empty() {
            return PostResult::posted(TELEGRAM, intro_id);
        }
        // sendMediaGroup needs 2-10 items
        let (method, body) = if media.len() == 1 {
            let item = &media[0];
            (
                "sendPhoto",
                json!({
                    "chat_id": config.channel_id,
                    "photo": item["media"],
                    "caption": item["caption"],
                    "parse_mode": "HTML",
                }),
            )
        } else {
            ("sendMediaGroup", json!({ "chat_id": config.channel_id, "media": media }))
        };
        match self.call(config, method, body).await {
            Ok(_) => PostResult::posted(TELEGRAM, intro_id),
            Err(err) => PostResult::failed(TELEGRAM, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dealwatch_core::ListingDraft;
    use dealwatch_storage::HttpClientConfig;

    fn listing(id: &str, image: bool) -> Listing {
        Listing::from_draft(
            ListingDraft {
                id: id.into(),
                title: format!("Gaming headset {id}"),
                description: String::new(),
                image_url: image.then(|| format!("https://img.example/{id}.jpg")),
                affiliate_link: format!("https://shop.example/dp/{id}"),
                brand: String::new(),
                features: vec![],
                original_price: 80.0,
                current_price: 48.0,
                category: "VideoGames".into(),
                rating: 4.3,
                review_count: 95,
            },
            Utc::now(),
        )
    }

    #[test]
    fn album_skips_imageless_listings_and_caps_at_ten() {
        let mut listings: Vec<Listing> = (0..12).map(|i| listing(&format!("T{i}"), true)).collect();
        listings.insert(0, listing("NOIMG", false));
        let media = album_media(&listings);
        assert_eq!(media.len(), MAX_ALBUM_ITEMS);
        assert_eq!(media[0]["media"], "https://img.example/T0.jpg");
        assert!(media[0]["caption"].as_str().unwrap().starts_with("1. Gaming headset T0"));
    }

    #[test]
    fn method_urls_embed_the_token() {
        let config = TelegramConfig {
            bot_token: "123:abc".into(),
            channel_id: "@deals".into(),
            api_base: "https://api.telegram.org".into(),
        };
        assert_eq!(config.method_url("sendPhoto"), "https://api.telegram.org/bot123:abc/sendPhoto");
    }

    #[tokio::test]
    async fn unconfigured_bot_degrades() {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).expect("client"));
        let platform = TelegramPlatform::new(http, None);
        assert!(!platform.is_configured());
        let result = platform.post(&listing("X", true), EventType::NewDeal).await;
        assert_eq!(result, PostResult::not_configured(TELEGRAM));
        let batch = platform.post_batch(&[listing("Y", true)], "Top deals").await;
        assert!(!batch.success);
    }
}
