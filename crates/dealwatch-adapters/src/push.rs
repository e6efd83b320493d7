use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{Listing, PushEndpoint};
use dealwatch_storage::HttpClient;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::env_var;
use crate::format;

/// Notification body handed to the push relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    pub url: String,
    pub listing_id: String,
    pub kind: String,
    pub tag: String,
    pub require_interaction: bool,
}

impl PushPayload {
    pub fn deal(listing: &Listing) -> Self {
        Self {
            title: format::push_title_for_deal(listing),
            body: format::push_body_for_deal(listing),
            image: listing.image_url.clone(),
            url: format!("/listing/{}", listing.id),
            listing_id: listing.id.clone(),
            kind: "deal".into(),
            tag: format!("deal-{}", listing.id),
            require_interaction: false,
        }
    }

    pub fn price_drop(listing: &Listing, old_price: f64, new_price: f64) -> Self {
        Self {
            title: "📉 Price dropped!".into(),
            body: format::push_body_for_price_drop(listing, old_price, new_price),
            image: listing.image_url.clone(),
            url: format!("/listing/{}", listing.id),
            listing_id: listing.id.clone(),
            kind: "price_drop".into(),
            tag: format!("pricedrop-{}", listing.id),
            require_interaction: true,
        }
    }

    pub fn watchlist(listing: &Listing) -> Self {
        Self {
            title: "⭐ Watchlist item on sale!".into(),
            body: format::push_body_for_watchlist(listing),
            image: listing.image_url.clone(),
            url: format!("/listing/{}", listing.id),
            listing_id: listing.id.clone(),
            kind: "watchlist".into(),
            tag: format!("watchlist-{}", listing.id),
            require_interaction: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    Failed(String),
    /// The push service no longer knows this endpoint.
    Expired,
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, endpoint: &PushEndpoint, payload: &PushPayload) -> PushOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRelayConfig {
    pub relay_url: String,
    pub token: Option<String>,
}

impl PushRelayConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            relay_url: env_var("PUSH_RELAY_URL")?,
            token: env_var("PUSH_RELAY_TOKEN"),
        })
    }
}

/// Hands encrypted delivery to a web-push relay and maps its status back.
#[derive(Debug, Clone)]
pub struct WebPushRelayChannel {
    http: Arc<HttpClient>,
    config: Option<PushRelayConfig>,
}

impl WebPushRelayChannel {
    pub fn new(http: Arc<HttpClient>, config: Option<PushRelayConfig>) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

pub(crate) fn outcome_for_status(status: StatusCode, body: &str) -> PushOutcome {
    if status.is_success() {
        PushOutcome::Sent
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        PushOutcome::Expired
    } else {
        PushOutcome::Failed(format!("push relay returned {status}: {body}"))
    }
}

#[async_trait]
impl PushChannel for WebPushRelayChannel {
    async fn send(&self, endpoint: &PushEndpoint, payload: &PushPayload) -> PushOutcome {
        let Some(config) = &self.config else {
            return PushOutcome::Failed("push not configured".into());
        };
        if endpoint.endpoint.trim().is_empty() {
            return PushOutcome::Failed("invalid push subscription".into());
        }
        let body = json!({
            "subscription": {
                "endpoint": endpoint.endpoint,
                "keys": { "p256dh": endpoint.p256dh, "auth": endpoint.auth },
            },
            "payload": payload,
        });
        let result = self
            .http
            .execute("push", |client| {
                let request = client.post(&config.relay_url).json(&body);
                match &config.token {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await;
        match result {
            Ok(response) => {
                let outcome = outcome_for_status(response.status, &response.text());
                debug!(listing_id = %payload.listing_id, ?outcome, "push relay responded");
                outcome
            }
            Err(err) => PushOutcome::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dealwatch_core::ListingDraft;
    use dealwatch_storage::HttpClientConfig;

    fn listing() -> Listing {
        Listing::from_draft(
            ListingDraft {
                id: "B0PUSH".into(),
                title: "Robot vacuum with self-emptying base and mapping".into(),
                description: String::new(),
                image_url: Some("https://img.example/vac.jpg".into()),
                affiliate_link: "https://shop.example/dp/B0PUSH".into(),
                brand: String::new(),
                features: vec![],
                original_price: 400.0,
                current_price: 250.0,
                category: "HomeAndGarden".into(),
                rating: 4.1,
                review_count: 640,
            },
            Utc::now(),
        )
    }

    #[test]
    fn gone_and_not_found_mean_expired() {
        assert_eq!(outcome_for_status(StatusCode::GONE, ""), PushOutcome::Expired);
        assert_eq!(outcome_for_status(StatusCode::NOT_FOUND, ""), PushOutcome::Expired);
        assert_eq!(outcome_for_status(StatusCode::CREATED, ""), PushOutcome::Sent);
        assert!(matches!(
            outcome_for_status(StatusCode::BAD_REQUEST, "bad"),
            PushOutcome::Failed(msg) if msg.contains("bad")
        ));
    }

    #[test]
    fn price_drop_payload_names_both_prices() {
        let payload = PushPayload::price_drop(&listing(), 280.0, 250.0);
        assert_eq!(payload.kind, "price_drop");
        assert!(payload.body.contains("from €280.00 to €250.00"));
        assert!(payload.require_interaction);
        assert_eq!(payload.tag, "pricedrop-B0PUSH");
    }

    #[tokio::test]
    async fn unconfigured_relay_fails_without_network() {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).expect("client"));
        let channel = WebPushRelayChannel::new(http, None);
        let endpoint = PushEndpoint {
            endpoint: "https://push.example/e".into(),
            p256dh: None,
            auth: None,
        };
        let outcome = channel.send(&endpoint, &PushPayload::deal(&listing())).await;
        assert_eq!(outcome, PushOutcome::Failed("push not configured".into()));
    }
}
