use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{EventType, Listing, TWITTER};
use dealwatch_storage::{HttpClient, Pacer};
use reqwest::multipart::{Form, Part};
use serde_json::json;
use tracing::{debug, warn};

use crate::format::{self, MAX_THREAD_LISTINGS};
use crate::social::{call_json, id_at, PostResult, SocialPlatform};
use crate::env_var;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterConfig {
    /// OAuth 2.0 user-context token with `tweet.write` and `media.write`.
    pub access_token: String,
    pub api_base: String,
}

impl TwitterConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_token: env_var("TWITTER_ACCESS_TOKEN")?,
            api_base: env_var("TWITTER_API_BASE").unwrap_or_else(|| "https://api.twitter.com".into()),
        })
    }
}

pub struct TwitterPlatform {
    http: Arc<HttpClient>,
    config: Option<TwitterConfig>,
    thread_pacer: Arc<dyn Pacer>,
}

impl std::fmt::Debug for TwitterPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterPlatform")
            .field("configured", &self.config.is_some())
            .finish()
    }
}

impl TwitterPlatform {
    pub fn new(http: Arc<HttpClient>, config: Option<TwitterConfig>, thread_pacer: Arc<dyn Pacer>) -> Self {
        Self {
            http,
            config,
            thread_pacer,
        }
    }

    /// Fetch the listing image and upload it as tweet media.
    async fn upload_image(&self, config: &TwitterConfig, image_url: &str) -> Result<String, String> {
        let image = self
            .http
            .execute(TWITTER, |client| client.get(image_url))
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| format!("image download failed: {e}"))?;

        let url = format!("{}/2/media/upload", config.api_base);
        let value = call_json(&self.http, TWITTER, |client| {
            let media = Part::bytes(image.body.clone()).file_name("deal.jpg");
            let form = Form::new()
                .text("media_category", "tweet_image")
                .part("media", media);
            client.post(&url).bearer_auth(&config.access_token).multipart(form)
        })
        .await?;
        id_at(&value, "/data/id")
            .or_else(|| id_at(&value, "/media_id_string"))
            .ok_or_else(|| "media upload response missing id".to_string())
    }

    /// Image upload failures degrade to a text-only tweet.
    async fn media_for(&self, config: &TwitterConfig, listing: &Listing) -> Option<String> {
        let image_url = listing.image_url.as_deref()?;
        match self.upload_image(config, image_url).await {
            Ok(id) => Some(id),
            Err(err) => {
                debug!(listing_id = %listing.id, error = %err, "posting tweet without image");
                None
            }
        }
    }

    async fn tweet(
        &self,
        config: &TwitterConfig,
        text: &str,
        reply_to: Option<&str>,
        media_id: Option<&str>,
    ) -> Result<String, String> {
        let url = format!("{}/2/tweets", config.api_base);
        let mut body = json!({ "text": text });
        if let Some(parent) = reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": parent });
        }
        if let Some(media_id) = media_id {
            body["media"] = json!({ "media_ids": [media_id] });
        }
        let value = call_json(&self.http, TWITTER, |client| {
            client.post(&url).bearer_auth(&config.access_token).json(&body)
        })
        .await?;
        id_at(&value, "/data/id").ok_or_else(|| "tweet response missing id".to_string())
    }
}

pub(crate) fn thread_segments(listings: &[Listing], title: &str) -> Vec<String> {
    std::iter::once(format::thread_intro(title))
        .chain(
            listings
                .iter()
                .take(MAX_THREAD_LISTINGS)
                .map(|l| format::tweet(l, EventType::NewDeal)),
        )
        .collect()
}

#[async_trait]
impl SocialPlatform for TwitterPlatform {
    fn name(&self) -> &str {
        TWITTER
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(TWITTER);
        };
        let media_id = self.media_for(config, listing).await;
        match self
            .tweet(config, &format::tweet(listing, event), None, media_id.as_deref())
            .await
        {
            Ok(id) => PostResult::posted(TWITTER, Some(id)),
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "tweet failed");
                PostResult::failed(TWITTER, err)
            }
        }
    }

    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(TWITTER);
        };
        let mut first_id: Option<String> = None;
        let mut previous: Option<String> = None;
        for (i, text) in thread_segments(listings, title).iter().enumerate() {
            if i > 0 {
                self.thread_pacer.pause().await;
            }
            match self.tweet(config, text, previous.as_deref(), None).await {
                Ok(id) => {
                    first_id.get_or_insert_with(|| id.clone());
                    previous = Some(id);
                }
                Err(err) => {
                    return PostResult::failed(TWITTER, format!("thread stopped at segment {}: {err}", i + 1))
                }
            }
        }
        PostResult::posted(TWITTER, first_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use chrono::Utc;
    use dealwatch_core::ListingDraft;
    use dealwatch_storage::HttpClientConfig;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Api {
        tweets: Arc<Mutex<Vec<Value>>>,
        uploads: Arc<AtomicUsize>,
    }

    async fn image() -> &'static [u8] {
        b"\xff\xd8\xff\xe0jpeg"
    }

    async fn upload(State(api): State<Api>) -> Json<Value> {
        api.uploads.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "data": { "id": "M1" } }))
    }

    async fn create_tweet(State(api): State<Api>, Json(body): Json<Value>) -> Json<Value> {
        let mut tweets = api.tweets.lock().unwrap();
        tweets.push(body);
        Json(json!({ "data": { "id": format!("T{}", tweets.len()) } }))
    }

    async fn serve_api() -> (String, Api) {
        let api = Api::default();
        let app = Router::new()
            .route("/img/ok.jpg", get(image))
            .route("/img/missing.jpg", get(|| async { StatusCode::NOT_FOUND }))
            .route("/2/media/upload", post(upload))
            .route("/2/tweets", post(create_tweet))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, api)
    }

    #[derive(Default)]
    struct CountingPacer(AtomicUsize);

    #[async_trait]
    impl Pacer for CountingPacer {
        async fn pause(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn platform(base: &str, pacer: Arc<dyn Pacer>) -> TwitterPlatform {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default().without_retries()).unwrap());
        let config = TwitterConfig {
            access_token: "user-token".into(),
            api_base: base.to_string(),
        };
        TwitterPlatform::new(http, Some(config), pacer)
    }

    fn listing(i: usize) -> Listing {
        Listing::from_draft(
            ListingDraft {
                id: format!("W{i}"),
                title: format!("Mechanical keyboard {i}"),
                description: String::new(),
                image_url: None,
                affiliate_link: format!("https://shop.example/dp/W{i}"),
                brand: String::new(),
                features: vec![],
                original_price: 120.0,
                current_price: 72.0,
                category: "Computers".into(),
                rating: 4.5,
                review_count: 400,
            },
            Utc::now(),
        )
    }

    #[test]
    fn thread_has_intro_plus_at_most_five_listings() {
        let listings: Vec<Listing> = (0..8).map(listing).collect();
        let segments = thread_segments(&listings, "Top deals of the day");
        assert_eq!(segments.len(), 1 + MAX_THREAD_LISTINGS);
        assert!(segments[0].contains("Top deals of the day"));
        assert!(segments[1].contains("Mechanical keyboard 0"));
        assert!(segments.iter().all(|s| s.chars().count() <= format::TWEET_BUDGET));
    }

    #[tokio::test]
    async fn tweet_carries_the_uploaded_image() {
        let (base, api) = serve_api().await;
        let mut deal = listing(1);
        deal.image_url = Some(format!("{base}/img/ok.jpg"));

        let result = platform(&base, Arc::new(CountingPacer::default()))
            .post(&deal, EventType::NewDeal)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(api.uploads.load(Ordering::SeqCst), 1);
        let tweets = api.tweets.lock().unwrap();
        assert_eq!(tweets[0]["media"]["media_ids"], json!(["M1"]));
    }

    #[tokio::test]
    async fn unreachable_image_falls_back_to_text() {
        let (base, api) = serve_api().await;
        let mut deal = listing(2);
        deal.image_url = Some(format!("{base}/img/missing.jpg"));

        let result = platform(&base, Arc::new(CountingPacer::default()))
            .post(&deal, EventType::PriceDrop)
            .await;

        assert!(result.success);
        assert_eq!(api.uploads.load(Ordering::SeqCst), 0);
        let tweets = api.tweets.lock().unwrap();
        assert!(tweets[0].get("media").is_none());
    }

    #[tokio::test]
    async fn thread_pauses_between_every_segment() {
        let (base, api) = serve_api().await;
        let pacer = Arc::new(CountingPacer::default());
        let listings: Vec<Listing> = (0..3).map(listing).collect();

        let result = platform(&base, pacer.clone())
            .post_batch(&listings, "Top deals of the day")
            .await;

        assert!(result.success);
        assert_eq!(result.post_id.as_deref(), Some("T1"));
        assert_eq!(pacer.0.load(Ordering::SeqCst), 3);
        let tweets = api.tweets.lock().unwrap();
        assert_eq!(tweets.len(), 4);
        assert_eq!(tweets[3]["reply"]["in_reply_to_tweet_id"], json!("T3"));
    }
}
