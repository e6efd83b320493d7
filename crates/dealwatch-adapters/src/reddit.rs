use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dealwatch_core::{EventType, Listing, REDDIT};
use dealwatch_storage::HttpClient;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::format;
use crate::social::{call_json, id_at, PostResult, SocialPlatform};
use crate::env_var;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
    pub subreddit: String,
    pub auth_base: String,
    pub api_base: String,
}

impl RedditConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: env_var("REDDIT_CLIENT_ID")?,
            client_secret: env_var("REDDIT_CLIENT_SECRET")?,
            username: env_var("REDDIT_USERNAME")?,
            password: env_var("REDDIT_PASSWORD")?,
            user_agent: env_var("REDDIT_USER_AGENT")
                .unwrap_or_else(|| format!("dealwatch/{}", env!("CARGO_PKG_VERSION"))),
            subreddit: env_var("REDDIT_SUBREDDIT").unwrap_or_else(|| "DealsItalia".into()),
            auth_base: env_var("REDDIT_AUTH_BASE").unwrap_or_else(|| "https://www.reddit.com".into()),
            api_base: env_var("REDDIT_API_BASE").unwrap_or_else(|| "https://oauth.reddit.com".into()),
        })
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Self-posts to one subreddit using a script-app password grant.
#[derive(Debug)]
pub struct RedditPlatform {
    http: Arc<HttpClient>,
    config: Option<RedditConfig>,
    token: Mutex<Option<AccessToken>>,
}

impl RedditPlatform {
    pub fn new(http: Arc<HttpClient>, config: Option<RedditConfig>) -> Self {
        Self {
            http,
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self, config: &RedditConfig) -> Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let url = format!("{}/api/v1/access_token", config.auth_base);
        let form = [
            ("grant_type", "password"),
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
        ];
        let value = call_json(&self.http, REDDIT, |client| {
            client
                .post(&url)
                .basic_auth(&config.client_id, Some(&config.client_secret))
                .header(reqwest::header::USER_AGENT, &config.user_agent)
                .form(&form)
        })
        .await?;

        let token = value
            .get("access_token")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| "reddit token response missing access_token".to_string())?
            .to_string();
        let ttl = value.get("expires_in").and_then(JsonValue::as_u64).unwrap_or(3600);
        // refresh a minute early
        let expires_at = Instant::now() + Duration::from_secs(ttl.saturating_sub(60));
        debug!(ttl, "reddit token refreshed");
        *cached = Some(AccessToken {
            value: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn submit(&self, config: &RedditConfig, title: &str, text: &str) -> Result<Option<String>, String> {
        let token = self.access_token(config).await?;
        let url = format!("{}/api/submit", config.api_base);
        let form = [
            ("sr", config.subreddit.as_str()),
            ("kind", "self"),
            ("title", title),
            ("text", text),
            ("sendreplies", "false"),
            ("api_type", "json"),
        ];
        let value = call_json(&self.http, REDDIT, |client| {
            client
                .post(&url)
                .bearer_auth(&token)
                .header(reqwest::header::USER_AGENT, &config.user_agent)
                .form(&form)
        })
        .await?;
        submit_result(&value)
    }
}

pub(crate) fn submit_result(value: &JsonValue) -> Result<Option<String>, String> {
    if let Some(errors) = value.pointer("/json/errors").and_then(JsonValue::as_array) {
        if let Some(first) = errors.first() {
            return Err(format!("reddit rejected the post: {first}"));
        }
    }
    Ok(id_at(value, "/json/data/name"))
}

#[async_trait]
impl SocialPlatform for RedditPlatform {
    fn name(&self) -> &str {
        REDDIT
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(REDDIT);
        };
        let title = format::reddit_title(listing, event);
        let body = format::reddit_body(listing);
        match self.submit(config, &title, &body).await {
            Ok(post_id) => PostResult::posted(REDDIT, post_id),
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "reddit post failed");
                PostResult::failed(REDDIT, err)
            }
        }
    }

    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult {
        let Some(config) = &self.config else {
            return PostResult::not_configured(REDDIT);
        };
        if listings.is_empty() {
            return PostResult::failed(REDDIT, "nothing to post");
        }
        let title = format::ellipsize(title, format::REDDIT_TITLE_MAX);
        match self
            .submit(config, &title, &format::reddit_roundup_body(listings))
            .await
        {
            Ok(post_id) => PostResult::posted(REDDIT, post_id),
            Err(err) => PostResult::failed(REDDIT, err),
        }
    }
}
