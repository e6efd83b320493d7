use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{EventType, Listing, FACEBOOK, INSTAGRAM};
use dealwatch_storage::{HttpClient, Pacer};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::format::{self, MAX_ALBUM_ITEMS};
use crate::social::{call_json, id_at, PostResult, SocialPlatform};
use crate::env_var;

const STATUS_POLL_ATTEMPTS: usize = 10;

/// Graph API credentials shared by the Facebook page and the Instagram account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaConfig {
    pub access_token: String,
    pub page_id: Option<String>,
    pub instagram_account_id: Option<String>,
    pub graph_base: String,
}

impl MetaConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_token: env_var("META_ACCESS_TOKEN")?,
            page_id: env_var("META_PAGE_ID"),
            instagram_account_id: env_var("META_INSTAGRAM_ACCOUNT_ID"),
            graph_base: env_var("META_GRAPH_BASE")
                .unwrap_or_else(|| "https://graph.facebook.com/v18.0".into()),
        })
    }
}

async fn graph_post(http: &HttpClient, target: &str, url: &str, body: JsonValue) -> Result<JsonValue, String> {
    call_json(http, target, |client| client.post(url).json(&body)).await
}

#[derive(Debug, Clone)]
pub struct FacebookPlatform {
    http: Arc<HttpClient>,
    config: Option<MetaConfig>,
}

impl FacebookPlatform {
    pub fn new(http: Arc<HttpClient>, config: Option<MetaConfig>) -> Self {
        Self { http, config }
    }

    fn page(&self) -> Option<(&MetaConfig, &str)> {
        let config = self.config.as_ref()?;
        Some((config, config.page_id.as_deref()?))
    }
}

#[async_trait]
impl SocialPlatform for FacebookPlatform {
    fn name(&self) -> &str {
        FACEBOOK
    }

    fn is_configured(&self) -> bool {
        self.page().is_some()
    }

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult {
        let Some((config, page_id)) = self.page() else {
            return PostResult::not_configured(FACEBOOK);
        };
        let message = format::meta_message(listing, event);
        let (url, body) = match &listing.image_url {
            Some(image) => (
                format!("{}/{page_id}/photos", config.graph_base),
                json!({ "url": image, "caption": message, "access_token": config.access_token }),
            ),
            None => (
                format!("{}/{page_id}/feed", config.graph_base),
                json!({ "message": message, "link": listing.affiliate_link, "access_token": config.access_token }),
            ),
        };
        match graph_post(&self.http, FACEBOOK, &url, body).await {
            Ok(value) => PostResult::posted(FACEBOOK, id_at(&value, "/post_id").or_else(|| id_at(&value, "/id"))),
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "facebook post failed");
                PostResult::failed(FACEBOOK, err)
            }
        }
    }

    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult {
        let Some((config, page_id)) = self.page() else {
            return PostResult::not_configured(FACEBOOK);
        };
        let Some(first) = listings.first() else {
            return PostResult::failed(FACEBOOK, "nothing to post");
        };
        let url = format!("{}/{page_id}/feed", config.graph_base);
        let body = json!({
            "message": format::meta_digest_message(listings, title),
            "link": first.affiliate_link,
            "access_token": config.access_token,
        });
        match graph_post(&self.http, FACEBOOK, &url, body).await {
            Ok(value) => PostResult::posted(FACEBOOK, id_at(&value, "/id")),
            Err(err) => PostResult::failed(FACEBOOK, err),
        }
    }
}

/// Instagram business account: container, processing poll, publish.
pub struct InstagramPlatform {
    http: Arc<HttpClient>,
    config: Option<MetaConfig>,
    upload_pacer: Arc<dyn Pacer>,
    poll_pacer: Arc<dyn Pacer>,
}

impl std::fmt::Debug for InstagramPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstagramPlatform")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl InstagramPlatform {
    pub fn new(
        http: Arc<HttpClient>,
        config: Option<MetaConfig>,
        upload_pacer: Arc<dyn Pacer>,
        poll_pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            http,
            config,
            upload_pacer,
            poll_pacer,
        }
    }

    fn account(&self) -> Option<(&MetaConfig, &str)> {
        let config = self.config.as_ref()?;
        Some((config, config.instagram_account_id.as_deref()?))
    }

    async fn create_container(&self, config: &MetaConfig, account: &str, body: JsonValue) -> Result<String, String> {
        let url = format!("{}/{account}/media", config.graph_base);
        let value = graph_post(&self.http, INSTAGRAM, &url, body).await?;
        id_at(&value, "/id").ok_or_else(|| "media container response missing id".to_string())
    }

    async fn wait_until_ready(&self, config: &MetaConfig, container_id: &str) -> Result<(), String> {
        let url = format!("{}/{container_id}", config.graph_base);
        let mut status = String::from("IN_PROGRESS");
        for attempt in 0..STATUS_POLL_ATTEMPTS {
            self.poll_pacer.pause().await;
            let value = call_json(&self.http, INSTAGRAM, |client| {
                client
                    .get(&url)
                    .query(&[("fields", "status_code"), ("access_token", config.access_token.as_str())])
            })
            .await?;
            status = value
                .get("status_code")
                .and_then(JsonValue::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            debug!(container_id, attempt, %status, "instagram container status");
            if status != "IN_PROGRESS" {
                break;
            }
        }
        if status == "FINISHED" {
            Ok(())
        } else {
            Err(format!("media processing failed with status: {status}"))
        }
    }

    async fn publish(&self, config: &MetaConfig, account: &str, container_id: &str) -> Result<Option<String>, String> {
        let url = format!("{}/{account}/media_publish", config.graph_base);
        let body = json!({ "creation_id": container_id, "access_token": config.access_token });
        let value = graph_post(&self.http, INSTAGRAM, &url, body).await?;
        Ok(id_at(&value, "/id"))
    }

    async fn post_single(&self, config: &MetaConfig, account: &str, image: &str, caption: String) -> Result<Option<String>, String> {
        let container = self
            .create_container(
                config,
                account,
                json!({ "image_url": image, "caption": caption, "access_token": config.access_token }),
            )
            .await?;
        self.wait_until_ready(config, &container).await?;
        self.publish(config, account, &container).await
    }

    async fn post_carousel(&self, config: &MetaConfig, account: &str, listings: &[Listing], title: &str) -> Result<Option<String>, String> {
        let images = carousel_images(listings);
        if images.len() < 2 {
            return Err("carousel needs at least 2 images".into());
        }
        let mut children = Vec::with_capacity(images.len());
        for (i, image) in images.iter().enumerate() {
            if i > 0 {
                self.upload_pacer.pause().await;
            }
            let child = self
                .create_container(
                    config,
                    account,
                    json!({ "image_url": image, "is_carousel_item": true, "access_token": config.access_token }),
                )
                .await?;
            children.push(child);
        }
        let carousel = self
            .create_container(
                config,
                account,
                json!({
                    "media_type": "CAROUSEL",
                    "children": children.join(","),
                    "caption": format::instagram_carousel_caption(title),
                    "access_token": config.access_token,
                }),
            )
            .await?;
        self.publish(config, account, &carousel).await
    }
}

pub(crate) fn carousel_images(listings: &[Listing]) -> Vec<&str> {
    listings
        .iter()
        .filter_map(|l| l.image_url.as_deref())
        .take(MAX_ALBUM_ITEMS)
        .collect()
}

#[async_trait]
impl SocialPlatform for InstagramPlatform {
    fn name(&self) -> &str {
        INSTAGRAM
    }

    fn is_configured(&self) -> bool {
        self.account().is_some()
    }

    async fn post(&self, listing: &Listing, event: EventType) -> PostResult {
        let Some((config, account)) = self.account() else {
            return PostResult::not_configured(INSTAGRAM);
        };
        let Some(image) = listing.image_url.as_deref() else {
            return PostResult::failed(INSTAGRAM, "instagram requires an image");
        };
        let caption = format::instagram_caption(listing, event);
        match self.post_single(config, account, image, caption).await {
            Ok(post_id) => PostResult::posted(INSTAGRAM, post_id),
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "instagram post failed");
                PostResult::failed(INSTAGRAM, err)
            }
        }
    }

    async fn post_batch(&self, listings: &[Listing], title: &str) -> PostResult {
        let Some((config, account)) = self.account() else {
            return PostResult::not_configured(INSTAGRAM);
        };
        match self.post_carousel(config, account, listings, title).await {
            Ok(post_id) => PostResult::posted(INSTAGRAM, post_id),
            Err(err) => PostResult::failed(INSTAGRAM, err),
        }
    }
}
