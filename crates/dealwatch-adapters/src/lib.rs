//! Catalog source contracts, notification channels and social platform adapters.

use std::path::PathBuf;

use dealwatch_storage::HttpError;
use thiserror::Error;

mod catalog;
pub mod format;
mod messaging;
mod meta;
mod push;
mod reddit;
mod social;
mod telegram;
mod twitter;

pub use catalog::{
    CatalogApiConfig, CatalogPage, CatalogQuery, CatalogSource, FixtureCatalogSource,
    HttpCatalogSource, StaticCatalogSource,
};
pub use messaging::{normalize_address, ChannelResult, MessagingChannel, TwilioConfig, WhatsAppChannel};
pub use meta::{FacebookPlatform, InstagramPlatform, MetaConfig};
pub use push::{PushChannel, PushOutcome, PushPayload, PushRelayConfig, WebPushRelayChannel};
pub use reddit::{RedditConfig, RedditPlatform};
pub use social::{PlatformRegistry, PostResult, SocialPlatform};
pub use telegram::{TelegramConfig, TelegramPlatform};
pub use twitter::{TwitterConfig, TwitterPlatform};

pub const CRATE_NAME: &str = "dealwatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Non-blank environment variable.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
