//! Listing/subscriber persistence, HTTP transport and pacing utilities for dealwatch.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::{Listing, Subscriber};
use thiserror::Error;

mod file;
mod http;
mod memory;
mod pacing;
mod postgres;

pub use file::{write_json_atomic, JsonFileListingStore, JsonFileSubscriberDirectory};
pub use http::{
    is_transient_error, is_transient_status, HttpClient, HttpClientConfig, HttpError, HttpResponse, RetryPolicy,
};
pub use memory::{MemoryListingStore, MemorySubscriberDirectory};
pub use pacing::{IntervalPacer, NoPacer, Pacer, TokenBucketPacer};
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "dealwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("listing {0} not found")]
    ListingNotFound(String),
    #[error("subscriber {0} not found")]
    SubscriberNotFound(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Load/save primitives for listings.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Listing>, StoreError>;

    /// Create or replace a listing. Broadcast flags already stored stay set.
    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError>;

    /// Flag active listings whose `last_updated` is before `cutoff`; returns how many changed.
    async fn mark_inactive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Set one platform flag without rewriting the rest of the record.
    async fn set_broadcast_flag(&self, id: &str, platform: &str) -> Result<(), StoreError>;

    async fn list_active(&self) -> Result<Vec<Listing>, StoreError>;
}

/// Read side of account management, plus the push self-heal write.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Active subscribers with `listing_id` in their watchlist.
    async fn find_watching(&self, listing_id: &str) -> Result<Vec<Subscriber>, StoreError>;

    /// Active subscribers following `category`.
    async fn find_watching_category(&self, category: &str) -> Result<Vec<Subscriber>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscriber>, StoreError>;

    /// Disable push and forget the stored endpoint.
    async fn disable_push(&self, id: &str) -> Result<(), StoreError>;
}

pub(crate) fn watches_listing(subscriber: &Subscriber, listing_id: &str) -> bool {
    subscriber.active && subscriber.watched_listings.contains(listing_id)
}

pub(crate) fn watches_category(subscriber: &Subscriber, category: &str) -> bool {
    subscriber.active && subscriber.watched_categories.contains(category)
}

pub(crate) fn clear_push(subscriber: &mut Subscriber) {
    subscriber.push.enabled = false;
    subscriber.push.endpoint = None;
}
