use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::{Listing, Subscriber};
use tokio::sync::RwLock;

use crate::{clear_push, watches_category, watches_listing, ListingStore, StoreError, SubscriberDirectory};

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    listings: RwLock<BTreeMap<String, Listing>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        Self {
            listings: RwLock::new(listings.into_iter().map(|l| (l.id.clone(), l)).collect()),
        }
    }

    pub async fn all(&self) -> Vec<Listing> {
        self.listings.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.listings.read().await.len()
    }
}

/// OR-merge flags already held by `stored` into `incoming`.
pub(crate) fn merge_into(incoming: &Listing, stored: Option<&Listing>) -> Listing {
    let mut merged = incoming.clone();
    if let Some(stored) = stored {
        merged.merge_broadcast_flags(&stored.broadcast_to);
    }
    merged
}

pub(crate) fn deactivate_stale(
    listings: &mut BTreeMap<String, Listing>,
    cutoff: DateTime<Utc>,
) -> usize {
    let mut changed = 0;
    for listing in listings.values_mut() {
        if listing.active && listing.last_updated < cutoff {
            listing.active = false;
            changed += 1;
        }
    }
    changed
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        Ok(self.listings.read().await.get(id).cloned())
    }

    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError> {
        let mut listings = self.listings.write().await;
        let merged = merge_into(listing, listings.get(&listing.id));
        listings.insert(merged.id.clone(), merged);
        Ok(())
    }

    async fn mark_inactive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(deactivate_stale(&mut *self.listings.write().await, cutoff))
    }

    async fn set_broadcast_flag(&self, id: &str, platform: &str) -> Result<(), StoreError> {
        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(id)
            .ok_or_else(|| StoreError::ListingNotFound(id.to_string()))?;
        listing.mark_broadcast(platform);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .listings
            .read()
            .await
            .values()
            .filter(|l| l.active)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemorySubscriberDirectory {
    subscribers: RwLock<BTreeMap<String, Subscriber>>,
}

impl MemorySubscriberDirectory {
    pub fn new(subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        Self {
            subscribers: RwLock::new(subscribers.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }

    pub async fn insert(&self, subscriber: Subscriber) {
        self.subscribers
            .write()
            .await
            .insert(subscriber.id.clone(), subscriber);
    }
}

#[async_trait]
impl SubscriberDirectory for MemorySubscriberDirectory {
    async fn find_watching(&self, listing_id: &str) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| watches_listing(s, listing_id))
            .cloned()
            .collect())
    }

    async fn find_watching_category(&self, category: &str) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| watches_category(s, category))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.subscribers.read().await.get(id).cloned())
    }

    async fn disable_push(&self, id: &str) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.write().await;
        let subscriber = subscribers
            .get_mut(id)
            .ok_or_else(|| StoreError::SubscriberNotFound(id.to_string()))?;
        clear_push(subscriber);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dealwatch_core::{ListingDraft, PushEndpoint, REDDIT, TELEGRAM};

    fn listing(id: &str, now: DateTime<Utc>) -> Listing {
        Listing::from_draft(
            ListingDraft {
                id: id.into(),
                title: format!("Listing {id}"),
                description: String::new(),
                image_url: None,
                affiliate_link: String::new(),
                brand: String::new(),
                features: vec![],
                original_price: 80.0,
                current_price: 40.0,
                category: "Sports".into(),
                rating: 4.2,
                review_count: 55,
            },
            now,
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 8, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn upsert_never_clears_stored_broadcast_flags() {
        let store = MemoryListingStore::new();
        let stale = listing("A1", now());
        store.upsert(&stale).await.unwrap();
        store.set_broadcast_flag("A1", TELEGRAM).await.unwrap();

        // whole-document write built from a copy loaded before the flag was set
        let mut rewritten = stale.clone();
        rewritten.mark_broadcast(REDDIT);
        store.upsert(&rewritten).await.unwrap();

        let stored = store.find_by_id("A1").await.unwrap().unwrap();
        assert!(stored.is_broadcast_to(TELEGRAM));
        assert!(stored.is_broadcast_to(REDDIT));
    }

    #[tokio::test]
    async fn set_broadcast_flag_on_missing_listing_errors() {
        let store = MemoryListingStore::new();
        let err = store.set_broadcast_flag("nope", TELEGRAM).await.unwrap_err();
        assert!(matches!(err, StoreError::ListingNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn stale_listings_are_deactivated_not_deleted() {
        let store = MemoryListingStore::with_listings([
            listing("old", now() - Duration::days(8)),
            listing("fresh", now() - Duration::days(2)),
        ]);
        let changed = store
            .mark_inactive_older_than(now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.len().await, 2);
        let active: Vec<_> = store.list_active().await.unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(active, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn directory_filters_inactive_and_heals_push() {
        let mut watching = Subscriber::new("s1");
        watching.watched_listings.insert("A1".into());
        watching.watched_categories.insert("Sports".into());
        watching.push.enabled = true;
        watching.push.endpoint = Some(PushEndpoint {
            endpoint: "https://push.example/s1".into(),
            p256dh: None,
            auth: None,
        });
        let mut inactive = Subscriber::new("s2");
        inactive.active = false;
        inactive.watched_listings.insert("A1".into());

        let directory = MemorySubscriberDirectory::new([watching, inactive]);
        let found = directory.find_watching("A1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(directory.find_watching_category("Sports").await.unwrap().len(), 1);

        directory.disable_push("s1").await.unwrap();
        let healed = directory.find_by_id("s1").await.unwrap().unwrap();
        assert!(!healed.push.enabled);
        assert!(healed.push.endpoint.is_none());
    }
}
