use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::{Listing, Subscriber};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::memory::{deactivate_stale, merge_into};
use crate::{clear_push, watches_category, watches_listing, ListingStore, StoreError, SubscriberDirectory};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `value` next to `path` and rename it into place.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await.map_err(io_error(parent))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(io_error(&temp_path))?;
    file.write_all(&bytes).await.map_err(io_error(&temp_path))?;
    file.flush().await.map_err(io_error(&temp_path))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_error(path)(err));
    }
    Ok(())
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(io_error(path)(err)),
    }
}

/// Listing store persisted as one JSON array, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileListingStore {
    path: PathBuf,
    listings: Mutex<BTreeMap<String, Listing>>,
}

impl JsonFileListingStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rows: Vec<Listing> = read_json_or_default(&path).await?;
        debug!(path = %path.display(), listings = rows.len(), "opened listing file");
        Ok(Self {
            path,
            listings: Mutex::new(rows.into_iter().map(|l| (l.id.clone(), l)).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `next` to disk, then make it the in-memory state.
    async fn commit(
        &self,
        current: &mut BTreeMap<String, Listing>,
        next: BTreeMap<String, Listing>,
    ) -> Result<(), StoreError> {
        let rows: Vec<&Listing> = next.values().collect();
        write_json_atomic(&self.path, &rows).await?;
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl ListingStore for JsonFileListingStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        Ok(self.listings.lock().await.get(id).cloned())
    }

    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError> {
        let mut listings = self.listings.lock().await;
        let mut next = listings.clone();
        let merged = merge_into(listing, listings.get(&listing.id));
        next.insert(merged.id.clone(), merged);
        self.commit(&mut listings, next).await
    }

    async fn mark_inactive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut listings = self.listings.lock().await;
        let mut next = listings.clone();
        let changed = deactivate_stale(&mut next, cutoff);
        if changed > 0 {
            self.commit(&mut listings, next).await?;
        }
        Ok(changed)
    }

    async fn set_broadcast_flag(&self, id: &str, platform: &str) -> Result<(), StoreError> {
        let mut listings = self.listings.lock().await;
        let mut next = listings.clone();
        let listing = next
            .get_mut(id)
            .ok_or_else(|| StoreError::ListingNotFound(id.to_string()))?;
        if listing.is_broadcast_to(platform) {
            return Ok(());
        }
        listing.mark_broadcast(platform);
        self.commit(&mut listings, next).await
    }

    async fn list_active(&self) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .listings
            .lock()
            .await
            .values()
            .filter(|l| l.active)
            .cloned()
            .collect())
    }
}

/// Subscriber directory backed by a JSON array maintained by account management.
#[derive(Debug)]
pub struct JsonFileSubscriberDirectory {
    path: PathBuf,
    subscribers: Mutex<BTreeMap<String, Subscriber>>,
}

impl JsonFileSubscriberDirectory {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rows: Vec<Subscriber> = read_json_or_default(&path).await?;
        debug!(path = %path.display(), subscribers = rows.len(), "opened subscriber file");
        Ok(Self {
            path,
            subscribers: Mutex::new(rows.into_iter().map(|s| (s.id.clone(), s)).collect()),
        })
    }
}

#[async_trait]
impl SubscriberDirectory for JsonFileSubscriberDirectory {
    async fn find_watching(&self, listing_id: &str) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .subscribers
            .lock()
            .await
            .values()
            .filter(|s| watches_listing(s, listing_id))
            .cloned()
            .collect())
    }

    async fn find_watching_category(&self, category: &str) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self
            .subscribers
            .lock()
            .await
            .values()
            .filter(|s| watches_category(s, category))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.subscribers.lock().await.get(id).cloned())
    }

    async fn disable_push(&self, id: &str) -> Result<(), StoreError> {
        let mut subscribers = self.subscribers.lock().await;
        let mut next = subscribers.clone();
        let subscriber = next
            .get_mut(id)
            .ok_or_else(|| StoreError::SubscriberNotFound(id.to_string()))?;
        clear_push(subscriber);
        let rows: Vec<&Subscriber> = next.values().collect();
        write_json_atomic(&self.path, &rows).await?;
        *subscribers = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dealwatch_core::{ListingDraft, PushEndpoint, TWITTER};
    use tempfile::tempdir;

    fn listing(id: &str) -> Listing {
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).single().unwrap();
        Listing::from_draft(
            ListingDraft {
                id: id.into(),
                title: "Air fryer".into(),
                description: String::new(),
                image_url: None,
                affiliate_link: String::new(),
                brand: String::new(),
                features: vec![],
                original_price: 120.0,
                current_price: 70.0,
                category: "Kitchen".into(),
                rating: 4.6,
                review_count: 2100,
            },
            now,
        )
    }

    #[tokio::test]
    async fn listings_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state").join("listings.json");

        let store = JsonFileListingStore::open(&path).await.expect("open");
        store.upsert(&listing("K1")).await.expect("upsert");
        store.set_broadcast_flag("K1", TWITTER).await.expect("flag");
        drop(store);

        let reopened = JsonFileListingStore::open(&path).await.expect("reopen");
        let stored = reopened.find_by_id("K1").await.expect("find").expect("present");
        assert!(stored.is_broadcast_to(TWITTER));
        assert_eq!(stored.discount_percentage, 42);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileListingStore::open(dir.path().join("none.json"))
            .await
            .expect("open");
        assert!(store.list_active().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn subscriber_push_heal_is_written_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("subscribers.json");
        let mut sub = Subscriber::new("u1");
        sub.push.enabled = true;
        sub.push.endpoint = Some(PushEndpoint {
            endpoint: "https://push.example/u1".into(),
            p256dh: Some("key".into()),
            auth: Some("auth".into()),
        });
        write_json_atomic(&path, &vec![sub]).await.expect("seed");

        let directory = JsonFileSubscriberDirectory::open(&path).await.expect("open");
        directory.disable_push("u1").await.expect("disable");

        let raw: Vec<Subscriber> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(!raw[0].push.enabled);
        assert!(raw[0].push.endpoint.is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempdir().expect("tempdir");
        let state = dir.path().join("state");
        let path = state.join("listings.json");
        let store = JsonFileListingStore::open(&path).await.expect("open");
        store.upsert(&listing("K1")).await.expect("upsert");

        // the state directory turns into a plain file, so every write fails
        std::fs::remove_dir_all(&state).unwrap();
        std::fs::write(&state, b"not a directory").unwrap();

        assert!(store.upsert(&listing("K2")).await.is_err());
        assert!(store.find_by_id("K2").await.expect("find").is_none());

        assert!(store.set_broadcast_flag("K1", TWITTER).await.is_err());
        let k1 = store.find_by_id("K1").await.expect("find").expect("present");
        assert!(!k1.is_broadcast_to(TWITTER));
    }
}
