use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use dealwatch_adapters::format::{MAX_ALBUM_ITEMS, MAX_THREAD_LISTINGS};
use dealwatch_adapters::{PlatformRegistry, PostResult};
use dealwatch_core::{
    EventType, Listing, ShareEvent, BROADCAST_MIN_DISCOUNT, DEFAULT_PLATFORMS, FACEBOOK, INSTAGRAM, REDDIT,
    TELEGRAM, TWITTER,
};
use dealwatch_storage::{ListingStore, Pacer};
use serde::Serialize;
use tracing::{info, warn};

/// Platforms that receive one batch post per digest.
pub const DIGEST_PLATFORMS: [&str; 4] = [TELEGRAM, FACEBOOK, INSTAGRAM, TWITTER];
/// A listing stays digest-eligible until all of these have carried it.
pub const DIGEST_TRACKED_PLATFORMS: [&str; 2] = [TELEGRAM, TWITTER];
/// Listings posted individually to reddit per digest.
pub const REDDIT_DIGEST_POSTS: usize = 3;
pub const DIGEST_TITLE: &str = "Top deals of the day";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShareSummary {
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareReport {
    pub listing_id: String,
    pub event_type: EventType,
    pub results: BTreeMap<String, PostResult>,
    /// Platforms left out because they already carried this listing.
    pub skipped: Vec<String>,
    pub summary: ShareSummary,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DigestReport {
    pub listing_ids: Vec<String>,
    pub batches: BTreeMap<String, PostResult>,
    pub reddit: Vec<PostResult>,
}

impl DigestReport {
    pub fn is_empty(&self) -> bool {
        self.listing_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharingStats {
    pub active_listings: usize,
    pub broadcasts: BTreeMap<String, usize>,
}

/// Posts listings to the public social platforms and records where they went.
pub struct BroadcastOrchestrator {
    registry: PlatformRegistry,
    store: Arc<dyn ListingStore>,
    link_post_pacer: Arc<dyn Pacer>,
}

impl std::fmt::Debug for BroadcastOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastOrchestrator")
            .field("registry", &self.registry)
            .finish()
    }
}

impl BroadcastOrchestrator {
    pub fn new(registry: PlatformRegistry, store: Arc<dyn ListingStore>, link_post_pacer: Arc<dyn Pacer>) -> Self {
        Self {
            registry,
            store,
            link_post_pacer,
        }
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    async fn post_to(&self, name: &str, listing: &Listing, event: EventType) -> PostResult {
        match self.registry.get(name) {
            Some(platform) => platform.post(listing, event).await,
            None => PostResult::not_configured(name),
        }
    }

    async fn flag(&self, listing_id: &str, platform: &str) {
        if let Err(err) = self.store.set_broadcast_flag(listing_id, platform).await {
            warn!(listing_id, platform, error = %err, "could not record broadcast flag");
        }
    }

    /// Post one listing to `platforms` (all default platforms when `None`).
    pub async fn share_listing(&self, listing: &Listing, event: EventType, platforms: Option<&[String]>) -> ShareReport {
        let names: Vec<String> = match platforms {
            Some(names) => names.to_vec(),
            None => DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        };

        // flags may have been set since the caller loaded its copy
        let stored = match self.store.find_by_id(&listing.id).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(listing_id = %listing.id, error = %err, "could not reload listing flags");
                None
            }
        };
        let already_sent = |name: &str| {
            listing.is_broadcast_to(name) || stored.as_ref().is_some_and(|s| s.is_broadcast_to(name))
        };

        let mut results = BTreeMap::new();
        let mut skipped = Vec::new();
        let mut summary = ShareSummary::default();
        for name in names {
            if event == EventType::NewDeal && already_sent(&name) {
                skipped.push(name);
                continue;
            }
            let result = self.post_to(&name, listing, event).await;
            if result.success {
                summary.successful += 1;
                self.flag(&listing.id, &name).await;
            } else {
                summary.failed += 1;
            }
            results.insert(name, result);
        }

        info!(
            listing_id = %listing.id,
            event = %event,
            successful = summary.successful,
            failed = summary.failed,
            skipped = skipped.len(),
            "listing shared"
        );
        ShareReport {
            listing_id: listing.id.clone(),
            event_type: event,
            results,
            skipped,
            summary,
            success: summary.successful > 0,
        }
    }

    pub async fn handle(&self, event: &ShareEvent) -> ShareReport {
        self.share_listing(&event.listing, event.event_type, Some(&event.platforms))
            .await
    }

    /// Best-scoring active deals that still miss a tracked platform.
    pub async fn digest_candidates(&self, limit: usize) -> Result<Vec<Listing>> {
        let mut candidates: Vec<Listing> = self
            .store
            .list_active()
            .await
            .context("listing active deals")?
            .into_iter()
            .filter(|l| l.discount_percentage >= BROADCAST_MIN_DISCOUNT)
            .filter(|l| DIGEST_TRACKED_PLATFORMS.iter().any(|p| !l.is_broadcast_to(p)))
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Daily digest: one batch post per digest platform plus individual reddit posts.
    pub async fn share_daily_top_deals(&self, limit: usize) -> Result<DigestReport> {
        let candidates = self.digest_candidates(limit).await?;
        if candidates.is_empty() {
            info!("no listings eligible for the daily digest");
            return Ok(DigestReport::default());
        }

        let mut report = DigestReport {
            listing_ids: candidates.iter().map(|l| l.id.clone()).collect(),
            ..DigestReport::default()
        };

        for name in DIGEST_PLATFORMS {
            let result = match self.registry.get(name) {
                Some(platform) => platform.post_batch(&candidates, DIGEST_TITLE).await,
                None => PostResult::not_configured(name),
            };
            if result.success {
                for listing in digest_members(name, &candidates) {
                    self.flag(&listing.id, name).await;
                }
            }
            report.batches.insert(name.to_string(), result);
        }

        for (i, listing) in candidates.iter().take(REDDIT_DIGEST_POSTS).enumerate() {
            if i > 0 {
                self.link_post_pacer.pause().await;
            }
            let result = self.post_to(REDDIT, listing, EventType::NewDeal).await;
            if result.success {
                self.flag(&listing.id, REDDIT).await;
            }
            report.reddit.push(result);
        }

        info!(
            listings = report.listing_ids.len(),
            batches_ok = report.batches.values().filter(|r| r.success).count(),
            reddit_ok = report.reddit.iter().filter(|r| r.success).count(),
            "daily digest shared"
        );
        Ok(report)
    }

    pub async fn sharing_stats(&self) -> Result<SharingStats> {
        let active = self.store.list_active().await.context("listing active deals")?;
        let broadcasts = DEFAULT_PLATFORMS
            .iter()
            .map(|p| (p.to_string(), active.iter().filter(|l| l.is_broadcast_to(p)).count()))
            .collect();
        Ok(SharingStats {
            active_listings: active.len(),
            broadcasts,
        })
    }
}

/// Listings a successful batch post actually carried on `platform`.
pub(crate) fn digest_members<'a>(platform: &str, listings: &'a [Listing]) -> Vec<&'a Listing> {
    match platform {
        TELEGRAM | INSTAGRAM => listings
            .iter()
            .filter(|l| l.image_url.is_some())
            .take(MAX_ALBUM_ITEMS)
            .collect(),
        TWITTER => listings.iter().take(MAX_THREAD_LISTINGS).collect(),
        _ => listings.iter().collect(),
    }
}
