use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dealwatch_adapters::{CatalogQuery, CatalogSource};
use dealwatch_core::{
    default_categories, CategoryScan, EventType, Listing, ListingDraft, ShareEvent, BROADCAST_MIN_DISCOUNT,
    INACTIVE_AFTER_DAYS,
};
use dealwatch_storage::{IntervalPacer, ListingStore, Pacer};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::broadcast::BroadcastOrchestrator;
use crate::notify::NotificationFanout;
use crate::report::write_run_report;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
    pub price_drops: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
    pub price_drops: usize,
    pub errors: usize,
    /// Successful platform posts made during the run.
    pub broadcasts: usize,
    pub notifications_sent: usize,
    pub deactivated: usize,
    pub categories: BTreeMap<String, CategoryStats>,
}

impl SyncRunStats {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            scanned: 0,
            created: 0,
            updated: 0,
            price_drops: 0,
            errors: 0,
            broadcasts: 0,
            notifications_sent: 0,
            deactivated: 0,
            categories: BTreeMap::new(),
        }
    }

    fn absorb(&mut self, category: &str, stats: CategoryStats) {
        self.scanned += stats.scanned;
        self.created += stats.created;
        self.updated += stats.updated;
        self.price_drops += stats.price_drops;
        self.errors += stats.errors;
        self.categories.insert(category.to_string(), stats);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncRunStats),
    /// Another run held the guard; nothing was done.
    Skipped,
}

impl SyncOutcome {
    pub fn stats(&self) -> Option<&SyncRunStats> {
        match self {
            SyncOutcome::Completed(stats) => Some(stats),
            SyncOutcome::Skipped => None,
        }
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Catalog scan, persistence, notification and broadcast for one sync run.
pub struct SyncOrchestrator {
    catalog: Arc<dyn CatalogSource>,
    store: Arc<dyn ListingStore>,
    fanout: Arc<NotificationFanout>,
    broadcaster: Arc<BroadcastOrchestrator>,
    categories: Vec<CategoryScan>,
    category_pacer: Arc<dyn Pacer>,
    reports_dir: Option<PathBuf>,
    running: AtomicBool,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("catalog", &self.catalog.name())
            .field("categories", &self.categories.len())
            .field("running", &self.is_running())
            .finish()
    }
}

enum Candidate {
    Created(Listing),
    Updated,
}

impl SyncOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        store: Arc<dyn ListingStore>,
        fanout: Arc<NotificationFanout>,
        broadcaster: Arc<BroadcastOrchestrator>,
    ) -> Self {
        Self {
            catalog,
            store,
            fanout,
            broadcaster,
            categories: default_categories(),
            category_pacer: Arc::new(IntervalPacer::new(Duration::from_secs(2))),
            reports_dir: None,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_categories(mut self, categories: Vec<CategoryScan>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_category_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.category_pacer = pacer;
        self
    }

    pub fn with_reports_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.reports_dir = dir;
        self
    }

    pub fn categories(&self) -> &[CategoryScan] {
        &self.categories
    }

    pub fn broadcaster(&self) -> &Arc<BroadcastOrchestrator> {
        &self.broadcaster
    }

    pub fn fanout(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Manual trigger; same run, same guard.
    pub async fn trigger(&self) -> Result<SyncOutcome> {
        info!("manual sync triggered");
        self.run_once().await
    }

    pub async fn run_once(&self) -> Result<SyncOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("deals sync already running, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        let stats = self
            .execute(run_id)
            .instrument(info_span!("sync_run", %run_id))
            .await?;

        if let Some(dir) = &self.reports_dir {
            match write_run_report(dir, &stats).await {
                Ok(path) => debug!(path = %path.display(), "sync report written"),
                Err(err) => warn!(error = %format!("{err:#}"), "could not write sync report"),
            }
        }
        Ok(SyncOutcome::Completed(stats))
    }

    async fn execute(&self, run_id: Uuid) -> Result<SyncRunStats> {
        let now = Utc::now();
        let mut stats = SyncRunStats::new(run_id, now);
        info!(categories = self.categories.len(), catalog = self.catalog.name(), "starting deals sync");

        for (i, scan) in self.categories.iter().enumerate() {
            let category_stats = self.scan_category(scan, now, &mut stats).await;
            stats.absorb(&scan.name, category_stats);
            if i + 1 < self.categories.len() {
                self.category_pacer.pause().await;
            }
        }

        let cutoff = now - chrono::Duration::days(INACTIVE_AFTER_DAYS);
        stats.deactivated = self
            .store
            .mark_inactive_older_than(cutoff)
            .await
            .context("deactivating stale listings")?;
        stats.finished_at = Utc::now();

        info!(
            scanned = stats.scanned,
            created = stats.created,
            updated = stats.updated,
            price_drops = stats.price_drops,
            errors = stats.errors,
            broadcasts = stats.broadcasts,
            deactivated = stats.deactivated,
            "deals sync completed"
        );
        Ok(stats)
    }

    async fn scan_category(&self, scan: &CategoryScan, now: DateTime<Utc>, run: &mut SyncRunStats) -> CategoryStats {
        let mut stats = CategoryStats::default();
        let query = CatalogQuery::for_category(scan);
        let page = match self.catalog.search(&query).await {
            Ok(page) => page,
            Err(err) => {
                warn!(category = %scan.name, error = %err, "category search failed");
                stats.errors += 1;
                return stats;
            }
        };
        debug!(category = %scan.name, candidates = page.listings.len(), "category scanned");

        let mut created = Vec::new();
        for draft in page.listings {
            stats.scanned += 1;
            let id = draft.id.clone();
            match self.process_candidate(draft, now, &mut stats, run).await {
                Ok(Candidate::Created(listing)) => created.push(listing),
                Ok(Candidate::Updated) => {}
                Err(err) => {
                    warn!(category = %scan.name, listing_id = %id, error = %format!("{err:#}"), "candidate failed");
                    stats.errors += 1;
                }
            }
        }

        if !created.is_empty() {
            match self.fanout.notify_new_category_deals(&created, &scan.name).await {
                Ok(report) => run.notifications_sent += report.delivered(),
                Err(err) => {
                    warn!(category = %scan.name, error = %format!("{err:#}"), "category notification failed");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    async fn process_candidate(
        &self,
        draft: ListingDraft,
        now: DateTime<Utc>,
        stats: &mut CategoryStats,
        run: &mut SyncRunStats,
    ) -> Result<Candidate> {
        let stored = self
            .store
            .find_by_id(&draft.id)
            .await
            .with_context(|| format!("loading listing {}", draft.id))?;

        let Some(mut listing) = stored else {
            let listing = Listing::from_draft(draft, now);
            self.store
                .upsert(&listing)
                .await
                .with_context(|| format!("creating listing {}", listing.id))?;
            stats.created += 1;
            if listing.discount_percentage >= BROADCAST_MIN_DISCOUNT {
                let event = ShareEvent::to_all(listing.clone(), EventType::NewDeal);
                let report = self.broadcaster.handle(&event).await;
                run.broadcasts += report.summary.successful;
            }
            return Ok(Candidate::Created(listing));
        };

        let new_price = draft.current_price;
        let dropped = listing.current_price > new_price;
        if dropped {
            stats.price_drops += 1;
            info!(listing_id = %listing.id, old = listing.current_price, new = new_price, "price drop detected");
            match self.fanout.notify_price_drop(&listing, new_price).await {
                Ok(report) => run.notifications_sent += report.delivered(),
                Err(err) => {
                    warn!(listing_id = %listing.id, error = %format!("{err:#}"), "price drop notification failed");
                    stats.errors += 1;
                }
            }
        }

        listing.apply_draft(draft, now);
        self.store
            .upsert(&listing)
            .await
            .with_context(|| format!("updating listing {}", listing.id))?;
        stats.updated += 1;

        if dropped && listing.discount_percentage >= BROADCAST_MIN_DISCOUNT {
            let report = self
                .broadcaster
                .handle(&ShareEvent::to_all(listing, EventType::PriceDrop))
                .await;
            run.broadcasts += report.summary.successful;
        }
        Ok(Candidate::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = RunGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(RunGuard::acquire(&flag).is_none());
        drop(first);
        assert!(!flag.load(Ordering::Acquire));
        assert!(RunGuard::acquire(&flag).is_some());
    }

    #[test]
    fn skipped_outcome_has_no_stats() {
        assert!(SyncOutcome::Skipped.stats().is_none());
        let stats = SyncRunStats::new(Uuid::new_v4(), Utc::now());
        assert_eq!(SyncOutcome::Completed(stats.clone()).stats(), Some(&stats));
    }

    #[test]
    fn category_stats_roll_up() {
        let mut run = SyncRunStats::new(Uuid::new_v4(), Utc::now());
        run.absorb(
            "Kitchen",
            CategoryStats {
                scanned: 3,
                created: 1,
                updated: 2,
                price_drops: 1,
                errors: 0,
            },
        );
        run.absorb("Beauty", CategoryStats { errors: 1, ..CategoryStats::default() });
        assert_eq!(run.scanned, 3);
        assert_eq!(run.price_drops, 1);
        assert_eq!(run.errors, 1);
        assert_eq!(run.categories.len(), 2);
    }
}
