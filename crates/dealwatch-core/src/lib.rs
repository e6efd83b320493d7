//! Core domain model for dealwatch: listings, subscribers, deal scoring and the
//! bounded price-history ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod ledger;
mod scoring;

pub use ledger::{append_point, append_price, seed_history, PRICE_HISTORY_RETENTION_DAYS};
pub use scoring::{apply_score, assign_badge, discount_percentage, score_deal, DealScore};

pub const CRATE_NAME: &str = "dealwatch-core";

pub const TELEGRAM: &str = "telegram";
pub const REDDIT: &str = "reddit";
pub const FACEBOOK: &str = "facebook";
pub const INSTAGRAM: &str = "instagram";
pub const TWITTER: &str = "twitter";

/// Broadcast order used when a caller does not name platforms.
pub const DEFAULT_PLATFORMS: [&str; 5] = [TELEGRAM, REDDIT, FACEBOOK, INSTAGRAM, TWITTER];

pub const PUSH: &str = "push";
pub const MESSAGING: &str = "messaging";

/// Listings not refreshed for this many days are flagged inactive.
pub const INACTIVE_AFTER_DAYS: i64 = 7;
/// Minimum discount for a listing to be broadcast publicly.
pub const BROADCAST_MIN_DISCOUNT: u32 = 30;
pub const DEFAULT_CATEGORY_MIN_DISCOUNT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    BiggestDiscount,
    BestDeal,
    MostPopular,
}

impl Badge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::BiggestDiscount => "biggest_discount",
            Badge::BestDeal => "best_deal",
            Badge::MostPopular => "most_popular",
        }
    }
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewDeal,
    PriceDrop,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NewDeal => "new_deal",
            EventType::PriceDrop => "price_drop",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Candidate returned by a catalog source, before scoring and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub affiliate_link: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub original_price: f64,
    pub current_price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u64,
}

impl ListingDraft {
    pub fn discount_percentage(&self) -> u32 {
        discount_percentage(self.original_price, self.current_price)
    }
}

/// Persisted listing with derived deal metadata and bounded price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub affiliate_link: String,
    pub brand: String,
    pub features: Vec<String>,
    pub original_price: f64,
    pub current_price: f64,
    pub discount_percentage: u32,
    pub category: String,
    pub rating: f64,
    pub review_count: u64,
    pub score: f64,
    pub badge: Option<Badge>,
    pub active: bool,
    #[serde(default)]
    pub broadcast_to: BTreeMap<String, bool>,
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
    pub lowest_price: Option<f64>,
    pub highest_price: Option<f64>,
    pub average_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Listing {
    /// Build a new listing from its first sighting, with a one-entry history.
    pub fn from_draft(draft: ListingDraft, now: DateTime<Utc>) -> Self {
        let mut listing = Self {
            id: draft.id,
            title: draft.title,
            description: draft.description,
            image_url: draft.image_url,
            affiliate_link: draft.affiliate_link,
            brand: draft.brand,
            features: draft.features,
            original_price: draft.original_price,
            current_price: draft.current_price,
            discount_percentage: 0,
            category: draft.category,
            rating: draft.rating,
            review_count: draft.review_count,
            score: 0.0,
            badge: None,
            active: true,
            broadcast_to: BTreeMap::new(),
            price_history: Vec::new(),
            lowest_price: None,
            highest_price: None,
            average_price: None,
            created_at: now,
            last_updated: now,
        };
        seed_history(&mut listing, now);
        apply_score(&mut listing);
        listing
    }

    /// Overwrite catalog attributes with a fresh sighting and record its price.
    pub fn apply_draft(&mut self, draft: ListingDraft, now: DateTime<Utc>) {
        self.title = draft.title;
        self.description = draft.description;
        self.image_url = draft.image_url;
        self.affiliate_link = draft.affiliate_link;
        self.brand = draft.brand;
        self.features = draft.features;
        self.original_price = draft.original_price;
        self.current_price = draft.current_price;
        self.category = draft.category;
        self.rating = draft.rating;
        self.review_count = draft.review_count;
        self.active = true;
        self.last_updated = now;
        ledger::record_point(self, draft.current_price, now);
        apply_score(self);
    }

    pub fn is_broadcast_to(&self, platform: &str) -> bool {
        self.broadcast_to.get(platform).copied().unwrap_or(false)
    }

    /// Flags only ever move from `false` to `true`.
    pub fn mark_broadcast(&mut self, platform: &str) {
        self.broadcast_to.insert(platform.to_string(), true);
    }

    pub fn merge_broadcast_flags(&mut self, other: &BTreeMap<String, bool>) {
        for (platform, sent) in other {
            if *sent {
                self.mark_broadcast(platform);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEndpoint {
    pub endpoint: String,
    #[serde(default)]
    pub p256dh: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSettings {
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<PushEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingSettings {
    pub enabled: bool,
    #[serde(default)]
    pub address: Option<String>,
}

/// Subscriber as seen by the core. Owned by account management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub watched_listings: BTreeSet<String>,
    #[serde(default)]
    pub watched_categories: BTreeSet<String>,
    #[serde(default)]
    pub push: PushSettings,
    #[serde(default)]
    pub messaging: MessagingSettings,
    #[serde(default)]
    pub min_discount_percent: Option<u32>,
}

fn default_active() -> bool {
    true
}

impl Subscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
            watched_listings: BTreeSet::new(),
            watched_categories: BTreeSet::new(),
            push: PushSettings::default(),
            messaging: MessagingSettings::default(),
            min_discount_percent: None,
        }
    }

    pub fn push_endpoint(&self) -> Option<&PushEndpoint> {
        if self.push.enabled {
            self.push.endpoint.as_ref()
        } else {
            None
        }
    }

    pub fn messaging_address(&self) -> Option<&str> {
        if self.messaging.enabled {
            self.messaging.address.as_deref().filter(|a| !a.trim().is_empty())
        } else {
            None
        }
    }

    pub fn accepts_discount(&self, discount: u32) -> bool {
        self.min_discount_percent.map_or(true, |min| discount >= min)
    }
}

/// Price-drop (or watchlist) event addressed to private subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub listing: Listing,
    pub event_type: EventType,
    pub previous_price: f64,
    pub new_price: f64,
    pub channels: Vec<String>,
}

impl NotificationEvent {
    pub fn price_drop(listing: Listing, new_price: f64) -> Self {
        let previous_price = listing.current_price;
        Self {
            listing,
            event_type: EventType::PriceDrop,
            previous_price,
            new_price,
            channels: vec![PUSH.to_string(), MESSAGING.to_string()],
        }
    }

    /// A deal announcement; both prices are the listing's current one.
    pub fn new_deal(listing: Listing, channels: &[&str]) -> Self {
        let price = listing.current_price;
        Self {
            listing,
            event_type: EventType::NewDeal,
            previous_price: price,
            new_price: price,
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn targets(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

/// Public broadcast request for one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareEvent {
    pub listing: Listing,
    pub event_type: EventType,
    pub platforms: Vec<String>,
}

impl ShareEvent {
    pub fn to_all(listing: Listing, event_type: EventType) -> Self {
        Self {
            listing,
            event_type,
            platforms: DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// One category scanned on every sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScan {
    pub name: String,
    pub search_index: String,
    pub keywords: String,
    #[serde(default = "default_category_min_discount")]
    pub min_discount: u32,
}

fn default_category_min_discount() -> u32 {
    DEFAULT_CATEGORY_MIN_DISCOUNT
}

impl CategoryScan {
    pub fn new(name: &str, search_index: &str, keywords: &str) -> Self {
        Self {
            name: name.to_string(),
            search_index: search_index.to_string(),
            keywords: keywords.to_string(),
            min_discount: DEFAULT_CATEGORY_MIN_DISCOUNT,
        }
    }
}

pub fn default_categories() -> Vec<CategoryScan> {
    vec![
        CategoryScan::new("Electronics", "Electronics", "electronics deals"),
        CategoryScan::new("Computers", "Computers", "computer deals"),
        CategoryScan::new("HomeAndGarden", "HomeGarden", "home garden deals"),
        CategoryScan::new("Kitchen", "Kitchen", "kitchen deals"),
        CategoryScan::new("Fashion", "Fashion", "fashion deals"),
        CategoryScan::new("Beauty", "Beauty", "beauty deals"),
        CategoryScan::new("Sports", "SportingGoods", "sport deals"),
        CategoryScan::new("VideoGames", "VideoGames", "video games deals"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).single().unwrap()
    }

    fn draft(price: f64) -> ListingDraft {
        ListingDraft {
            id: "B0TEST".into(),
            title: "Noise cancelling headphones".into(),
            description: String::new(),
            image_url: Some("https://img.example/b0test.jpg".into()),
            affiliate_link: "https://shop.example/dp/B0TEST".into(),
            brand: "Acme".into(),
            features: vec![],
            original_price: 100.0,
            current_price: price,
            category: "Electronics".into(),
            rating: 4.5,
            review_count: 320,
        }
    }

    #[test]
    fn from_draft_seeds_history_and_scores() {
        let listing = Listing::from_draft(draft(60.0), ts(1));
        assert_eq!(listing.discount_percentage, 40);
        assert_eq!(listing.price_history.len(), 1);
        assert_eq!(listing.lowest_price, Some(60.0));
        assert!(listing.active);
        assert!(listing.score > 0.0 && listing.score <= 100.0);
    }

    #[test]
    fn apply_draft_appends_and_reactivates() {
        let mut listing = Listing::from_draft(draft(60.0), ts(1));
        listing.active = false;
        listing.apply_draft(draft(50.0), ts(2));
        assert!(listing.active);
        assert_eq!(listing.current_price, 50.0);
        assert_eq!(listing.price_history.len(), 2);
        assert_eq!(listing.lowest_price, Some(50.0));
        assert_eq!(listing.highest_price, Some(60.0));
        assert_eq!(listing.last_updated, ts(2));
    }

    #[test]
    fn broadcast_flags_merge_monotonically() {
        let mut listing = Listing::from_draft(draft(60.0), ts(1));
        listing.mark_broadcast(TELEGRAM);
        let mut incoming = BTreeMap::new();
        incoming.insert(TELEGRAM.to_string(), false);
        incoming.insert(REDDIT.to_string(), true);
        listing.merge_broadcast_flags(&incoming);
        assert!(listing.is_broadcast_to(TELEGRAM));
        assert!(listing.is_broadcast_to(REDDIT));
        assert!(!listing.is_broadcast_to(TWITTER));
    }

    #[test]
    fn subscriber_channel_accessors_respect_enabled_flags() {
        let mut sub = Subscriber::new("u1");
        sub.push.endpoint = Some(PushEndpoint {
            endpoint: "https://push.example/abc".into(),
            p256dh: None,
            auth: None,
        });
        assert!(sub.push_endpoint().is_none());
        sub.push.enabled = true;
        assert!(sub.push_endpoint().is_some());

        sub.messaging.enabled = true;
        sub.messaging.address = Some("  ".into());
        assert!(sub.messaging_address().is_none());

        sub.min_discount_percent = Some(40);
        assert!(!sub.accepts_discount(35));
        assert!(sub.accepts_discount(40));
    }

    #[test]
    fn events_carry_their_type_and_targets() {
        let listing = Listing::from_draft(draft(80.0), ts(3));

        let deal = NotificationEvent::new_deal(listing.clone(), &[PUSH]);
        assert_eq!(deal.event_type, EventType::NewDeal);
        assert_eq!(deal.previous_price, deal.new_price);
        assert!(deal.targets(PUSH));
        assert!(!deal.targets(MESSAGING));

        let cut = NotificationEvent::price_drop(listing.clone(), 72.0);
        assert_eq!(cut.previous_price, 80.0);
        assert!(cut.targets(MESSAGING));

        let share = ShareEvent::to_all(listing, EventType::PriceDrop);
        assert_eq!(share.platforms.len(), DEFAULT_PLATFORMS.len());
    }

    #[test]
    fn enums_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Badge::BiggestDiscount).unwrap(),
            "\"biggest_discount\""
        );
        assert_eq!(serde_json::to_string(&EventType::NewDeal).unwrap(), "\"new_deal\"");
    }

    #[test]
    fn subscriber_defaults_when_fields_missing() {
        let sub: Subscriber = serde_json::from_str(r#"{"id":"u9"}"#).unwrap();
        assert!(sub.active);
        assert!(sub.watched_listings.is_empty());
        assert!(!sub.push.enabled);
    }
}
