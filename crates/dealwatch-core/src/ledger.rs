use chrono::{DateTime, Duration, Utc};

use crate::{Listing, PricePoint};

pub const PRICE_HISTORY_RETENTION_DAYS: i64 = 90;

/// Record `new_price` at `now`, prune expired points and refresh price stats.
///
/// Points sharing a timestamp are kept side by side; the ledger never
/// deduplicates.
pub fn append_price(listing: Listing, new_price: f64, now: DateTime<Utc>) -> Listing {
    append_point(
        listing,
        PricePoint {
            price: new_price,
            recorded_at: now,
        },
        now,
    )
}

/// Insert an arbitrarily dated point; retention is measured from `now`.
pub fn append_point(mut listing: Listing, point: PricePoint, now: DateTime<Utc>) -> Listing {
    insert_point(&mut listing, point, now);
    listing
}

/// Replace the history of a first-seen listing with its current price.
pub fn seed_history(listing: &mut Listing, now: DateTime<Utc>) {
    listing.price_history = vec![PricePoint {
        price: listing.current_price,
        recorded_at: now,
    }];
    refresh_stats(listing);
}

pub(crate) fn record_point(listing: &mut Listing, price: f64, now: DateTime<Utc>) {
    insert_point(
        listing,
        PricePoint {
            price,
            recorded_at: now,
        },
        now,
    );
}

fn insert_point(listing: &mut Listing, point: PricePoint, now: DateTime<Utc>) {
    let at = listing
        .price_history
        .partition_point(|p| p.recorded_at <= point.recorded_at);
    listing.price_history.insert(at, point);
    prune(listing, now);
    refresh_stats(listing);
}

fn prune(listing: &mut Listing, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(PRICE_HISTORY_RETENTION_DAYS);
    listing.price_history.retain(|p| p.recorded_at > cutoff);
}

fn refresh_stats(listing: &mut Listing) {
    let prices = listing.price_history.iter().map(|p| p.price);
    let (mut lowest, mut highest, mut total, mut count) = (f64::INFINITY, f64::NEG_INFINITY, 0.0, 0usize);
    for price in prices {
        lowest = lowest.min(price);
        highest = highest.max(price);
        total += price;
        count += 1;
    }
    if count == 0 {
        listing.lowest_price = None;
        listing.highest_price = None;
        listing.average_price = None;
    } else {
        listing.lowest_price = Some(lowest);
        listing.highest_price = Some(highest);
        listing.average_price = Some(total / count as f64);
    }
}
