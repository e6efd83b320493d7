use serde::{Deserialize, Serialize};

use crate::{Badge, Listing};

const DISCOUNT_WEIGHT: f64 = 0.5;
const RATING_WEIGHT: f64 = 0.3;
const POPULARITY_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DealScore {
    pub score: f64,
    pub badge: Option<Badge>,
}

/// Whole-number discount of `current` against `original`, never negative.
pub fn discount_percentage(original: f64, current: f64) -> u32 {
    if !original.is_finite() || !current.is_finite() || original <= 0.0 {
        return 0;
    }
    let current = current.max(0.0);
    let pct = ((original - current) / original * 100.0).round();
    pct.clamp(0.0, 100.0) as u32
}

/// Composite 0-100 deal quality. Out-of-range inputs are clamped.
pub fn score_deal(discount: u32, rating: f64, review_count: u64) -> DealScore {
    let normalized_discount = (f64::from(discount) / 100.0).clamp(0.0, 1.0);
    let normalized_rating = if rating.is_finite() {
        rating.clamp(0.0, 5.0) / 5.0
    } else {
        0.0
    };
    let normalized_popularity = ((review_count as f64 + 1.0).log10() / 5.0).min(1.0);

    let score = ((normalized_discount * DISCOUNT_WEIGHT
        + normalized_rating * RATING_WEIGHT
        + normalized_popularity * POPULARITY_WEIGHT)
        * 100.0)
        .clamp(0.0, 100.0);

    DealScore {
        score,
        badge: assign_badge(discount, score, review_count),
    }
}

/// Fixed priority: discount first, then score, then popularity.
pub fn assign_badge(discount: u32, score: f64, review_count: u64) -> Option<Badge> {
    if discount >= 50 {
        Some(Badge::BiggestDiscount)
    } else if score >= 70.0 {
        Some(Badge::BestDeal)
    } else if review_count >= 1000 {
        Some(Badge::MostPopular)
    } else {
        None
    }
}

/// Recompute derived deal fields. Called before every store write.
pub fn apply_score(listing: &mut Listing) {
    listing.discount_percentage = discount_percentage(listing.original_price, listing.current_price);
    let deal = score_deal(listing.discount_percentage, listing.rating, listing.review_count);
    listing.score = deal.score;
    listing.badge = deal.badge;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_matches_rounded_formula_and_is_never_negative() {
        assert_eq!(discount_percentage(100.0, 60.0), 40);
        assert_eq!(discount_percentage(29.99, 19.99), 33);
        assert_eq!(discount_percentage(3.0, 2.0), 33);
        assert_eq!(discount_percentage(200.0, 199.0), 1);
        assert_eq!(discount_percentage(50.0, 50.0), 0);
        assert_eq!(discount_percentage(50.0, 55.0), 0);
        assert_eq!(discount_percentage(0.0, 10.0), 0);
        assert_eq!(discount_percentage(-10.0, 5.0), 0);
        assert_eq!(discount_percentage(10.0, -5.0), 100);
    }

    #[test]
    fn discount_holds_for_a_sweep_of_valid_prices() {
        for original in [1.0, 9.99, 49.5, 120.0, 999.0] {
            for step in 1..=20 {
                let current = original * f64::from(step) / 20.0;
                let expected = ((original - current) / original * 100.0).round() as u32;
                assert_eq!(discount_percentage(original, current), expected);
            }
        }
    }

    #[test]
    fn score_is_monotonic_in_each_input() {
        let mut last = -1.0;
        for discount in (0..=100).step_by(5) {
            let s = score_deal(discount, 4.0, 100).score;
            assert!(s >= last);
            last = s;
        }
        let mut last = -1.0;
        for tenth in 0..=50 {
            let s = score_deal(20, f64::from(tenth) / 10.0, 100).score;
            assert!(s >= last);
            last = s;
        }
        let mut last = -1.0;
        for reviews in [0u64, 1, 9, 99, 999, 9_999, 99_999, 1_000_000] {
            let s = score_deal(20, 4.0, reviews).score;
            assert!(s >= last);
            last = s;
        }
    }

    #[test]
    fn score_is_clamped_for_malformed_inputs() {
        let s = score_deal(250, 9.0, u64::MAX);
        assert!((s.score - 100.0).abs() < 1e-9);
        let s = score_deal(0, -3.0, 0);
        assert_eq!(s.score, 0.0);
        let s = score_deal(0, f64::NAN, 0);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn score_matches_weighted_formula() {
        let s = score_deal(40, 4.5, 9_999).score;
        let expected = 100.0 * (0.5 * 0.4 + 0.3 * 0.9 + 0.2 * (10_000f64.log10() / 5.0));
        assert!((s - expected).abs() < 1e-9);
    }

    #[test]
    fn discount_badge_takes_priority_over_score() {
        assert_eq!(assign_badge(55, 40.0, 0), Some(Badge::BiggestDiscount));
    }

    #[test]
    fn high_score_gets_best_deal() {
        assert_eq!(assign_badge(20, 75.0, 0), Some(Badge::BestDeal));
    }

    #[test]
    fn popular_listing_gets_most_popular() {
        assert_eq!(assign_badge(5, 10.0, 1500), Some(Badge::MostPopular));
        assert_eq!(assign_badge(5, 10.0, 999), None);
    }
}
