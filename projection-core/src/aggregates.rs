//! Pure aggregate calculators
//!
//! Every function here computes the next derived state from the prior
//! entity state plus a single new data point, without re-reading event
//! history and without I/O. All arithmetic is exact Decimal; invariants:
//!
//! - average_rating stays in [0, 100] for ratings in [0, 100]
//! - good_reviews + bad_reviews == review_count
//! - total_volume is monotonically non-decreasing
//! - votes_for/votes_against never double-count a voter

use crate::entities::{Proposal, ReputationTier, User, Vote};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Ratings at or above this count as good reviews
const GOOD_RATING_FLOOR: u8 = 50;

/// Tier thresholds, evaluated high-to-low; first match wins
const TIER_TABLE: [(ReputationTier, u64, u32); 3] = [
    (ReputationTier::Gold, 50, 98),
    (ReputationTier::Silver, 20, 95),
    (ReputationTier::Bronze, 5, 90),
];

/// Fold a new rating into the subject's running aggregate and recompute
/// the reputation tier
pub fn record_review(user: &mut User, rating: u8) {
    let prior_total = user.average_rating * Decimal::from(user.review_count);
    user.review_count += 1;
    user.average_rating = (prior_total + Decimal::from(rating)) / Decimal::from(user.review_count);

    if rating >= GOOD_RATING_FLOOR {
        user.good_reviews += 1;
    } else {
        user.bad_reviews += 1;
    }

    user.reputation_tier = reputation_tier(user.review_count, user.average_rating);
}

/// Classify a user's reputation from review count and average rating
///
/// Full recompute, not an incremental patch, so the tier can move in
/// either direction as the average evolves.
pub fn reputation_tier(review_count: u64, average_rating: Decimal) -> ReputationTier {
    for (tier, min_reviews, min_average) in TIER_TABLE {
        if review_count >= min_reviews && average_rating >= Decimal::from(min_average) {
            return tier;
        }
    }
    ReputationTier::None
}

/// Credit a completed sale to the seller
pub fn record_sale(seller: &mut User, amount: Decimal, at: DateTime<Utc>) {
    seller.total_sales += 1;
    seller.total_volume += amount;
    seller.mark_first_deal(at);
}

/// Credit a completed purchase to the buyer
pub fn record_purchase(buyer: &mut User) {
    buyer.total_purchases += 1;
}

/// Fold a vote into the proposal tallies
///
/// When the voter has a prior vote, its weight is first subtracted from
/// whichever side it contributed to, then the new weight is added to the
/// (possibly different) side chosen now. Adding without the subtraction
/// would double-count a voter who changes their vote.
pub fn apply_vote(proposal: &mut Proposal, prior: Option<&Vote>, support: bool, weight: Decimal) {
    if let Some(prior) = prior {
        if prior.support {
            proposal.votes_for -= prior.weight;
        } else {
            proposal.votes_against -= prior.weight;
        }
    }

    if support {
        proposal.votes_for += weight;
    } else {
        proposal.votes_against += weight;
    }
}
