//! Materialized entities derived from the event stream
//!
//! The projection exclusively owns this state. Entities are plain value
//! objects: handlers load a copy, mutate fields, and stage the copy for
//! the atomic per-event commit. Nothing is ever physically deleted;
//! lifecycle is expressed through status fields.

use crate::escrow::PurchaseStatus;
use crate::types::{Address, DisputeId, EscrowId, ListingId, ProposalId, ReviewId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reputation tier, fully recomputed after every rating update
///
/// Modeled as a closed enum with an explicit evaluation table (see
/// [`crate::aggregates::reputation_tier`]); the tier can move in either
/// direction as the average evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReputationTier {
    /// Below every threshold
    None = 0,
    /// reviewCount >= 5 and average >= 90
    Bronze = 1,
    /// reviewCount >= 20 and average >= 95
    Silver = 2,
    /// reviewCount >= 50 and average >= 98
    Gold = 3,
}

/// Marketplace participant, created lazily on first reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Ledger address (lowercase-normalized)
    pub address: Address,

    /// Completed sales as seller
    pub total_sales: u64,

    /// Completed purchases as buyer
    pub total_purchases: u64,

    /// Accumulated sale volume (monotonically non-decreasing)
    pub total_volume: Decimal,

    /// Average received rating, in [0, 100]
    pub average_rating: Decimal,

    /// Number of received reviews
    pub review_count: u64,

    /// Reviews with rating >= 50
    pub good_reviews: u64,

    /// Reviews with rating < 50
    pub bad_reviews: u64,

    /// Current reputation tier
    pub reputation_tier: ReputationTier,

    /// First-seen event timestamp (immutable)
    pub joined_at: DateTime<Utc>,

    /// Timestamp of the first deal, set once
    pub first_deal_at: Option<DateTime<Utc>>,
}

impl User {
    /// Fresh user record, first seen at the given event timestamp
    pub fn new(address: Address, joined_at: DateTime<Utc>) -> Self {
        Self {
            address,
            total_sales: 0,
            total_purchases: 0,
            total_volume: Decimal::ZERO,
            average_rating: Decimal::ZERO,
            review_count: 0,
            good_reviews: 0,
            bad_reviews: 0,
            reputation_tier: ReputationTier::None,
            joined_at,
            first_deal_at: None,
        }
    }

    /// Record the first deal timestamp; later calls are no-ops
    pub fn mark_first_deal(&mut self, at: DateTime<Utc>) {
        if self.first_deal_at.is_none() {
            self.first_deal_at = Some(at);
        }
    }
}

/// Listing lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ListingStatus {
    /// Open for purchase
    Active = 1,
    /// Funds held for an in-flight purchase
    InEscrow = 2,
    /// Purchase completed
    Sold = 3,
    /// Withdrawn from the marketplace
    Archived = 4,
}

/// Marketplace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Ledger-assigned identifier
    pub id: ListingId,

    /// Seller address
    pub seller: Address,

    /// Payment asset identifier
    pub token: Address,

    /// Unit price (positive)
    pub price: Decimal,

    /// Available quantity
    pub quantity: u64,

    /// Display currency
    pub currency: String,

    /// Content identifier of the listing metadata blob (immutable)
    pub ipfs_cid: String,

    /// Lifecycle stage
    pub status: ListingStatus,

    /// Creation event timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation event timestamp
    pub updated_at: DateTime<Utc>,

    /// Buyer, set while InEscrow or after Sold
    pub buyer: Option<Address>,

    /// The escrow currently bound to this listing, cleared when that
    /// purchase reaches a terminal state without selling the listing.
    /// Guards the one-active-purchase-per-listing invariant.
    pub active_escrow: Option<EscrowId>,
}

/// Purchase held in escrow (see [`crate::escrow`] for the state machine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    /// Ledger-assigned escrow identifier, stable across the lifecycle
    pub id: EscrowId,

    /// Listing being purchased (immutable)
    pub listing: ListingId,

    /// Buyer address (immutable)
    pub buyer: Address,

    /// Seller address (immutable)
    pub seller: Address,

    /// Escrowed amount (immutable)
    pub amount: Decimal,

    /// Payment asset identifier
    pub token: Address,

    /// Lifecycle state
    pub status: PurchaseStatus,

    /// Creation event timestamp
    pub created_at: DateTime<Utc>,

    /// Set once, on terminal completion only
    pub completed_at: Option<DateTime<Utc>>,
}

/// Dispute lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisputeStatus {
    /// Open, recruiting arbitration
    Recruiting = 1,
    /// Closed with a resolution
    Resolved = 2,
}

/// Dispute raised against a funded purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    /// Ledger-assigned identifier
    pub id: DisputeId,

    /// Disputed purchase (immutable)
    pub purchase: EscrowId,

    /// Address that opened the dispute
    pub initiator: Address,

    /// Content identifier of the dispute reason blob
    pub reason_cid: String,

    /// Lifecycle stage
    pub status: DisputeStatus,

    /// Creation event timestamp
    pub created_at: DateTime<Utc>,
}

/// Review of a completed or in-flight purchase, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Synthetic identifier derived from (tx hash, log index)
    pub id: ReviewId,

    /// Reviewed purchase
    pub purchase: EscrowId,

    /// Reviewer address
    pub reviewer: Address,

    /// Address being reviewed
    pub subject: Address,

    /// Rating in 0..=100
    pub rating: u8,

    /// Content identifier of the comment blob
    pub comment_cid: String,

    /// Creation event timestamp
    pub created_at: DateTime<Utc>,
}

/// Governance proposal with running vote tallies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Ledger-assigned identifier
    pub id: ProposalId,

    /// Proposer address
    pub proposer: Address,

    /// Content identifier of the description blob
    pub description_cid: String,

    /// Accumulated supporting weight
    pub votes_for: Decimal,

    /// Accumulated opposing weight
    pub votes_against: Decimal,

    /// Creation event timestamp
    pub created_at: DateTime<Utc>,
}

/// One voter's current position on a proposal
///
/// At most one Vote exists per (proposal, voter); a repeat VoteCast
/// overwrites it after the tallies are corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Proposal voted on
    pub proposal: ProposalId,

    /// Voter address
    pub voter: Address,

    /// Support (true = for)
    pub support: bool,

    /// Voting weight
    pub weight: Decimal,

    /// Timestamp of the most recent cast
    pub cast_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_new_user_is_zeroed() {
        let user = User::new(Address::new("0xA1"), ts(100));
        assert_eq!(user.total_sales, 0);
        assert_eq!(user.total_volume, Decimal::ZERO);
        assert_eq!(user.reputation_tier, ReputationTier::None);
        assert_eq!(user.joined_at, ts(100));
        assert!(user.first_deal_at.is_none());
    }

    #[test]
    fn test_first_deal_set_once() {
        let mut user = User::new(Address::new("0xA1"), ts(100));
        user.mark_first_deal(ts(200));
        user.mark_first_deal(ts(300));
        assert_eq!(user.first_deal_at, Some(ts(200)));
    }
}
