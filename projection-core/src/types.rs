//! Event types emitted by the marketplace ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for storage, JSON on the wire)
//! - Exact arithmetic (Decimal for amounts and vote weights)
//! - Deterministic identity (ids come from the ledger or are derived from
//!   payload fields, never from wall-clock or random values)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger address (lowercase-normalized on construction)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create new address, normalizing to lowercase
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into().to_lowercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction hash (lowercase-normalized on construction)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    /// Create new transaction hash, normalizing to lowercase
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into().to_lowercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TxHash {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! ledger_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Create from the ledger-assigned numeric identifier
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the numeric identifier
            pub fn value(&self) -> u64 {
                self.0
            }

            /// Big-endian key bytes for storage
            pub fn key_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ledger_id! {
    /// Ledger-assigned listing identifier
    ListingId
}
ledger_id! {
    /// Ledger-assigned escrow identifier (stable across the purchase lifecycle)
    EscrowId
}
ledger_id! {
    /// Ledger-assigned dispute identifier
    DisputeId
}
ledger_id! {
    /// Ledger-assigned governance proposal identifier
    ProposalId
}

/// Synthetic review identifier, derived from (transaction hash, log index)
///
/// Guarantees per-event uniqueness even for duplicate submissions in the
/// same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewId(String);

impl ReviewId {
    /// Derive from the emitting transaction hash and log index
    pub fn derive(tx_hash: &TxHash, log_index: u32) -> Self {
        Self(format!("{}:{}", tx_hash.as_str(), log_index))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event in the ledger's total order
///
/// Lexicographic comparison over (block, tx_index, log_index) gives the
/// causal order in which events must be applied.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderingKey {
    /// Block height
    pub block: u64,
    /// Transaction index within the block
    pub tx_index: u32,
    /// Log index within the transaction
    pub log_index: u32,
}

impl OrderingKey {
    /// Create a new ordering key
    pub fn new(block: u64, tx_index: u32, log_index: u32) -> Self {
        Self {
            block,
            tx_index,
            log_index,
        }
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.block, self.tx_index, self.log_index)
    }
}

/// A listing was created on the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingCreated {
    /// Listing identifier
    pub listing_id: ListingId,
    /// Seller address
    pub seller: Address,
    /// Payment asset identifier
    pub token: Address,
    /// Unit price (must be positive)
    pub price: Decimal,
    /// Available quantity
    pub quantity: u64,
    /// Display currency
    pub currency: String,
    /// Content identifier of the listing metadata blob
    pub ipfs_cid: String,
}

/// Listing price/quantity changed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingUpdated {
    /// Listing identifier
    pub listing_id: ListingId,
    /// New unit price
    pub price: Decimal,
    /// New quantity
    pub quantity: u64,
}

/// A buyer funded an escrow for a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInitiated {
    /// Escrow identifier
    pub escrow_id: EscrowId,
    /// Listing being purchased
    pub listing_id: ListingId,
    /// Buyer address
    pub buyer: Address,
    /// Escrowed amount
    pub amount: Decimal,
    /// Payment asset identifier
    pub token: Address,
}

/// The buyer confirmed receipt and the escrow released
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCompleted {
    /// Escrow identifier
    pub escrow_id: EscrowId,
}

/// A dispute was opened against a funded escrow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeOpened {
    /// Dispute identifier
    pub dispute_id: DisputeId,
    /// Disputed escrow
    pub escrow_id: EscrowId,
    /// Address that opened the dispute
    pub initiator: Address,
    /// Content identifier of the dispute reason blob
    pub reason_cid: String,
}

/// A dispute reached resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeResolved {
    /// Dispute identifier
    pub dispute_id: DisputeId,
}

/// A review was submitted for a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmitted {
    /// Reviewed escrow
    pub escrow_id: EscrowId,
    /// Reviewer address
    pub reviewer: Address,
    /// Address being reviewed
    pub subject: Address,
    /// Rating in 0..=100
    pub rating: u8,
    /// Content identifier of the review comment blob
    pub comment_cid: String,
}

/// A governance proposal was created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalCreated {
    /// Proposal identifier
    pub proposal_id: ProposalId,
    /// Proposer address
    pub proposer: Address,
    /// Content identifier of the proposal description blob
    pub description_cid: String,
}

/// A vote was cast on a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCast {
    /// Proposal identifier
    pub proposal_id: ProposalId,
    /// Voter address
    pub voter: Address,
    /// Support (true = for, false = against)
    pub support: bool,
    /// Voting weight (stake)
    pub weight: Decimal,
}

/// Typed event payload, one variant per ledger event kind
///
/// `Unknown` carries kinds this build does not recognize, so the
/// dispatcher can log and skip them instead of failing (forward
/// compatibility with ledger upgrades).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Listing created
    ListingCreated(ListingCreated),
    /// Listing price/quantity updated
    ListingUpdated(ListingUpdated),
    /// Escrow funded
    PurchaseInitiated(PurchaseInitiated),
    /// Escrow released
    PurchaseCompleted(PurchaseCompleted),
    /// Dispute opened
    DisputeOpened(DisputeOpened),
    /// Dispute resolved
    DisputeResolved(DisputeResolved),
    /// Review submitted
    ReviewSubmitted(ReviewSubmitted),
    /// Governance proposal created
    ProposalCreated(ProposalCreated),
    /// Governance vote cast
    VoteCast(VoteCast),
    /// Unrecognized event kind
    Unknown {
        /// The kind string as delivered by the feed
        kind: String,
    },
}

impl EventPayload {
    /// Event kind for registry lookup, logging and metrics labels
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ListingCreated(_) => EventKind::ListingCreated,
            EventPayload::ListingUpdated(_) => EventKind::ListingUpdated,
            EventPayload::PurchaseInitiated(_) => EventKind::PurchaseInitiated,
            EventPayload::PurchaseCompleted(_) => EventKind::PurchaseCompleted,
            EventPayload::DisputeOpened(_) => EventKind::DisputeOpened,
            EventPayload::DisputeResolved(_) => EventKind::DisputeResolved,
            EventPayload::ReviewSubmitted(_) => EventKind::ReviewSubmitted,
            EventPayload::ProposalCreated(_) => EventKind::ProposalCreated,
            EventPayload::VoteCast(_) => EventKind::VoteCast,
            EventPayload::Unknown { .. } => EventKind::Unknown,
        }
    }
}

/// Event kind (fieldless mirror of [`EventPayload`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// Listing created
    ListingCreated = 1,
    /// Listing updated
    ListingUpdated = 2,
    /// Escrow funded
    PurchaseInitiated = 3,
    /// Escrow released
    PurchaseCompleted = 4,
    /// Dispute opened
    DisputeOpened = 5,
    /// Dispute resolved
    DisputeResolved = 6,
    /// Review submitted
    ReviewSubmitted = 7,
    /// Proposal created
    ProposalCreated = 8,
    /// Vote cast
    VoteCast = 9,
    /// Unrecognized kind
    Unknown = 255,
}

impl EventKind {
    /// Stable name, used as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ListingCreated => "ListingCreated",
            EventKind::ListingUpdated => "ListingUpdated",
            EventKind::PurchaseInitiated => "PurchaseInitiated",
            EventKind::PurchaseCompleted => "PurchaseCompleted",
            EventKind::DisputeOpened => "DisputeOpened",
            EventKind::DisputeResolved => "DisputeResolved",
            EventKind::ReviewSubmitted => "ReviewSubmitted",
            EventKind::ProposalCreated => "ProposalCreated",
            EventKind::VoteCast => "VoteCast",
            EventKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single event as delivered by the ledger feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the ledger's total order
    pub ordering_key: OrderingKey,

    /// Hash of the emitting transaction
    pub tx_hash: TxHash,

    /// Ledger timestamp of the emitting block
    pub timestamp: DateTime<Utc>,

    /// Typed payload
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Event kind shortcut
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_lowercases() {
        let addr = Address::new("0xAbCdEf");
        assert_eq!(addr.as_str(), "0xabcdef");
    }

    #[test]
    fn test_ordering_key_total_order() {
        let a = OrderingKey::new(10, 0, 5);
        let b = OrderingKey::new(10, 1, 0);
        let c = OrderingKey::new(11, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, OrderingKey::new(10, 0, 5));
    }

    #[test]
    fn test_review_id_unique_per_log_index() {
        let tx = TxHash::new("0xFEED");
        let first = ReviewId::derive(&tx, 0);
        let second = ReviewId::derive(&tx, 1);
        assert_ne!(first, second);
        assert_eq!(first.as_str(), "0xfeed:0");
    }

    #[test]
    fn test_payload_kind() {
        let payload = EventPayload::PurchaseCompleted(PurchaseCompleted {
            escrow_id: EscrowId::new(7),
        });
        assert_eq!(payload.kind(), EventKind::PurchaseCompleted);
        assert_eq!(payload.kind().as_str(), "PurchaseCompleted");

        let unknown = EventPayload::Unknown {
            kind: "ListingBoosted".to_string(),
        };
        assert_eq!(unknown.kind(), EventKind::Unknown);
    }
}
