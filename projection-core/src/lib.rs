//! Agora Marketplace Projection Core
//!
//! Rebuilds queryable marketplace entities (users, listings, escrowed
//! purchases, disputes, reviews, governance proposals and votes) from the
//! ordered, append-only event stream emitted by the escrow ledger.
//!
//! # Architecture
//!
//! - **Event Sourcing**: All entity state is derived from immutable events
//! - **Single Writer**: One actor per source applies events strictly in
//!   ordering-key order
//! - **Atomic Units**: Each event's entity mutations and checkpoint
//!   advance commit as one RocksDB write batch
//! - **Incremental Aggregates**: Running totals, rolling averages and
//!   reputation tiers update from prior state plus one data point, never
//!   by re-reading event history
//!
//! # Invariants
//!
//! - Exactly-once application: replays and stale ordering keys are no-ops
//! - Deterministic replay: same events in the same order yield the same
//!   entities
//! - Append-only: entities are never deleted; lifecycle lives in status
//!   fields
//! - Consistent reads: queries never observe a partially-applied event

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod aggregates;
pub mod config;
pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod escrow;
pub mod feed;
pub mod metrics;
pub mod projection;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use dispatcher::{ApplyOutcome, Dispatcher};
pub use entities::{
    Dispute, DisputeStatus, Listing, ListingStatus, Proposal, Purchase, ReputationTier, Review,
    User, Vote,
};
pub use error::{Error, Result};
pub use escrow::PurchaseStatus;
pub use projection::Projection;
pub use storage::Storage;
pub use types::{
    Address, DisputeId, EscrowId, EventEnvelope, EventKind, EventPayload, ListingId, OrderingKey,
    ProposalId, ReviewId, TxHash,
};
